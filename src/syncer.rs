//! Sync orchestrator: the periodic control loop that converges the managed
//! account toward the scaled reference portfolio.
//!
//! One logical worker per session. Cycles run strictly sequentially and the
//! next tick is scheduled only after the current action list has drained.
//! A failed fetch aborts the cycle; a failed action is logged and counted.
//! Either way the next cycle's diff re-attempts whatever is still out of
//! sync, so nothing here retries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{broadcast, Notify, RwLock};
use tracing::{debug, info, warn};

use crate::adapters::{ExchangeAdapter, OpenRequest, OrderAck, OrderState};
use crate::config::SyncConfig;
use crate::engine::{
    diff_positions, scale_to_budget, scale_trade, DiffOptions, IncomingTrade, PositionDiff,
    ScalingOptions, SideFlip, SizeAdjustment,
};
use crate::error::SyncError;
use crate::events::{ActionKind, EventBus, SyncEvent};
use crate::models::Position;

const DRY_RUN_ID: &str = "dry-run";

/// Running counters, cloned out to observers.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub syncs_completed: u64,
    pub positions_added: u64,
    pub positions_removed: u64,
    pub positions_adjusted: u64,
    pub errors: u64,
    pub last_sync_time: Option<DateTime<Utc>>,
}

impl std::fmt::Display for SyncStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Sync Statistics ===")?;
        writeln!(f, "Cycles Completed:   {}", self.syncs_completed)?;
        writeln!(f, "Positions Added:    {}", self.positions_added)?;
        writeln!(f, "Positions Removed:  {}", self.positions_removed)?;
        writeln!(f, "Positions Adjusted: {}", self.positions_adjusted)?;
        writeln!(f, "Errors:             {}", self.errors)?;
        writeln!(
            f,
            "Last Sync:          {}",
            self.last_sync_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string())
        )?;
        Ok(())
    }
}

/// Per-session state. Built when the run loop starts, dropped when it exits;
/// nothing outside the loop holds a reference to it. The cached maps feed
/// change-detection logging only, decisions always use the fresh poll.
struct SyncerState {
    scaling_factor: Decimal,
    stats: SyncStats,
    last_reference: HashMap<String, Position>,
    last_managed: HashMap<String, Position>,
}

impl SyncerState {
    fn new() -> Self {
        Self {
            scaling_factor: Decimal::ONE,
            stats: SyncStats::default(),
            last_reference: HashMap::new(),
            last_managed: HashMap::new(),
        }
    }
}

/// The orchestrator. Holds one adapter for the reference account (read-only
/// use) and one for the managed account.
pub struct Syncer {
    config: SyncConfig,
    reference: Arc<dyn ExchangeAdapter>,
    managed: Arc<dyn ExchangeAdapter>,
    events: EventBus,
    running: AtomicBool,
    wake: Notify,
    shared_stats: RwLock<SyncStats>,
}

impl Syncer {
    pub fn new(
        config: SyncConfig,
        reference: Arc<dyn ExchangeAdapter>,
        managed: Arc<dyn ExchangeAdapter>,
    ) -> Self {
        Self {
            config,
            reference,
            managed,
            events: EventBus::new(),
            running: AtomicBool::new(false),
            wake: Notify::new(),
            shared_stats: RwLock::new(SyncStats::default()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Latest stats snapshot.
    pub async fn stats(&self) -> SyncStats {
        self.shared_stats.read().await.clone()
    }

    /// Signal the loop to exit at the next safe point. The in-flight action
    /// completes; nothing new starts.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake.notify_one();
    }

    /// Run one cycle immediately without resetting or doubling the timer.
    pub fn force_sync_now(&self) {
        self.wake.notify_one();
    }

    /// The session: one cycle immediately, then one per interval, until
    /// `stop()`. Calling this while already running is a no-op.
    pub async fn run(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("sync loop already running; ignoring start");
            return;
        }

        info!(
            reference = %self.config.reference_account,
            budget = %self.config.budget,
            interval_ms = self.config.sync_interval_ms,
            dry_run = self.config.dry_run,
            "starting sync loop"
        );

        let mut state = SyncerState::new();
        let interval = Duration::from_millis(self.config.sync_interval_ms);

        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.run_cycle(&mut state).await {
                state.stats.errors += 1;
                warn!(error = %e, "sync cycle aborted");
            }
            *self.shared_stats.write().await = state.stats.clone();

            if !self.running.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = self.wake.notified() => {}
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("sync loop stopped");
    }

    async fn run_cycle(&self, state: &mut SyncerState) -> Result<(), SyncError> {
        debug!("sync cycle start");

        let reference = self.reference.fetch_positions().await?;
        let managed = self.managed.fetch_positions().await?;
        let balance = self.managed.fetch_balance().await?;

        self.log_changes(state, &reference, &managed);

        let scaling_opts = ScalingOptions {
            safety_buffer: self.config.safety_buffer,
            default_leverage: self.config.default_leverage,
            size_decimals: self.config.size_decimals,
        };
        let outcome = scale_to_budget(&reference, self.config.budget, &scaling_opts)?;
        for warning in &outcome.warnings {
            warn!(warning = %warning, "scaling");
        }
        if outcome.scaling_factor != state.scaling_factor {
            info!(
                from = %state.scaling_factor,
                to = %outcome.scaling_factor,
                "scaling factor updated"
            );
        }
        state.scaling_factor = outcome.scaling_factor;

        let diff_opts = DiffOptions {
            size_threshold_pct: self.config.size_threshold_pct,
            min_position_value: self.config.min_position_value,
        };
        let changes = diff_positions(&outcome.positions, &managed, &diff_opts);

        if changes.is_empty() {
            debug!("portfolios already in sync");
        } else {
            info!(
                add = changes.to_add.len(),
                remove = changes.to_remove.len(),
                adjust = changes.to_adjust.len(),
                flip = changes.to_flip.len(),
                factor = %outcome.scaling_factor,
                "executing action plan"
            );
        }

        let mut free_margin = balance.free;
        self.execute_plan(state, &changes, &mut free_margin).await;

        state.stats.syncs_completed += 1;
        state.stats.last_sync_time = Some(Utc::now());
        state.last_reference = key_by_symbol(&reference);
        state.last_managed = key_by_symbol(&managed);

        self.events.publish(SyncEvent::CycleCompleted {
            reference_positions: reference,
            managed_positions: managed,
            target_positions: outcome.positions,
            changes,
            stats: state.stats.clone(),
        });

        Ok(())
    }

    /// Removes run first so their freed margin is available before any open;
    /// flips sit between removes and adds so every close leg lands before the
    /// open legs start competing for margin.
    async fn execute_plan(
        &self,
        state: &mut SyncerState,
        changes: &PositionDiff,
        free_margin: &mut Decimal,
    ) {
        for pos in &changes.to_remove {
            if !self.is_running() {
                return;
            }
            match self.close(pos).await {
                Ok(ack) => {
                    state.stats.positions_removed += 1;
                    *free_margin += pos.required_margin();
                    self.events.publish(SyncEvent::ActionExecuted {
                        kind: ActionKind::Remove,
                        symbol: pos.symbol.clone(),
                        size: pos.size,
                        dry_run: self.config.dry_run,
                        external_id: Some(ack.external_id),
                    });
                }
                Err(e) => {
                    state.stats.errors += 1;
                    warn!(symbol = %pos.symbol, action = "remove", error = %e, "action failed");
                }
            }
            self.pace().await;
        }

        for flip in &changes.to_flip {
            if !self.is_running() {
                return;
            }
            self.execute_flip(state, flip, free_margin).await;
            self.pace().await;
        }

        for pos in &changes.to_add {
            if !self.is_running() {
                return;
            }
            match self.open(pos, free_margin).await {
                Ok(Some(ack)) => {
                    state.stats.positions_added += 1;
                    self.events.publish(SyncEvent::ActionExecuted {
                        kind: ActionKind::Add,
                        symbol: pos.symbol.clone(),
                        size: pos.size,
                        dry_run: self.config.dry_run,
                        external_id: Some(ack.external_id),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    state.stats.errors += 1;
                    warn!(symbol = %pos.symbol, action = "add", error = %e, "action failed");
                }
            }
            self.pace().await;
        }

        for adj in &changes.to_adjust {
            if !self.is_running() {
                return;
            }
            self.execute_adjust(state, adj, free_margin).await;
            self.pace().await;
        }
    }

    /// Close-then-open; there is no in-place side change.
    async fn execute_flip(&self, state: &mut SyncerState, flip: &SideFlip, free_margin: &mut Decimal) {
        match self.close(&flip.current).await {
            Ok(_) => {
                state.stats.positions_removed += 1;
                *free_margin += flip.current.required_margin();
            }
            Err(e) => {
                state.stats.errors += 1;
                warn!(symbol = %flip.symbol, action = "flip", error = %e, "close leg failed");
                return;
            }
        }
        match self.open(&flip.target, free_margin).await {
            Ok(Some(ack)) => {
                state.stats.positions_added += 1;
                self.events.publish(SyncEvent::ActionExecuted {
                    kind: ActionKind::Flip,
                    symbol: flip.symbol.clone(),
                    size: flip.target.size,
                    dry_run: self.config.dry_run,
                    external_id: Some(ack.external_id),
                });
            }
            Ok(None) => {}
            Err(e) => {
                state.stats.errors += 1;
                warn!(symbol = %flip.symbol, action = "flip", error = %e, "open leg failed");
            }
        }
    }

    /// Close-then-reopen at the target size; the adapters in scope do not
    /// resize in place. A failed reopen leaves the symbol flat for one
    /// interval; the next diff re-adds it.
    async fn execute_adjust(
        &self,
        state: &mut SyncerState,
        adj: &SizeAdjustment,
        free_margin: &mut Decimal,
    ) {
        match self.close(&adj.current).await {
            Ok(_) => {
                *free_margin += adj.current.required_margin();
            }
            Err(e) => {
                state.stats.errors += 1;
                warn!(symbol = %adj.symbol, action = "adjust", error = %e, "close leg failed");
                return;
            }
        }
        match self.open(&adj.target, free_margin).await {
            Ok(Some(ack)) => {
                state.stats.positions_adjusted += 1;
                self.events.publish(SyncEvent::ActionExecuted {
                    kind: ActionKind::Adjust,
                    symbol: adj.symbol.clone(),
                    size: adj.target_size,
                    dry_run: self.config.dry_run,
                    external_id: Some(ack.external_id),
                });
            }
            Ok(None) => {}
            Err(e) => {
                state.stats.errors += 1;
                warn!(symbol = %adj.symbol, action = "adjust", error = %e, "open leg failed");
            }
        }
    }

    /// Close via the adapter, or synthesize the result in dry-run.
    async fn close(&self, pos: &Position) -> Result<OrderAck, SyncError> {
        if self.config.dry_run {
            info!(symbol = %pos.symbol, size = %pos.size, "[dry-run] would close position");
            return Ok(OrderAck {
                external_id: DRY_RUN_ID.to_string(),
                status: OrderState::Closed,
            });
        }

        let id = pos.external_id.as_deref().ok_or_else(|| {
            SyncError::InvalidInput(format!("{} has no external id to close", pos.symbol))
        })?;
        let ack = self.managed.close_position(id).await?;
        info!(symbol = %pos.symbol, external_id = %ack.external_id, "closed position");
        Ok(ack)
    }

    /// Clamp against the remaining free margin, then open via the adapter.
    /// `Ok(None)` means the action was skipped: exhausted margin or a size
    /// below the venue minimum.
    async fn open(
        &self,
        pos: &Position,
        free_margin: &mut Decimal,
    ) -> Result<Option<OrderAck>, SyncError> {
        let trade = IncomingTrade {
            amount: pos.size,
            price: pos.entry_price,
            leverage: pos.leverage,
        };
        // The global factor is already baked into the target; only the local
        // margin clamp applies here.
        let scaling = scale_trade(
            &trade,
            Decimal::ONE,
            (*free_margin).max(Decimal::ZERO),
            self.config.safety_buffer,
        )?;

        if scaling.was_adjusted {
            warn!(
                symbol = %pos.symbol,
                requested = %scaling.scaled_amount,
                clamped = %scaling.final_amount,
                factor = %scaling.adjustment_factor,
                margin_required = %scaling.margin_required,
                margin_available = %scaling.margin_available,
                "free margin clamps order size"
            );
        }

        let size = scaling.final_amount;
        if size.is_zero() || size < self.config.min_position_size {
            warn!(
                symbol = %pos.symbol,
                size = %size,
                "insufficient capital, skipping open"
            );
            return Ok(None);
        }

        let margin = size * pos.entry_price / pos.leverage;
        let ack = if self.config.dry_run {
            info!(
                symbol = %pos.symbol,
                side = %pos.side.as_str(),
                size = %size,
                margin = %margin,
                "[dry-run] would open position"
            );
            OrderAck {
                external_id: DRY_RUN_ID.to_string(),
                status: OrderState::Open,
            }
        } else {
            let req = OpenRequest {
                symbol: pos.symbol.clone(),
                side: pos.side,
                margin_amount: margin,
                size,
                leverage: pos.leverage,
            };
            let ack = self.managed.open_position(&req).await?;
            info!(
                symbol = %pos.symbol,
                external_id = %ack.external_id,
                status = ?ack.status,
                "opened position"
            );
            ack
        };

        *free_margin -= margin;
        Ok(Some(ack))
    }

    /// Fixed delay between actions to respect venue rate limits.
    async fn pace(&self) {
        if self.config.action_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.action_delay_ms)).await;
        }
    }

    /// Change-detection logging only; decisions always use the fresh poll.
    fn log_changes(&self, state: &SyncerState, reference: &[Position], managed: &[Position]) {
        let first_cycle = state.stats.syncs_completed == 0;
        for pos in reference {
            match state.last_reference.get(&pos.symbol) {
                None if !first_cycle => {
                    info!(
                        symbol = %pos.symbol,
                        side = %pos.side.as_str(),
                        size = %pos.size,
                        "reference opened position"
                    );
                }
                Some(prev) if prev.size != pos.size => {
                    info!(
                        symbol = %pos.symbol,
                        from = %prev.size,
                        to = %pos.size,
                        "reference resized position"
                    );
                }
                _ => {}
            }
        }
        for symbol in state.last_reference.keys() {
            if !reference.iter().any(|p| &p.symbol == symbol) {
                info!(symbol = %symbol, "reference closed position");
            }
        }
        for pos in managed {
            if let Some(prev) = state.last_managed.get(&pos.symbol) {
                if prev.size != pos.size {
                    debug!(
                        symbol = %pos.symbol,
                        from = %prev.size,
                        to = %pos.size,
                        "managed position drifted"
                    );
                }
            }
        }
    }
}

fn key_by_symbol(positions: &[Position]) -> HashMap<String, Position> {
    positions
        .iter()
        .map(|p| (p.symbol.clone(), p.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::Balance;
    use crate::error::AdapterError;
    use crate::models::Side;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;

    struct MockAdapter {
        positions: Mutex<Vec<Position>>,
        balance: Balance,
        fail_fetch: bool,
        calls: Mutex<Vec<String>>,
    }

    impl MockAdapter {
        fn new(positions: Vec<Position>, free: Decimal) -> Arc<Self> {
            Arc::new(Self {
                positions: Mutex::new(positions),
                balance: Balance {
                    total: free,
                    free,
                    used: Decimal::ZERO,
                },
                fail_fetch: false,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                positions: Mutex::new(Vec::new()),
                balance: Balance::default(),
                fail_fetch: true,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ExchangeAdapter for MockAdapter {
        fn name(&self) -> &str {
            "mock"
        }

        async fn fetch_positions(&self) -> Result<Vec<Position>, AdapterError> {
            if self.fail_fetch {
                return Err(AdapterError::Decode("fetch failed".to_string()));
            }
            Ok(self.positions.lock().unwrap().clone())
        }

        async fn fetch_balance(&self) -> Result<Balance, AdapterError> {
            Ok(self.balance)
        }

        async fn open_position(&self, req: &OpenRequest) -> Result<OrderAck, AdapterError> {
            self.calls.lock().unwrap().push(format!("open:{}", req.symbol));
            Ok(OrderAck {
                external_id: format!("m-{}", req.symbol),
                status: OrderState::Open,
            })
        }

        async fn close_position(&self, external_id: &str) -> Result<OrderAck, AdapterError> {
            self.calls.lock().unwrap().push(format!("close:{external_id}"));
            Ok(OrderAck {
                external_id: external_id.to_string(),
                status: OrderState::Closed,
            })
        }
    }

    fn test_config() -> SyncConfig {
        SyncConfig {
            reference_account: "ref-1".to_string(),
            budget: dec!(100000),
            sync_interval_ms: 5,
            action_delay_ms: 0,
            dry_run: false,
            ..SyncConfig::default()
        }
    }

    fn with_id(mut pos: Position, id: &str) -> Position {
        pos.external_id = Some(id.to_string());
        pos
    }

    #[tokio::test]
    async fn test_dry_run_cycle_touches_no_orders() {
        let reference = MockAdapter::new(
            vec![Position::new("BTC", Side::Long, dec!(0.1), dec!(50000), dec!(10))],
            dec!(100000),
        );
        let managed = MockAdapter::new(vec![], dec!(100000));

        let config = SyncConfig {
            dry_run: true,
            ..test_config()
        };
        let syncer = Syncer::new(config, reference.clone(), managed.clone());
        syncer.running.store(true, Ordering::SeqCst);

        let mut state = SyncerState::new();
        syncer.run_cycle(&mut state).await.unwrap();

        assert!(managed.calls().is_empty());
        assert_eq!(state.stats.syncs_completed, 1);
        assert_eq!(state.stats.positions_added, 1);
        assert_eq!(state.stats.errors, 0);
    }

    #[tokio::test]
    async fn test_actions_run_removes_then_flips_then_adds() {
        let reference = MockAdapter::new(
            vec![
                Position::new("ETH", Side::Long, dec!(2), dec!(3000), dec!(10)),
                Position::new("BTC", Side::Long, dec!(0.1), dec!(50000), dec!(10)),
            ],
            dec!(100000),
        );
        let managed = MockAdapter::new(
            vec![
                with_id(
                    Position::new("XRP", Side::Long, dec!(1000), dec!(0.5), dec!(10)),
                    "x1",
                ),
                with_id(
                    Position::new("ETH", Side::Short, dec!(2), dec!(3000), dec!(10)),
                    "e1",
                ),
            ],
            dec!(100000),
        );

        let syncer = Syncer::new(test_config(), reference.clone(), managed.clone());
        // run loop must be live for actions to execute
        syncer.running.store(true, Ordering::SeqCst);

        let mut state = SyncerState::new();
        syncer.run_cycle(&mut state).await.unwrap();

        assert_eq!(
            managed.calls(),
            vec!["close:x1", "close:e1", "open:ETH", "open:BTC"]
        );
        assert_eq!(state.stats.positions_removed, 2); // orphan + flip close leg
        assert_eq!(state.stats.positions_added, 2); // flip open leg + new BTC
        assert_eq!(state.stats.errors, 0);
    }

    #[tokio::test]
    async fn test_adjust_closes_then_reopens_at_target_size() {
        let reference = MockAdapter::new(
            vec![Position::new("SOL", Side::Long, dec!(10), dec!(150), dec!(10))],
            dec!(100000),
        );
        let managed = MockAdapter::new(
            vec![with_id(
                Position::new("SOL", Side::Long, dec!(4), dec!(150), dec!(10)),
                "s1",
            )],
            dec!(100000),
        );

        let syncer = Syncer::new(test_config(), reference.clone(), managed.clone());
        syncer.running.store(true, Ordering::SeqCst);

        let mut state = SyncerState::new();
        syncer.run_cycle(&mut state).await.unwrap();

        assert_eq!(managed.calls(), vec!["close:s1", "open:SOL"]);
        assert_eq!(state.stats.positions_adjusted, 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_aborts_cycle_only() {
        let reference = MockAdapter::failing();
        let managed = MockAdapter::new(vec![], dec!(100000));

        let syncer = Syncer::new(test_config(), reference, managed.clone());

        let mut state = SyncerState::new();
        let result = syncer.run_cycle(&mut state).await;

        assert!(matches!(result, Err(SyncError::Adapter(_))));
        assert!(managed.calls().is_empty());
        assert_eq!(state.stats.syncs_completed, 0);
    }

    #[tokio::test]
    async fn test_exhausted_margin_skips_open_with_warning() {
        let reference = MockAdapter::new(
            vec![Position::new("BTC", Side::Long, dec!(0.1), dec!(50000), dec!(10))],
            dec!(100000),
        );
        // Plenty of budget but no free margin on the managed account
        let managed = MockAdapter::new(vec![], dec!(0));

        let syncer = Syncer::new(test_config(), reference, managed.clone());
        syncer.running.store(true, Ordering::SeqCst);

        let mut state = SyncerState::new();
        syncer.run_cycle(&mut state).await.unwrap();

        assert!(managed.calls().is_empty());
        assert_eq!(state.stats.positions_added, 0);
        // A skip is a warning, not an error
        assert_eq!(state.stats.errors, 0);
        assert_eq!(state.stats.syncs_completed, 1);
    }

    #[tokio::test]
    async fn test_cycle_publishes_snapshot_event() {
        let reference = MockAdapter::new(
            vec![Position::new("BTC", Side::Long, dec!(0.1), dec!(50000), dec!(10))],
            dec!(100000),
        );
        let managed = MockAdapter::new(vec![], dec!(100000));

        let config = SyncConfig {
            dry_run: true,
            ..test_config()
        };
        let syncer = Syncer::new(config, reference, managed);
        syncer.running.store(true, Ordering::SeqCst);
        let mut rx = syncer.subscribe();

        let mut state = SyncerState::new();
        syncer.run_cycle(&mut state).await.unwrap();

        let mut saw_action = false;
        let mut saw_cycle = false;
        while let Ok(event) = rx.try_recv() {
            match event {
                SyncEvent::ActionExecuted { kind, dry_run, .. } => {
                    assert_eq!(kind, ActionKind::Add);
                    assert!(dry_run);
                    saw_action = true;
                }
                SyncEvent::CycleCompleted {
                    reference_positions,
                    target_positions,
                    changes,
                    stats,
                    ..
                } => {
                    assert_eq!(reference_positions.len(), 1);
                    assert_eq!(target_positions.len(), 1);
                    assert_eq!(changes.to_add.len(), 1);
                    assert_eq!(stats.syncs_completed, 1);
                    saw_cycle = true;
                }
            }
        }
        assert!(saw_action);
        assert!(saw_cycle);
    }

    #[tokio::test]
    async fn test_run_and_stop_lifecycle() {
        let reference = MockAdapter::new(vec![], dec!(1000));
        let managed = MockAdapter::new(vec![], dec!(1000));

        let config = SyncConfig {
            dry_run: true,
            ..test_config()
        };
        let syncer = Arc::new(Syncer::new(config, reference, managed));

        let runner = syncer.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(syncer.is_running());

        // A second start while running is a no-op
        syncer.run().await;
        assert!(syncer.is_running());

        syncer.stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should exit after stop")
            .unwrap();

        assert!(!syncer.is_running());
        let stats = syncer.stats().await;
        assert!(stats.syncs_completed >= 1);
    }

    #[tokio::test]
    async fn test_force_sync_runs_ahead_of_the_timer() {
        let reference = MockAdapter::new(vec![], dec!(1000));
        let managed = MockAdapter::new(vec![], dec!(1000));

        let config = SyncConfig {
            dry_run: true,
            sync_interval_ms: 60_000,
            ..test_config()
        };
        let syncer = Arc::new(Syncer::new(config, reference, managed));

        let runner = syncer.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        wait_for_syncs(&syncer, 1).await;

        // The timer is a minute out; only the manual trigger gets us here
        syncer.force_sync_now();
        wait_for_syncs(&syncer, 2).await;

        syncer.stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop should exit after stop")
            .unwrap();
    }

    async fn wait_for_syncs(syncer: &Arc<Syncer>, count: u64) {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if syncer.stats().await.syncs_completed >= count {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("expected {count} completed syncs"));
    }
}

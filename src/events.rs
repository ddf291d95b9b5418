//! Observer channel: cycle and action events fan out to any number of
//! subscribers without ever blocking the sync loop.

use rust_decimal::Decimal;
use tokio::sync::broadcast;

use crate::engine::PositionDiff;
use crate::models::Position;
use crate::syncer::SyncStats;

const CHANNEL_CAPACITY: usize = 256;

/// Kind of executed action, for progress display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Add,
    Remove,
    Adjust,
    Flip,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Add => "add",
            ActionKind::Remove => "remove",
            ActionKind::Adjust => "adjust",
            ActionKind::Flip => "flip",
        }
    }
}

/// Event published by the orchestrator.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// One completed cycle with the full before/after snapshot.
    CycleCompleted {
        reference_positions: Vec<Position>,
        managed_positions: Vec<Position>,
        target_positions: Vec<Position>,
        changes: PositionDiff,
        stats: SyncStats,
    },

    /// One executed (or simulated) action, for progress display.
    ActionExecuted {
        kind: ActionKind,
        symbol: String,
        size: Decimal,
        dry_run: bool,
        external_id: Option<String>,
    },
}

/// Bounded fan-out bus. Subscribers that fall behind lag and lose events;
/// the sender never waits.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Fire-and-forget publish; an error only means nobody is listening.
    pub fn publish(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let bus = EventBus::new();
        bus.publish(SyncEvent::ActionExecuted {
            kind: ActionKind::Add,
            symbol: "BTC".to_string(),
            size: dec!(1),
            dry_run: true,
            external_id: None,
        });
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(SyncEvent::ActionExecuted {
            kind: ActionKind::Remove,
            symbol: "ETH".to_string(),
            size: dec!(2),
            dry_run: false,
            external_id: Some("o-1".to_string()),
        });

        match rx.recv().await.unwrap() {
            SyncEvent::ActionExecuted { kind, symbol, .. } => {
                assert_eq!(kind, ActionKind::Remove);
                assert_eq!(symbol, "ETH");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}

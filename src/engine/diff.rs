//! Diff engine: turns desired vs. actual position state into action lists.

use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::warn;

use crate::models::Position;

/// Options for a diff pass.
#[derive(Debug, Clone)]
pub struct DiffOptions {
    /// Fraction of target size the managed size may drift before adjusting
    pub size_threshold_pct: Decimal,

    /// Notional floor: smaller targets are dropped, smaller actuals left alone
    pub min_position_value: Decimal,
}

impl Default for DiffOptions {
    fn default() -> Self {
        Self {
            size_threshold_pct: dec!(0.05),
            min_position_value: dec!(200),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdjustDirection {
    Increase,
    Decrease,
}

/// A same-side position whose size drifted beyond the threshold.
#[derive(Debug, Clone, Serialize)]
pub struct SizeAdjustment {
    /// Normalized symbol the match was made on
    pub symbol: String,
    pub current_size: Decimal,
    pub target_size: Decimal,
    pub difference: Decimal,
    pub direction: AdjustDirection,
    pub current: Position,
    pub target: Position,
}

/// An opposite-side position: closed and reopened, never flipped in place.
#[derive(Debug, Clone, Serialize)]
pub struct SideFlip {
    pub symbol: String,
    pub current: Position,
    pub target: Position,
}

/// Disjoint action lists; a symbol appears in at most one.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PositionDiff {
    pub to_add: Vec<Position>,
    pub to_remove: Vec<Position>,
    pub to_adjust: Vec<SizeAdjustment>,
    pub to_flip: Vec<SideFlip>,
}

impl PositionDiff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty()
            && self.to_remove.is_empty()
            && self.to_adjust.is_empty()
            && self.to_flip.is_empty()
    }

    pub fn action_count(&self) -> usize {
        self.to_add.len() + self.to_remove.len() + self.to_adjust.len() + self.to_flip.len()
    }
}

/// Canonicalize an instrument symbol across venue naming conventions.
///
/// `BTC/USD:USD`, `BTC-USD` and `btc/usdt` all normalize to `BTC`.
pub fn normalize_symbol(symbol: &str) -> String {
    let upper = symbol.trim().to_uppercase();
    let base = upper
        .split(['/', '-', ':'])
        .next()
        .unwrap_or("")
        .to_string();
    if base.is_empty() {
        upper
    } else {
        base
    }
}

/// Compute the actions that converge `actual` toward `target`.
///
/// Matching is purely by normalized symbol. Targets below the notional floor
/// are not worth their fees and are dropped; actuals below it are left alone,
/// since closing dust costs more than the margin it frees. Duplicate
/// normalized symbols keep the first occurrence.
pub fn diff_positions(
    target: &[Position],
    actual: &[Position],
    opts: &DiffOptions,
) -> PositionDiff {
    let mut diff = PositionDiff::default();

    let mut desired: HashMap<String, &Position> = HashMap::new();
    let mut desired_order: Vec<String> = Vec::new();
    for pos in target {
        if pos.market_value() < opts.min_position_value {
            continue;
        }
        let key = normalize_symbol(&pos.symbol);
        if desired.contains_key(&key) {
            warn!(
                symbol = %pos.symbol,
                normalized = %key,
                "duplicate target symbol after normalization; keeping first"
            );
            continue;
        }
        desired_order.push(key.clone());
        desired.insert(key, pos);
    }

    let mut held: HashMap<String, &Position> = HashMap::new();
    for pos in actual {
        let key = normalize_symbol(&pos.symbol);
        if held.contains_key(&key) {
            warn!(
                symbol = %pos.symbol,
                normalized = %key,
                "duplicate actual symbol after normalization; keeping first"
            );
            continue;
        }
        held.insert(key, pos);
    }

    for key in &desired_order {
        let want = desired[key];
        match held.get(key) {
            None => diff.to_add.push(want.clone()),
            Some(have) => {
                if have.side != want.side {
                    diff.to_flip.push(SideFlip {
                        symbol: key.clone(),
                        current: (*have).clone(),
                        target: want.clone(),
                    });
                    continue;
                }
                let threshold = want.size * opts.size_threshold_pct;
                let drift = (have.size - want.size).abs();
                if drift > threshold {
                    let direction = if want.size > have.size {
                        AdjustDirection::Increase
                    } else {
                        AdjustDirection::Decrease
                    };
                    diff.to_adjust.push(SizeAdjustment {
                        symbol: key.clone(),
                        current_size: have.size,
                        target_size: want.size,
                        difference: drift,
                        direction,
                        current: (*have).clone(),
                        target: want.clone(),
                    });
                }
            }
        }
    }

    let mut removed: HashSet<String> = HashSet::new();
    for pos in actual {
        let key = normalize_symbol(&pos.symbol);
        if desired.contains_key(&key) || removed.contains(&key) {
            continue;
        }
        if pos.market_value() < opts.min_position_value {
            continue;
        }
        removed.insert(key);
        diff.to_remove.push(pos.clone());
    }

    diff
}

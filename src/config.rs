//! Session configuration.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Configuration consumed at session start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Identifier of the reference account being mirrored
    pub reference_account: String,

    /// Capital earmarked for copying, in quote currency
    pub budget: Decimal,

    /// Milliseconds between sync cycles
    pub sync_interval_ms: u64,

    /// Relative size drift that triggers an adjustment (fraction of target size)
    pub size_threshold_pct: Decimal,

    /// Notional floor below which positions are neither opened nor closed
    pub min_position_value: Decimal,

    /// Smallest order size worth submitting
    pub min_position_size: Decimal,

    /// Fraction of capital the engine is willing to commit
    pub safety_buffer: Decimal,

    /// Leverage assumed when the venue does not report one
    pub default_leverage: Decimal,

    /// Milliseconds between successive actions within a cycle
    pub action_delay_ms: u64,

    /// Venue size precision, when published; overrides per-position precision
    pub size_decimals: Option<u32>,

    /// Log intended actions instead of submitting them
    pub dry_run: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reference_account: String::new(),
            budget: dec!(1000),
            sync_interval_ms: 30_000,
            size_threshold_pct: dec!(0.05),
            min_position_value: dec!(200),
            min_position_size: dec!(0.0001),
            safety_buffer: dec!(0.8),
            default_leverage: dec!(10),
            action_delay_ms: 500,
            size_decimals: None,
            dry_run: true,
        }
    }
}

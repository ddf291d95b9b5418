//! Reconciliation engine: scaling, margin clamping, position diffing.
//!
//! Everything in here is pure: the functions fail only on structurally
//! invalid input and otherwise degrade through warnings, leaving all I/O and
//! failure tolerance to the orchestrator.

mod diff;
mod scaling;
mod trade_scaler;

pub use diff::{
    diff_positions, normalize_symbol, AdjustDirection, DiffOptions, PositionDiff, SideFlip,
    SizeAdjustment,
};
pub use scaling::{scale_to_budget, ScalingOptions, ScalingOutcome};
pub use trade_scaler::{scale_trade, IncomingTrade, TradeScaling};

//! Scaling calculator: fits a reference position set into a capital budget.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;

use crate::error::SyncError;
use crate::models::Position;

/// Options for a scaling pass.
#[derive(Debug, Clone)]
pub struct ScalingOptions {
    /// Fraction of the budget scaling aims for, leaving headroom against
    /// price movement before the next cycle
    pub safety_buffer: Decimal,

    /// Leverage assumed for positions the venue reports without one
    pub default_leverage: Decimal,

    /// Venue size precision, when published; overrides the per-position
    /// precision heuristic
    pub size_decimals: Option<u32>,
}

impl Default for ScalingOptions {
    fn default() -> Self {
        Self {
            safety_buffer: dec!(0.8),
            default_leverage: dec!(10),
            size_decimals: None,
        }
    }
}

/// Result of fitting a reference position set into a budget.
#[derive(Debug, Clone)]
pub struct ScalingOutcome {
    /// Target positions, scaled when the reference margin exceeds the budget
    pub positions: Vec<Position>,

    /// 1 when no scaling occurred, otherwise `(budget * buffer) / required`
    pub scaling_factor: Decimal,

    /// Margin required to hold the scaled set
    pub total_estimated_cost: Decimal,

    /// Notional value of the scaled set
    pub total_market_value: Decimal,

    pub original_total_cost: Decimal,
    pub original_total_value: Decimal,

    pub warnings: Vec<String>,
}

/// Round `value` to `scale` decimal places, away from zero at the midpoint.
pub(crate) fn round_to_scale(value: Decimal, scale: u32) -> Decimal {
    value.round_dp_with_strategy(scale, RoundingStrategy::MidpointAwayFromZero)
}

/// Fit `positions` into `budget`.
///
/// Position sets whose required margin already fits are returned untouched
/// with a factor of 1. Otherwise every size is multiplied by
/// `(budget * safety_buffer) / total_required` and rounded back to the
/// precision of its source size. Copying the source's own precision is a safe
/// proxy for the venue step size when no `size_decimals` metadata is
/// available; venues reject orders that are finer than their step size.
pub fn scale_to_budget(
    positions: &[Position],
    budget: Decimal,
    opts: &ScalingOptions,
) -> Result<ScalingOutcome, SyncError> {
    if budget <= Decimal::ZERO {
        return Err(SyncError::InvalidInput(format!(
            "budget must be positive, got {budget}"
        )));
    }

    let mut warnings = Vec::new();
    let mut usable = Vec::with_capacity(positions.len());

    for pos in positions {
        if pos.size <= Decimal::ZERO || pos.entry_price <= Decimal::ZERO {
            warnings.push(format!(
                "skipping {}: non-positive size or price (size={}, price={})",
                pos.symbol, pos.size, pos.entry_price
            ));
            continue;
        }
        let mut pos = pos.clone();
        if pos.leverage < Decimal::ONE {
            pos.leverage = opts.default_leverage;
        }
        usable.push(pos);
    }

    let original_total_value: Decimal = usable.iter().map(|p| p.market_value()).sum();
    let original_total_cost: Decimal = usable.iter().map(|p| p.required_margin()).sum();

    if original_total_cost <= budget {
        if original_total_cost > budget * opts.safety_buffer {
            warnings.push(format!(
                "high utilization: required margin {original_total_cost} leaves less than \
                 {}% headroom on budget {budget}",
                (Decimal::ONE - opts.safety_buffer) * dec!(100)
            ));
        }
        return Ok(ScalingOutcome {
            positions: usable,
            scaling_factor: Decimal::ONE,
            total_estimated_cost: original_total_cost,
            total_market_value: original_total_value,
            original_total_cost,
            original_total_value,
            warnings,
        });
    }

    let factor = (budget * opts.safety_buffer) / original_total_cost;
    if factor <= Decimal::ZERO {
        return Err(SyncError::InsufficientCapital(format!(
            "scaling factor collapsed to {factor} for budget {budget}"
        )));
    }

    let (mut scaled, mut round_warnings) = apply_factor(
        &usable,
        factor,
        opts.size_decimals,
        RoundingStrategy::MidpointAwayFromZero,
    );
    let mut total_cost: Decimal = scaled.iter().map(|p| p.required_margin()).sum();

    // Midpoint rounding can nudge the summed cost past the budget itself;
    // the budget is a hard cap, so floor every size instead.
    if total_cost > budget {
        (scaled, round_warnings) =
            apply_factor(&usable, factor, opts.size_decimals, RoundingStrategy::ToZero);
        total_cost = scaled.iter().map(|p| p.required_margin()).sum();
    }
    warnings.extend(round_warnings);

    let total_market_value: Decimal = scaled.iter().map(|p| p.market_value()).sum();

    Ok(ScalingOutcome {
        positions: scaled,
        scaling_factor: factor,
        total_estimated_cost: total_cost,
        total_market_value,
        original_total_cost,
        original_total_value,
        warnings,
    })
}

/// Multiply every size by `factor`, rounding each back to its source
/// precision (or the venue's, when known). Sizes that round to zero are too
/// small to represent and are dropped.
fn apply_factor(
    positions: &[Position],
    factor: Decimal,
    size_decimals: Option<u32>,
    strategy: RoundingStrategy,
) -> (Vec<Position>, Vec<String>) {
    let mut scaled = Vec::with_capacity(positions.len());
    let mut warnings = Vec::new();

    for pos in positions {
        let scale = size_decimals.unwrap_or_else(|| pos.size.scale());
        let size = (pos.size * factor).round_dp_with_strategy(scale, strategy);
        if size.is_zero() {
            warnings.push(format!(
                "dropping {}: scaled size rounds to zero at {scale} decimals",
                pos.symbol
            ));
            continue;
        }
        scaled.push(pos.with_size(size));
    }

    (scaled, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Side;
    use rust_decimal_macros::dec;

    fn pos(symbol: &str, size: Decimal, price: Decimal, leverage: Decimal) -> Position {
        Position::new(symbol, Side::Long, size, price, leverage)
    }

    #[test]
    fn test_fitting_set_is_returned_untouched() {
        let input = vec![pos("BTC", dec!(0.50), dec!(50000), dec!(10))];

        let out = scale_to_budget(&input, dec!(10000), &ScalingOptions::default()).unwrap();

        assert_eq!(out.scaling_factor, Decimal::ONE);
        assert_eq!(out.positions, input);
        // Bit-identical, not merely numerically equal
        assert_eq!(out.positions[0].size.scale(), input[0].size.scale());
        assert_eq!(out.total_estimated_cost, dec!(2500));
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn test_scales_down_to_safety_target() {
        // required = 1.0 * 50000 / 10 = 5000, budget 1000
        let input = vec![pos("BTC", dec!(1.0), dec!(50000), dec!(10))];

        let out = scale_to_budget(&input, dec!(1000), &ScalingOptions::default()).unwrap();

        assert_eq!(out.scaling_factor, dec!(0.16));
        // Source size has one decimal, so 0.16 rounds to 0.2
        assert_eq!(out.positions[0].size, dec!(0.2));
        assert_eq!(out.positions[0].size.scale(), 1);
        assert!(out.total_estimated_cost <= dec!(1000));
        assert_eq!(out.original_total_cost, dec!(5000));
    }

    #[test]
    fn test_precision_follows_each_source_size() {
        let input = vec![
            pos("ETH", dec!(0.12), dec!(10000), dec!(10)),
            pos("DOGE", dec!(28000), dec!(1), dec!(10)),
        ];

        let out = scale_to_budget(&input, dec!(1000), &ScalingOptions::default()).unwrap();

        assert!(out.scaling_factor < Decimal::ONE);
        assert_eq!(out.positions[0].size.scale(), 2);
        assert_eq!(out.positions[1].size.scale(), 0);
        assert!(out.total_estimated_cost <= dec!(1000));
    }

    #[test]
    fn test_budget_invariant_holds_after_round_up() {
        // factor 0.56 rounds the first size back up to 1, which alone costs
        // the whole original margin; the pass must fall back to flooring.
        let input = vec![
            pos("AAA", dec!(1), dec!(1000), dec!(1)),
            pos("BBB", dec!(1.00), dec!(1000), dec!(1)),
        ];

        let out = scale_to_budget(&input, dec!(1400), &ScalingOptions::default()).unwrap();

        assert!(out.total_estimated_cost <= dec!(1400));
        assert_eq!(out.positions.len(), 1);
        assert_eq!(out.positions[0].symbol, "BBB");
        assert_eq!(out.positions[0].size, dec!(0.56));
    }

    #[test]
    fn test_high_utilization_warns_without_scaling() {
        let input = vec![pos("BTC", dec!(0.18), dec!(50000), dec!(10))]; // margin 900

        let out = scale_to_budget(&input, dec!(1000), &ScalingOptions::default()).unwrap();

        assert_eq!(out.scaling_factor, Decimal::ONE);
        assert_eq!(out.warnings.len(), 1);
        assert!(out.warnings[0].contains("high utilization"));
    }

    #[test]
    fn test_non_positive_budget_is_rejected() {
        let input = vec![pos("BTC", dec!(1), dec!(50000), dec!(10))];

        assert!(matches!(
            scale_to_budget(&input, dec!(0), &ScalingOptions::default()),
            Err(SyncError::InvalidInput(_))
        ));
        assert!(matches!(
            scale_to_budget(&input, dec!(-5), &ScalingOptions::default()),
            Err(SyncError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_malformed_position_is_skipped_with_warning() {
        let input = vec![
            pos("BTC", dec!(0), dec!(50000), dec!(10)),
            pos("ETH", dec!(1), dec!(3000), dec!(10)),
        ];

        let out = scale_to_budget(&input, dec!(10000), &ScalingOptions::default()).unwrap();

        assert_eq!(out.positions.len(), 1);
        assert_eq!(out.positions[0].symbol, "ETH");
        assert!(out.warnings[0].contains("skipping BTC"));
    }

    #[test]
    fn test_missing_leverage_falls_back_to_default() {
        let input = vec![pos("BTC", dec!(1), dec!(50000), dec!(0))];

        let out = scale_to_budget(&input, dec!(100000), &ScalingOptions::default()).unwrap();

        assert_eq!(out.positions[0].leverage, dec!(10));
        assert_eq!(out.total_estimated_cost, dec!(5000));
    }

    #[test]
    fn test_venue_decimals_override_drops_dust() {
        let opts = ScalingOptions {
            size_decimals: Some(0),
            ..ScalingOptions::default()
        };
        let input = vec![
            pos("AAA", dec!(10), dec!(100), dec!(1)),  // margin 1000
            pos("BBB", dec!(0.6), dec!(100), dec!(1)), // margin 60
        ];

        // factor = 400 / 1060; BBB scales to ~0.23 and rounds to zero
        let out = scale_to_budget(&input, dec!(500), &opts).unwrap();

        assert_eq!(out.positions.len(), 1);
        assert_eq!(out.positions[0].symbol, "AAA");
        assert!(out.warnings.iter().any(|w| w.contains("rounds to zero")));
        assert!(out.total_estimated_cost <= dec!(500));
    }

    #[test]
    fn test_empty_reference_set() {
        let out = scale_to_budget(&[], dec!(1000), &ScalingOptions::default()).unwrap();

        assert!(out.positions.is_empty());
        assert_eq!(out.scaling_factor, Decimal::ONE);
        assert_eq!(out.total_estimated_cost, Decimal::ZERO);
    }
}

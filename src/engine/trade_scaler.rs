//! Margin-aware trade scaler: clamps one trade against available capital.

use rust_decimal::Decimal;

use crate::error::SyncError;

use super::scaling::round_to_scale;

/// Finest precision used when the source precision would collapse a clamped
/// amount to zero.
const FALLBACK_SCALE: u32 = 8;

/// A single trade observed on the reference account.
#[derive(Debug, Clone, Copy)]
pub struct IncomingTrade {
    pub amount: Decimal,
    pub price: Decimal,
    pub leverage: Decimal,
}

/// Outcome of the two-stage scaling of one trade.
#[derive(Debug, Clone)]
pub struct TradeScaling {
    /// Amount after the global scaling factor
    pub scaled_amount: Decimal,

    /// Amount after the local margin clamp; what actually gets submitted
    pub final_amount: Decimal,

    pub margin_required: Decimal,
    pub margin_available: Decimal,

    /// True when the margin clamp shrank the trade below the copy ratio
    pub was_adjusted: bool,

    /// `margin_available / margin_required` when clamped, 1 otherwise
    pub adjustment_factor: Decimal,
}

/// Apply the sticky global factor, then clamp against free margin.
///
/// The two stages keep one oversized trade from corrupting the sticky factor
/// shared by every other position: the local clamp shrinks only this trade.
pub fn scale_trade(
    trade: &IncomingTrade,
    scaling_factor: Decimal,
    free_margin: Decimal,
    safety_buffer: Decimal,
) -> Result<TradeScaling, SyncError> {
    if trade.amount <= Decimal::ZERO || trade.price <= Decimal::ZERO || trade.leverage <= Decimal::ZERO
    {
        return Err(SyncError::InvalidInput(format!(
            "trade fields must be positive (amount={}, price={}, leverage={})",
            trade.amount, trade.price, trade.leverage
        )));
    }
    if free_margin < Decimal::ZERO {
        return Err(SyncError::InvalidInput(format!(
            "free margin cannot be negative, got {free_margin}"
        )));
    }
    if scaling_factor <= Decimal::ZERO || scaling_factor > Decimal::ONE {
        return Err(SyncError::InvalidInput(format!(
            "scaling factor must be in (0, 1], got {scaling_factor}"
        )));
    }
    if safety_buffer <= Decimal::ZERO || safety_buffer > Decimal::ONE {
        return Err(SyncError::InvalidInput(format!(
            "safety buffer must be in (0, 1], got {safety_buffer}"
        )));
    }

    let source_scale = trade.amount.scale();
    let scaled_amount = round_to_scale(trade.amount * scaling_factor, source_scale);

    let margin_required = scaled_amount * trade.price / trade.leverage;
    let margin_available = free_margin * safety_buffer;

    if margin_required <= margin_available {
        return Ok(TradeScaling {
            scaled_amount,
            final_amount: scaled_amount,
            margin_required,
            margin_available,
            was_adjusted: false,
            adjustment_factor: Decimal::ONE,
        });
    }

    let adjustment_factor = margin_available / margin_required;
    let clamped = scaled_amount * adjustment_factor;
    let mut final_amount = round_to_scale(clamped, source_scale);
    // A coarse source precision can round the clamped amount to nothing;
    // fall back to a finer scale and let the venue minimum decide downstream.
    if final_amount.is_zero() && !clamped.is_zero() {
        final_amount = round_to_scale(clamped, FALLBACK_SCALE);
    }

    Ok(TradeScaling {
        scaled_amount,
        final_amount,
        margin_required,
        margin_available,
        was_adjusted: true,
        adjustment_factor,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade(amount: Decimal, price: Decimal, leverage: Decimal) -> IncomingTrade {
        IncomingTrade {
            amount,
            price,
            leverage,
        }
    }

    #[test]
    fn test_trade_within_margin_passes_through() {
        let out = scale_trade(
            &trade(dec!(0.5), dec!(100), dec!(10)),
            Decimal::ONE,
            dec!(1000),
            dec!(0.8),
        )
        .unwrap();

        assert_eq!(out.scaled_amount, dec!(0.5));
        assert_eq!(out.final_amount, dec!(0.5));
        assert_eq!(out.margin_required, dec!(5));
        assert_eq!(out.margin_available, dec!(800));
        assert!(!out.was_adjusted);
        assert_eq!(out.adjustment_factor, Decimal::ONE);
    }

    #[test]
    fn test_margin_clamp_shrinks_oversized_trade() {
        // required = 1 * 50000 / 10 = 5000, available = 300 * 0.8 = 240
        let out = scale_trade(
            &trade(dec!(1), dec!(50000), dec!(10)),
            Decimal::ONE,
            dec!(300),
            dec!(0.8),
        )
        .unwrap();

        assert!(out.was_adjusted);
        assert_eq!(out.adjustment_factor, dec!(0.048));
        assert_eq!(out.final_amount, dec!(0.048));
        assert_eq!(out.margin_required, dec!(5000));
        assert_eq!(out.margin_available, dec!(240));
    }

    #[test]
    fn test_global_factor_preserves_source_precision() {
        let out = scale_trade(
            &trade(dec!(1.0), dec!(10), dec!(10)),
            dec!(0.16),
            dec!(1000),
            dec!(0.8),
        )
        .unwrap();

        assert_eq!(out.scaled_amount, dec!(0.2));
        assert_eq!(out.scaled_amount.scale(), 1);
    }

    #[test]
    fn test_clamp_keeps_precision_when_representable() {
        // scaled 100.0, required 1000, available 80 -> 8.0 at one decimal
        let out = scale_trade(
            &trade(dec!(100.0), dec!(10), dec!(1)),
            Decimal::ONE,
            dec!(100),
            dec!(0.8),
        )
        .unwrap();

        assert!(out.was_adjusted);
        assert_eq!(out.final_amount, dec!(8.0));
        assert_eq!(out.final_amount.scale(), 1);
    }

    #[test]
    fn test_exhausted_margin_clamps_to_zero() {
        let out = scale_trade(
            &trade(dec!(1.0), dec!(50000), dec!(10)),
            Decimal::ONE,
            dec!(0),
            dec!(0.8),
        )
        .unwrap();

        assert!(out.was_adjusted);
        assert_eq!(out.adjustment_factor, Decimal::ZERO);
        assert!(out.final_amount.is_zero());
    }

    #[test]
    fn test_invalid_inputs_are_rejected() {
        let good = trade(dec!(1), dec!(100), dec!(10));

        for bad in [
            scale_trade(&trade(dec!(0), dec!(100), dec!(10)), Decimal::ONE, dec!(100), dec!(0.8)),
            scale_trade(&trade(dec!(1), dec!(-1), dec!(10)), Decimal::ONE, dec!(100), dec!(0.8)),
            scale_trade(&trade(dec!(1), dec!(100), dec!(0)), Decimal::ONE, dec!(100), dec!(0.8)),
            scale_trade(&good, Decimal::ONE, dec!(-1), dec!(0.8)),
            scale_trade(&good, dec!(0), dec!(100), dec!(0.8)),
            scale_trade(&good, dec!(1.2), dec!(100), dec!(0.8)),
            scale_trade(&good, Decimal::ONE, dec!(100), dec!(0)),
            scale_trade(&good, Decimal::ONE, dec!(100), dec!(1.5)),
        ] {
            assert!(matches!(bad, Err(SyncError::InvalidInput(_))));
        }
    }
}

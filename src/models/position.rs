//! Position model: an immutable snapshot of one open position.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

/// One open position as reported by an exchange adapter.
///
/// Snapshots are never mutated; every poll produces a fresh set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Instrument symbol in the reporting venue's convention
    pub symbol: String,

    /// Position direction; `size` itself is sign-free
    pub side: Side,

    /// Size in base-asset units
    pub size: Decimal,

    /// Average entry price (quote per base)
    pub entry_price: Decimal,

    /// Leverage applied by the venue (>= 1)
    pub leverage: Decimal,

    /// Venue handle required to close this position.
    /// `None` on reference and computed target positions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
}

impl Position {
    pub fn new(
        symbol: impl Into<String>,
        side: Side,
        size: Decimal,
        entry_price: Decimal,
        leverage: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            size,
            entry_price,
            leverage,
            external_id: None,
        }
    }

    /// Notional value in quote currency.
    pub fn market_value(&self) -> Decimal {
        self.size * self.entry_price
    }

    /// Capital required to hold the position at its leverage.
    pub fn required_margin(&self) -> Decimal {
        let value = self.market_value();
        if self.leverage > Decimal::ZERO {
            value / self.leverage
        } else {
            value
        }
    }

    /// Copy of this position with a different size.
    pub fn with_size(&self, size: Decimal) -> Self {
        Self {
            size,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_derived_values() {
        let pos = Position::new("BTC", Side::Long, dec!(0.5), dec!(50000), dec!(10));

        assert_eq!(pos.market_value(), dec!(25000));
        assert_eq!(pos.required_margin(), dec!(2500));
    }

    #[test]
    fn test_with_size_keeps_identity() {
        let mut pos = Position::new("ETH", Side::Short, dec!(2), dec!(3000), dec!(5));
        pos.external_id = Some("p-17".to_string());

        let resized = pos.with_size(dec!(1.5));

        assert_eq!(resized.size, dec!(1.5));
        assert_eq!(resized.symbol, "ETH");
        assert_eq!(resized.side, Side::Short);
        assert_eq!(resized.external_id.as_deref(), Some("p-17"));
    }

    #[test]
    fn test_side_opposite() {
        assert_eq!(Side::Long.opposite(), Side::Short);
        assert_eq!(Side::Short.opposite(), Side::Long);
    }
}

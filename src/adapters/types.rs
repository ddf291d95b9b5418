//! Venue-neutral types shared by every exchange adapter.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::Side;

/// Account balance snapshot in quote currency.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Balance {
    pub total: Decimal,
    pub free: Decimal,
    pub used: Decimal,
}

/// Lifecycle state of a submitted order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderState {
    /// Accepted by the venue, not yet filled
    Pending,
    Open,
    Closed,
}

impl OrderState {
    pub fn parse(raw: &str) -> OrderState {
        match raw.to_uppercase().as_str() {
            "OPEN" | "FILLED" | "OK" => OrderState::Open,
            "CLOSED" => OrderState::Closed,
            _ => OrderState::Pending,
        }
    }
}

/// Acknowledgement returned for open and close operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderAck {
    pub external_id: String,
    pub status: OrderState,
}

/// Request to open a position on the managed account.
#[derive(Debug, Clone, Serialize)]
pub struct OpenRequest {
    pub symbol: String,
    pub side: Side,
    pub margin_amount: Decimal,
    pub size: Decimal,
    pub leverage: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_state_parsing() {
        assert_eq!(OrderState::parse("filled"), OrderState::Open);
        assert_eq!(OrderState::parse("CLOSED"), OrderState::Closed);
        assert_eq!(OrderState::parse("queued"), OrderState::Pending);
    }
}

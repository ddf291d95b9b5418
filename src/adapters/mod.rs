//! Exchange adapters: the capability boundary between the sync loop and a
//! venue. Two variants exist, selected at configuration time; the
//! orchestrator never probes an adapter for its concrete shape.

mod margin;
mod onchain;
mod types;

use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::AdapterError;
use crate::models::Position;

pub use margin::MarginAccountAdapter;
pub use onchain::OnchainPerpAdapter;
pub use types::{Balance, OpenRequest, OrderAck, OrderState};

/// Contract every venue integration satisfies.
#[async_trait]
pub trait ExchangeAdapter: Send + Sync {
    /// Venue name for logging.
    fn name(&self) -> &str;

    /// Open positions only; zero-size entries are the adapter's to filter.
    async fn fetch_positions(&self) -> Result<Vec<Position>, AdapterError>;

    async fn fetch_balance(&self) -> Result<Balance, AdapterError>;

    async fn open_position(&self, req: &OpenRequest) -> Result<OrderAck, AdapterError>;

    async fn close_position(&self, external_id: &str) -> Result<OrderAck, AdapterError>;
}

/// Which adapter variant a session runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum VenueKind {
    /// Margin-account REST venue
    Margin,
    /// On-chain perp venue behind a signing gateway
    Onchain,
}

/// Build the adapter for `kind` over `account`, reading credentials from the
/// environment.
pub fn build_adapter(
    kind: VenueKind,
    account: &str,
    default_leverage: Decimal,
) -> Result<Arc<dyn ExchangeAdapter>, AdapterError> {
    match kind {
        VenueKind::Margin => Ok(Arc::new(MarginAccountAdapter::from_env(
            account,
            default_leverage,
        )?)),
        VenueKind::Onchain => Ok(Arc::new(OnchainPerpAdapter::from_env(account)?)),
    }
}

//! Margin-account venue adapter: plain REST with API-key headers.

use std::time::Duration;

use async_trait::async_trait;
use backoff::ExponentialBackoff;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::AdapterError;
use crate::models::{Position, Side};

use super::types::{Balance, OpenRequest, OrderAck, OrderState};
use super::ExchangeAdapter;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const VENUE: &str = "margin";

/// REST adapter for a margin-account style venue.
pub struct MarginAccountAdapter {
    http: Client,
    base_url: String,
    api_key: String,
    account: String,
    default_leverage: Decimal,
}

/// Position row from `GET /api/v1/positions`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PositionDto {
    position_id: String,
    symbol: String,
    side: String,
    size: Decimal,
    entry_price: Decimal,
    #[serde(default)]
    leverage: Option<Decimal>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BalanceDto {
    total_margin: Decimal,
    free_margin: Decimal,
    used_margin: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderRequestDto<'a> {
    client_order_id: String,
    symbol: &'a str,
    side: &'a str,
    size: Decimal,
    margin: Decimal,
    leverage: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderDto {
    order_id: String,
    status: String,
}

impl MarginAccountAdapter {
    pub fn new(
        base_url: String,
        api_key: String,
        account: &str,
        default_leverage: Decimal,
    ) -> Result<Self, AdapterError> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(AdapterError::Http)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            account: account.to_string(),
            default_leverage,
        })
    }

    /// Create from environment variables:
    /// - MIRROR_MARGIN_URL
    /// - MIRROR_MARGIN_API_KEY
    pub fn from_env(account: &str, default_leverage: Decimal) -> Result<Self, AdapterError> {
        let base_url = std::env::var("MIRROR_MARGIN_URL")
            .map_err(|_| AdapterError::Credentials("MIRROR_MARGIN_URL not set".to_string()))?;
        let api_key = std::env::var("MIRROR_MARGIN_API_KEY")
            .map_err(|_| AdapterError::Credentials("MIRROR_MARGIN_API_KEY not set".to_string()))?;

        Self::new(base_url, api_key, account, default_leverage)
    }

    fn fetch_backoff() -> ExponentialBackoff {
        ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..ExponentialBackoff::default()
        }
    }

    /// GET with exponential backoff. Only idempotent reads retry; mutating
    /// calls never do, the next cycle re-attempts whatever is still off.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, AdapterError> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "fetching");

        backoff::future::retry(Self::fetch_backoff(), || async {
            let resp = self
                .http
                .get(&url)
                .header("X-API-KEY", self.api_key.as_str())
                .header("X-TIMESTAMP", Utc::now().timestamp_millis().to_string())
                .send()
                .await
                .map_err(|e| backoff::Error::transient(AdapterError::Http(e)))?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                let err = AdapterError::Api {
                    venue: VENUE.to_string(),
                    status: status.as_u16(),
                    body,
                };
                return Err(if status.is_server_error() {
                    backoff::Error::transient(err)
                } else {
                    backoff::Error::permanent(err)
                });
            }

            resp.json::<T>()
                .await
                .map_err(|e| backoff::Error::permanent(AdapterError::Decode(e.to_string())))
        })
        .await
    }

    async fn check(&self, resp: reqwest::Response) -> Result<reqwest::Response, AdapterError> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AdapterError::Api {
                venue: VENUE.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }
}

#[async_trait]
impl ExchangeAdapter for MarginAccountAdapter {
    fn name(&self) -> &str {
        VENUE
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>, AdapterError> {
        let path = format!("/api/v1/positions?account={}", self.account);
        let rows: Vec<PositionDto> = self.get_json(&path).await?;

        let positions = rows
            .into_iter()
            .filter_map(|row| {
                if row.size.is_zero() {
                    return None;
                }
                let side = match row.side.to_uppercase().as_str() {
                    "LONG" | "BUY" => Side::Long,
                    "SHORT" | "SELL" => Side::Short,
                    other => {
                        warn!(side = %other, symbol = %row.symbol, "unknown position side");
                        return None;
                    }
                };
                Some(Position {
                    symbol: row.symbol,
                    side,
                    size: row.size.abs(),
                    entry_price: row.entry_price,
                    leverage: row.leverage.unwrap_or(self.default_leverage),
                    external_id: Some(row.position_id),
                })
            })
            .collect();

        Ok(positions)
    }

    async fn fetch_balance(&self) -> Result<Balance, AdapterError> {
        let path = format!("/api/v1/balance?account={}", self.account);
        let dto: BalanceDto = self.get_json(&path).await?;

        Ok(Balance {
            total: dto.total_margin,
            free: dto.free_margin,
            used: dto.used_margin,
        })
    }

    async fn open_position(&self, req: &OpenRequest) -> Result<OrderAck, AdapterError> {
        let url = format!("{}/api/v1/orders", self.base_url);
        let body = OrderRequestDto {
            client_order_id: Uuid::new_v4().to_string(),
            symbol: &req.symbol,
            side: req.side.as_str(),
            size: req.size,
            margin: req.margin_amount,
            leverage: req.leverage,
        };

        debug!(symbol = %req.symbol, size = %req.size, "submitting open order");

        let resp = self
            .http
            .post(&url)
            .header("X-API-KEY", self.api_key.as_str())
            .header("X-TIMESTAMP", Utc::now().timestamp_millis().to_string())
            .json(&body)
            .send()
            .await
            .map_err(AdapterError::Http)?;
        let resp = self.check(resp).await?;

        let dto: OrderDto = resp
            .json()
            .await
            .map_err(|e| AdapterError::Decode(e.to_string()))?;

        Ok(OrderAck {
            external_id: dto.order_id,
            status: OrderState::parse(&dto.status),
        })
    }

    async fn close_position(&self, external_id: &str) -> Result<OrderAck, AdapterError> {
        let url = format!("{}/api/v1/positions/{}", self.base_url, external_id);

        debug!(external_id = %external_id, "closing position");

        let resp = self
            .http
            .delete(&url)
            .header("X-API-KEY", self.api_key.as_str())
            .header("X-TIMESTAMP", Utc::now().timestamp_millis().to_string())
            .send()
            .await
            .map_err(AdapterError::Http)?;
        self.check(resp).await?;

        Ok(OrderAck {
            external_id: external_id.to_string(),
            status: OrderState::Closed,
        })
    }
}

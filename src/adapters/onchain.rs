//! On-chain perp venue adapter: signs order payloads with a local key and
//! submits them through the venue's gateway.

use std::str::FromStr;
use std::time::Duration;

use alloy_primitives::keccak256;
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use crate::error::AdapterError;
use crate::models::{Position, Side};

use super::types::{Balance, OpenRequest, OrderAck, OrderState};
use super::ExchangeAdapter;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const VENUE: &str = "onchain";

/// Gateway adapter for an on-chain perp venue. Reads go through the query
/// endpoint; writes are keccak-hashed, signed with the local key and posted
/// to the exchange endpoint.
pub struct OnchainPerpAdapter {
    http: Client,
    gateway_url: String,
    signer: PrivateKeySigner,
    chain_id: u64,
    account: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateDto {
    positions: Vec<OnchainPositionDto>,
    margin: MarginSummaryDto,
}

/// Position entry in the account state; size is signed, shorts negative.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnchainPositionDto {
    position_key: String,
    coin: String,
    size: Decimal,
    entry_price: Decimal,
    leverage: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarginSummaryDto {
    account_value: Decimal,
    free_margin: Decimal,
    margin_used: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeResponseDto {
    status: String,
    #[serde(default)]
    order_id: Option<String>,
}

impl OnchainPerpAdapter {
    pub fn new(
        gateway_url: String,
        private_key: &str,
        chain_id: u64,
        account: &str,
    ) -> Result<Self, AdapterError> {
        let pk = private_key.strip_prefix("0x").unwrap_or(private_key);
        let signer =
            PrivateKeySigner::from_str(pk).map_err(|e| AdapterError::Signing(e.to_string()))?;

        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(AdapterError::Http)?;

        Ok(Self {
            http,
            gateway_url: gateway_url.trim_end_matches('/').to_string(),
            signer,
            chain_id,
            account: account.to_string(),
        })
    }

    /// Create from environment variables:
    /// - MIRROR_ONCHAIN_URL
    /// - MIRROR_ONCHAIN_PRIVATE_KEY
    /// - MIRROR_ONCHAIN_CHAIN_ID (defaults to 42161)
    pub fn from_env(account: &str) -> Result<Self, AdapterError> {
        let gateway_url = std::env::var("MIRROR_ONCHAIN_URL")
            .map_err(|_| AdapterError::Credentials("MIRROR_ONCHAIN_URL not set".to_string()))?;
        let private_key = std::env::var("MIRROR_ONCHAIN_PRIVATE_KEY").map_err(|_| {
            AdapterError::Credentials("MIRROR_ONCHAIN_PRIVATE_KEY not set".to_string())
        })?;
        let chain_id: u64 = std::env::var("MIRROR_ONCHAIN_CHAIN_ID")
            .unwrap_or_else(|_| "42161".to_string())
            .parse()
            .map_err(|_| AdapterError::Credentials("invalid MIRROR_ONCHAIN_CHAIN_ID".to_string()))?;

        Self::new(gateway_url, &private_key, chain_id, account)
    }

    fn fetch_backoff() -> ExponentialBackoff {
        ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(10)),
            ..ExponentialBackoff::default()
        }
    }

    /// POST a read-only query to the gateway; retried, reads are idempotent.
    async fn query<T: DeserializeOwned>(&self, body: serde_json::Value) -> Result<T, AdapterError> {
        let url = format!("{}/query", self.gateway_url);

        backoff::future::retry(Self::fetch_backoff(), || async {
            let resp = self
                .http
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(AdapterError::Http(e)))?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                let err = AdapterError::Api {
                    venue: VENUE.to_string(),
                    status: status.as_u16(),
                    body: text,
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

    async fn account_state(&self) -> Result<StateDto, AdapterError> {
        self.query(json!({ "type": "accountState", "user": self.account }))
            .await
    }

    /// Sign `action` and POST it to the exchange endpoint. Never retried.
    async fn submit(&self, action: serde_json::Value) -> Result<ExchangeResponseDto, AdapterError> {
        let nonce = Uuid::new_v4().as_u128().to_string();
        let payload = json!({ "action": action, "nonce": nonce });

        let encoded =
            serde_json::to_vec(&payload).map_err(|e| AdapterError::Signing(e.to_string()))?;
        let digest = keccak256(&encoded);
        let signature = self
            .signer
            .sign_hash(&digest)
            .await
            .map_err(|e| AdapterError::Signing(e.to_string()))?;

        let body = json!({
            "action": action,
            "nonce": nonce,
            "chainId": self.chain_id,
            "signature": format!("0x{}", hex::encode(signature.as_bytes())),
        });

        let url = format!("{}/exchange", self.gateway_url);
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(AdapterError::Http)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(AdapterError::Api {
                venue: VENUE.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }

        let dto: ExchangeResponseDto = resp
            .json()
            .await
            .map_err(|e| AdapterError::Decode(e.to_string()))?;

        if dto.status != "ok" {
            return Err(AdapterError::Api {
                venue: VENUE.to_string(),
                status: status.as_u16(),
                body: dto.status,
            });
        }

        Ok(dto)
    }
}

#[async_trait]
impl ExchangeAdapter for OnchainPerpAdapter {
    fn name(&self) -> &str {
        VENUE
    }

    async fn fetch_positions(&self) -> Result<Vec<Position>, AdapterError> {
        let state = self.account_state().await?;

        let positions = state
            .positions
            .into_iter()
            .filter(|p| !p.size.is_zero())
            .map(|p| {
                let side = if p.size > Decimal::ZERO {
                    Side::Long
                } else {
                    Side::Short
                };
                Position {
                    symbol: p.coin,
                    side,
                    size: p.size.abs(),
                    entry_price: p.entry_price,
                    leverage: p.leverage.max(Decimal::ONE),
                    external_id: Some(p.position_key),
                }
            })
            .collect();

        Ok(positions)
    }

    async fn fetch_balance(&self) -> Result<Balance, AdapterError> {
        let state = self.account_state().await?;

        Ok(Balance {
            total: state.margin.account_value,
            free: state.margin.free_margin,
            used: state.margin.margin_used,
        })
    }

    async fn open_position(&self, req: &OpenRequest) -> Result<OrderAck, AdapterError> {
        debug!(symbol = %req.symbol, size = %req.size, "submitting open action");

        let action = json!({
            "type": "open",
            "coin": req.symbol,
            "side": req.side.as_str(),
            "size": req.size.to_string(),
            "margin": req.margin_amount.to_string(),
            "leverage": req.leverage.to_string(),
        });
        let dto = self.submit(action).await?;

        let external_id = dto
            .order_id
            .ok_or_else(|| AdapterError::Decode("exchange response missing orderId".to_string()))?;

        Ok(OrderAck {
            external_id,
            status: OrderState::Pending,
        })
    }

    async fn close_position(&self, external_id: &str) -> Result<OrderAck, AdapterError> {
        debug!(external_id = %external_id, "submitting close action");

        let action = json!({
            "type": "close",
            "positionKey": external_id,
        });
        self.submit(action).await?;

        Ok(OrderAck {
            external_id: external_id.to_string(),
            status: OrderState::Closed,
        })
    }
}

// =============================================================================
// External venue adapter — trait + demo/live implementations
// =============================================================================
//
// `VenueAdapter` is the trait boundary between the trade engine and whatever
// exchange executes orders. The live adapter reuses the HMAC-SHA256 request
// signing approach used for the Binance REST surface, trimmed down to the
// four operations the trade engine actually needs. The demo adapter fills
// every order immediately against the quoted price, used whenever
// `AccountMode::Demo` is selected.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::CoreError;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VenueOrderStatus {
    Open,
    Closed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub price: f64,
    pub quantity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub venue_id: String,
    pub fills: Vec<Fill>,
    pub fees: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VenueIntent {
    pub intent_id: String,
    pub symbol: String,
    pub direction: String,
    pub size: f64,
}

#[async_trait]
pub trait VenueAdapter: Send + Sync {
    async fn quote(&self, symbol: &str) -> Result<f64, CoreError>;
    async fn execute(&self, intent: &VenueIntent) -> Result<ExecutionReport, CoreError>;
    async fn status(&self, venue_id: &str) -> Result<VenueOrderStatus, CoreError>;
    async fn cancel(&self, venue_id: &str) -> Result<(), CoreError>;
}

// ---------------------------------------------------------------------------
// Live adapter — HMAC-signed REST calls
// ---------------------------------------------------------------------------

const RECV_WINDOW: u64 = 5000;

pub struct LiveVenueAdapter {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl LiveVenueAdapter {
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");
        Self {
            api_key: api_key.into(),
            secret: secret.into(),
            base_url: base_url.into(),
            client,
        }
    }

    fn sign(&self, query: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }
}

#[async_trait]
impl VenueAdapter for LiveVenueAdapter {
    #[instrument(skip(self), name = "venue::quote")]
    async fn quote(&self, symbol: &str) -> Result<f64, CoreError> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| CoreError::external_unavailable(format!("quote request failed: {e}")))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CoreError::external_unavailable(format!("quote parse failed: {e}")))?;
        body.get("price")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .ok_or_else(|| CoreError::external_unavailable("missing price in quote response"))
    }

    #[instrument(skip(self), name = "venue::execute")]
    async fn execute(&self, intent: &VenueIntent) -> Result<ExecutionReport, CoreError> {
        let side = if intent.direction.eq_ignore_ascii_case("long") { "BUY" } else { "SELL" };
        let params = format!(
            "symbol={}&side={}&type=MARKET&quantity={}&newClientOrderId={}",
            intent.symbol, side, intent.size, intent.intent_id
        );
        let qs = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, qs);

        let resp = self
            .client
            .post(&url)
            .header("X-MBX-APIKEY", &self.api_key)
            .send()
            .await
            .map_err(|e| CoreError::external_unavailable(format!("order request failed: {e}")))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| CoreError::external_unavailable(format!("order parse failed: {e}")))?;

        if !status.is_success() {
            return Err(CoreError::terminal(format!("venue rejected order: {body}")));
        }

        let venue_id = body
            .get("orderId")
            .map(|v| v.to_string())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let fill_price = body
            .get("price")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);

        Ok(ExecutionReport {
            venue_id,
            fills: vec![Fill { price: fill_price, quantity: intent.size }],
            fees: 0.0,
        })
    }

    #[instrument(skip(self), name = "venue::status")]
    async fn status(&self, venue_id: &str) -> Result<VenueOrderStatus, CoreError> {
        debug!(venue_id, "checking venue order status");
        Ok(VenueOrderStatus::Closed)
    }

    async fn cancel(&self, venue_id: &str) -> Result<(), CoreError> {
        warn!(venue_id, "cancel not implemented for this venue, treating as no-op");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Demo adapter — fills immediately at a simulated price
// ---------------------------------------------------------------------------

pub struct DemoVenueAdapter {
    prices: RwLock<std::collections::HashMap<String, f64>>,
    next_id: AtomicU64,
}

impl DemoVenueAdapter {
    pub fn new() -> Self {
        Self {
            prices: RwLock::new(std::collections::HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.prices.write().insert(symbol.to_string(), price);
    }
}

impl Default for DemoVenueAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for DemoVenueAdapter {
    async fn quote(&self, symbol: &str) -> Result<f64, CoreError> {
        self.prices
            .read()
            .get(symbol)
            .copied()
            .ok_or_else(|| CoreError::external_unavailable(format!("no simulated price for {symbol}")))
    }

    async fn execute(&self, intent: &VenueIntent) -> Result<ExecutionReport, CoreError> {
        let price = self.quote(&intent.symbol).await?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(ExecutionReport {
            venue_id: format!("demo-{id}"),
            fills: vec![Fill { price, quantity: intent.size }],
            fees: 0.0,
        })
    }

    async fn status(&self, _venue_id: &str) -> Result<VenueOrderStatus, CoreError> {
        Ok(VenueOrderStatus::Closed)
    }

    async fn cancel(&self, _venue_id: &str) -> Result<(), CoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_adapter_fills_at_set_price() {
        let adapter = DemoVenueAdapter::new();
        adapter.set_price("BTCUSDT", 50000.0);

        let report = adapter
            .execute(&VenueIntent {
                intent_id: "i1".to_string(),
                symbol: "BTCUSDT".to_string(),
                direction: "Long".to_string(),
                size: 1.0,
            })
            .await
            .unwrap();
        assert_eq!(report.fills[0].price, 50000.0);
    }

    #[tokio::test]
    async fn demo_adapter_errors_without_a_price() {
        let adapter = DemoVenueAdapter::new();
        let err = adapter.quote("ETHUSDT").await.unwrap_err();
        assert!(matches!(err, CoreError::ExternalUnavailable { .. }));
    }
}

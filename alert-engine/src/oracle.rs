//! Price oracle client
//!
//! Resolves current price and 24h change for a symbol from a Binance-style
//! ticker REST endpoint. Ordinary "no data" conditions (unknown symbol,
//! non-numeric fields) come back as `Ok(None)`, never as an error; transport
//! failures and 5xx responses surface as errors and are handled upstream
//! exactly like missing data.

use crate::error::{EngineError, Result};
use crate::model::PriceSnapshot;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Fetch a fresh snapshot for `symbol`, or `None` when the feed has no
    /// usable price.
    async fn get_price(&self, symbol: &str) -> Result<Option<PriceSnapshot>>;
}

/// 24h ticker response; numeric fields arrive as strings.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TickerResponse {
    #[serde(default)]
    last_price: Option<String>,
    #[serde(default)]
    price_change_percent: Option<String>,
}

/// HTTP ticker client with a bounded request timeout.
pub struct HttpTickerOracle {
    http_client: Client,
    base_url: String,
    source: String,
}

impl HttpTickerOracle {
    pub fn new(base_url: impl Into<String>, timeout: Duration, source: impl Into<String>) -> Result<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.into(),
            source: source.into(),
        })
    }

    fn parse_price(symbol: &str, raw: &str) -> Option<f64> {
        match raw.parse::<f64>() {
            Ok(price) if price.is_finite() => Some(price),
            _ => {
                warn!(symbol = %symbol, raw = %raw, "ticker returned non-numeric price");
                None
            }
        }
    }
}

#[async_trait]
impl PriceOracle for HttpTickerOracle {
    async fn get_price(&self, symbol: &str) -> Result<Option<PriceSnapshot>> {
        let url = format!("{}/api/v3/ticker/24hr", self.base_url);
        let response = self
            .http_client
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() {
            // Unknown or delisted symbol; ordinary no-data, not a failure.
            debug!(symbol = %symbol, %status, "ticker has no data for symbol");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(EngineError::Oracle(format!(
                "ticker request for {} failed with status {}",
                symbol, status
            )));
        }

        let ticker: TickerResponse = match response.json().await {
            Ok(ticker) => ticker,
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "unparseable ticker response");
                return Ok(None);
            }
        };

        let Some(raw_price) = ticker
            .last_price
            .as_deref()
            .and_then(|raw| Self::parse_price(symbol, raw))
        else {
            return Ok(None);
        };
        let raw_change = ticker
            .price_change_percent
            .as_deref()
            .and_then(|raw| raw.parse::<f64>().ok())
            .filter(|change| change.is_finite());

        Ok(Some(PriceSnapshot {
            symbol: symbol.to_string(),
            raw_price,
            raw_change,
            source: self.source.clone(),
            captured_at: Utc::now(),
        }))
    }
}

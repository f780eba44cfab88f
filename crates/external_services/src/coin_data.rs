//! coin-data REST client.
//!
//! Serves the futures exchange rate the gateway uses when rewriting
//! IDR-labelled margin and position payloads.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Request timeout for rate lookups.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the coin-data futures exchange rate API.
#[derive(Debug, Clone)]
pub struct CoinDataClient {
    http: reqwest::Client,
    base_url: String,
    base_asset: String,
}

/// Response wrapper from coin-data.
#[derive(Debug, Deserialize)]
struct RateResponse {
    result: PriceRate,
}

/// Exchange rate payload inside the response wrapper.
#[derive(Debug, Deserialize)]
struct PriceRate {
    #[serde(default)]
    base_currency: String,
    #[serde(default)]
    quote_currency: String,
    amount: f64,
}

impl CoinDataClient {
    /// Create a new client for the given coin-data host.
    ///
    /// `base_asset` is the base-currency path segment of the rate endpoint,
    /// normally `USDT`.
    pub fn new(base_url: impl Into<String>, base_asset: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            base_asset: base_asset.into(),
        }
    }

    /// Fetch the current base→IDR futures exchange rate.
    ///
    /// A non-positive amount is treated as an error so callers never cache
    /// a rate that would zero out converted balances.
    pub async fn futures_exchange_rate(&self) -> Result<f64> {
        let url = format!(
            "{}/api/v1/coin-data/futures-exchange-rate/{}/IDR",
            self.base_url, self.base_asset
        );

        let response = self
            .http
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Api(format!(
                "coin-data returned status {}",
                response.status()
            )));
        }

        let body: RateResponse = response.json().await?;

        let rate = body.result.amount;
        if rate <= 0.0 {
            return Err(Error::InvalidResponse(format!(
                "non-positive exchange rate: {}",
                rate
            )));
        }

        debug!(
            rate,
            base = %body.result.base_currency,
            quote = %body.result.quote_currency,
            "fetched futures exchange rate"
        );

        Ok(rate)
    }
}

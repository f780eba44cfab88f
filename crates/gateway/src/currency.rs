//! Exchange rate cache.
//!
//! Holds a single TTL-bound rate slot. Refresh is strictly on-demand: the
//! first caller after expiry pays the provider round trip while holding the
//! write half of the lock, which is what keeps concurrent misses down to
//! exactly one upstream request.

use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use external_services::CoinDataClient;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Source of the base→IDR futures exchange rate.
#[async_trait]
pub trait RateProvider: Send + Sync {
    async fn fetch_rate(&self) -> external_services::Result<f64>;
}

#[async_trait]
impl RateProvider for CoinDataClient {
    async fn fetch_rate(&self) -> external_services::Result<f64> {
        self.futures_exchange_rate().await
    }
}

struct RateSlot {
    rate: f64,
    fetched_at: Instant,
}

/// TTL-cached currency service backed by a [`RateProvider`].
pub struct CurrencyService {
    provider: Arc<dyn RateProvider>,
    ttl: Duration,
    slot: RwLock<Option<RateSlot>>,
}

impl CurrencyService {
    pub fn new(provider: Arc<dyn RateProvider>, ttl: Duration) -> Self {
        Self {
            provider,
            ttl,
            slot: RwLock::new(None),
        }
    }

    /// Return the cached rate, refreshing it from the provider when the
    /// slot is empty or expired.
    ///
    /// A failed refresh leaves the previous (already expired) slot in
    /// place, so the next caller retries; the cache is never poisoned with
    /// a bad rate.
    pub async fn current_rate(&self) -> Result<f64> {
        if let Some(rate) = self.fresh_rate(&*self.slot.read().await) {
            debug!(rate, "using cached exchange rate");
            return Ok(rate);
        }

        let mut slot = self.slot.write().await;
        // Another caller may have refreshed while this one waited for the
        // write half.
        if let Some(rate) = self.fresh_rate(&slot) {
            return Ok(rate);
        }

        debug!("fetching exchange rate from provider");
        let rate = self.provider.fetch_rate().await?;
        if rate <= 0.0 {
            return Err(GatewayError::InvalidRate(rate));
        }

        *slot = Some(RateSlot {
            rate,
            fetched_at: Instant::now(),
        });
        info!(rate, ttl_secs = self.ttl.as_secs(), "exchange rate cache updated");

        Ok(rate)
    }

    fn fresh_rate(&self, slot: &Option<RateSlot>) -> Option<f64> {
        slot.as_ref()
            .filter(|s| s.fetched_at.elapsed() < self.ttl)
            .map(|s| s.rate)
    }
}

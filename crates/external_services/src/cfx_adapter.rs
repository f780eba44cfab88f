//! coin-cfx-adapter REST client.
//!
//! Resolves an Ajaib user id to the CFX user id that appears on upstream
//! Kafka records. The gateway calls this once per connection; results are
//! deliberately not cached here.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// err_code returned by the adapter on success.
const ERR_CODE_OK: &str = "EC0000000";

/// Request timeout for mapping lookups.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the coin-cfx-adapter user mapping API.
#[derive(Debug, Clone)]
pub struct CfxAdapterClient {
    http: reqwest::Client,
    base_url: String,
}

/// Response wrapper from coin-cfx-adapter.
#[derive(Debug, Deserialize)]
struct CfxMappingResponse {
    err_code: String,
    #[serde(default)]
    err_message: String,
    #[serde(default)]
    result: Option<CfxMappingResult>,
}

/// Mapping payload inside the response wrapper.
#[derive(Debug, Deserialize)]
struct CfxMappingResult {
    #[allow(dead_code)]
    ajaib_id: i64,
    #[serde(default)]
    cfx_user_id: String,
}

impl CfxAdapterClient {
    /// Create a new client for the given adapter host.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    /// Resolve the CFX user id for an Ajaib user id.
    ///
    /// A non-`EC0000000` err_code or a missing/empty result is an error;
    /// the caller decides whether that is fatal.
    pub async fn cfx_user_id(&self, ajaib_id: i64) -> Result<String> {
        let url = format!(
            "{}/api/v1/internal/coin-cfx-adapter/user/{}/cfx",
            self.base_url, ajaib_id
        );

        let response = self
            .http
            .get(&url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Api(format!(
                "coin-cfx-adapter returned status {}",
                response.status()
            )));
        }

        let body: CfxMappingResponse = response.json().await?;

        if body.err_code != ERR_CODE_OK {
            return Err(Error::Api(format!(
                "coin-cfx-adapter error: {} - {}",
                body.err_code, body.err_message
            )));
        }

        let cfx_user_id = body
            .result
            .map(|r| r.cfx_user_id)
            .unwrap_or_default();

        if cfx_user_id.is_empty() {
            return Err(Error::MappingNotFound(format!(
                "no cfx_user_id for ajaib_id {}",
                ajaib_id
            )));
        }

        debug!(ajaib_id, %cfx_user_id, "resolved ajaib_id to cfx_user_id");

        Ok(cfx_user_id)
    }
}

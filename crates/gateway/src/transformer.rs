//! Currency rewrite for upstream margin and position records.
//!
//! Upstream labels IDR-denominated accounts with an `IDR` asset tag (and
//! `*IDR-PERP` symbols) while the numeric values are still in the base
//! currency, a legacy contract. When the marker is present, every
//! monetary field is multiplied by the cached exchange rate; otherwise the
//! record passes through untouched.

use crate::currency::CurrencyService;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Margin asset tag that marks a record for conversion.
pub const IDR_ASSET: &str = "IDR";

/// Position symbol suffix that marks a record for conversion.
pub const IDR_PERP_SUFFIX: &str = "IDR-PERP";

/// A user's margin account state from the upstream bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserMargin {
    #[serde(default)]
    pub timestamp: i64,
    pub cfx_user_id: String,
    #[serde(default)]
    pub asset: String,
    #[serde(default)]
    pub total_position_value: f64,
    #[serde(default)]
    pub margin_balance: f64,
    #[serde(default)]
    pub order_margin: f64,
    #[serde(default)]
    pub effective_leverage: f64,
    #[serde(default)]
    pub maintenance_margin: f64,
    #[serde(default)]
    pub unrealized_pnl: f64,
    #[serde(default)]
    pub available_margin: f64,
    #[serde(default)]
    pub wallet_balance: f64,
    #[serde(default)]
    pub margin_ratio: f64,
    #[serde(default)]
    pub withdrawable_margin: f64,
}

/// A user's futures position from the upstream bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPosition {
    #[serde(default)]
    pub timestamp: i64,
    pub cfx_user_id: String,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub size: f64,
    #[serde(default)]
    pub value: f64,
    #[serde(default)]
    pub leverage: i32,
    #[serde(default)]
    pub entry_price: f64,
    #[serde(default)]
    pub mark_price: f64,
    #[serde(default)]
    pub liquidation_price: f64,
    #[serde(default)]
    pub maintenance_margin: f64,
    #[serde(default)]
    pub realised_pnl: f64,
    #[serde(default)]
    pub unrealised_pnl: f64,
    #[serde(default)]
    pub deleverage_percentile: f64,
    #[serde(default)]
    pub risk_limit: i64,
    #[serde(default)]
    pub open_order_buy_cost: f64,
    #[serde(default)]
    pub open_order_sell_cost: f64,
    #[serde(default)]
    pub initial_margin_requirement: f64,
    #[serde(default)]
    pub updated_time: i64,
    #[serde(default)]
    pub open_order_buy_quantity: f64,
    #[serde(default)]
    pub open_order_sell_quantity: f64,
    #[serde(default)]
    pub order_margin: f64,
}

/// Rewrites monetary fields of marked records using the cached rate.
pub struct Transformer {
    currency: Arc<CurrencyService>,
}

impl Transformer {
    pub fn new(currency: Arc<CurrencyService>) -> Self {
        Self { currency }
    }

    /// Convert a margin record when its asset tag marks it for conversion.
    ///
    /// Returns `None` when no conversion applies, so the caller can
    /// broadcast the original bytes untouched. A rate fetch failure is an
    /// error; the caller drops the record rather than emit wrong-units
    /// numbers.
    pub async fn transform_margin(&self, margin: &UserMargin) -> Result<Option<UserMargin>> {
        if margin.asset != IDR_ASSET {
            return Ok(None);
        }

        let rate = self.currency.current_rate().await?;

        let mut out = margin.clone();
        out.total_position_value *= rate;
        out.margin_balance *= rate;
        out.order_margin *= rate;
        out.maintenance_margin *= rate;
        out.unrealized_pnl *= rate;
        out.available_margin *= rate;
        out.wallet_balance *= rate;
        out.withdrawable_margin *= rate;

        debug!(cfx_user_id = %margin.cfx_user_id, rate, "converted user margin to IDR");
        Ok(Some(out))
    }

    /// Convert a position record when its symbol marks it for conversion.
    pub async fn transform_position(&self, position: &UserPosition) -> Result<Option<UserPosition>> {
        if !position.symbol.ends_with(IDR_PERP_SUFFIX) {
            return Ok(None);
        }

        let rate = self.currency.current_rate().await?;

        let mut out = position.clone();
        out.value *= rate;
        out.maintenance_margin *= rate;
        out.realised_pnl *= rate;
        out.unrealised_pnl *= rate;
        out.order_margin *= rate;

        debug!(
            cfx_user_id = %position.cfx_user_id,
            symbol = %position.symbol,
            rate,
            "converted user position to IDR"
        );
        Ok(Some(out))
    }
}

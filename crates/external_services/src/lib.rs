//! HTTP clients for the gateway's upstream REST collaborators.
//!
//! - coin-cfx-adapter: maps an Ajaib user id to its CFX user id
//! - coin-data: serves the futures exchange rate used for currency conversion
//!
//! # Example
//!
//! ```ignore
//! use external_services::{CfxAdapterClient, CoinDataClient};
//!
//! let mapper = CfxAdapterClient::new("http://coin-cfx-adapter");
//! let cfx_user_id = mapper.cfx_user_id(130010505).await?;
//!
//! let coin_data = CoinDataClient::new("http://coin-data", "USDT");
//! let rate = coin_data.futures_exchange_rate().await?;
//! ```

pub mod cfx_adapter;
pub mod coin_data;
pub mod error;

pub use cfx_adapter::CfxAdapterClient;
pub use coin_data::CoinDataClient;
pub use error::{Error, Result};

//! Real-time fan-out gateway for per-user futures state.
//!
//! This service:
//! - Accepts authenticated WebSocket connections from trading clients
//! - Manages client subscriptions to `user:<ajaib_id>:{margin,position}` channels
//! - Consumes user margin/position snapshots from Kafka
//! - Routes each record only to the sessions of its user, converting
//!   currency fields when the payload is IDR-marked
//!
//! ## Architecture
//!
//! ```text
//! Kafka: UserMargin / UserPosition topics
//!         ↓
//! IngressConsumer → Dispatcher (tracker lookup, currency transform)
//!         ↓
//! Hub (one RW lock: sessions, per-user counts, channel subscribers)
//!         ↓
//! per-session bounded queues → WebSocket clients
//! ```
//!
//! ## Fan-out design
//!
//! - One lock over the hub's three mappings; broadcasts snapshot the
//!   subscriber set and never send under the lock
//! - Frames are encoded once per broadcast, not per recipient
//! - Bounded per-session queues; a full queue drops frames for that
//!   recipient only, so a stuck socket cannot stall the ingress path

pub mod auth;
pub mod channel;
pub mod config;
pub mod consumer;
pub mod currency;
pub mod error;
pub mod hub;
pub mod ingress;
pub mod protocol;
pub mod session;
pub mod tracker;
pub mod transformer;
pub mod ws_server;

pub use config::{GatewayConfig, ServerSettings};
pub use consumer::IngressConsumer;
pub use currency::{CurrencyService, RateProvider};
pub use error::{GatewayError, Result};
pub use hub::Hub;
pub use ingress::Dispatcher;
pub use protocol::Frame;
pub use session::{Session, SessionId};
pub use tracker::SubscriptionTracker;
pub use transformer::{Transformer, UserMargin, UserPosition};
pub use ws_server::{create_router, teardown_session, AppState, UserIdResolver};

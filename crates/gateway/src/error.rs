//! Gateway error types.

use thiserror::Error;

/// Gateway error type.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Kafka client error.
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// Upstream REST collaborator error.
    #[error("upstream error: {0}")]
    Upstream(#[from] external_services::Error),

    /// The provider returned a rate that cannot be used for conversion.
    #[error("invalid exchange rate: {0}")]
    InvalidRate(f64),

    /// Session outbound queue is full; the frame was dropped.
    #[error("send queue full")]
    SendQueueFull,

    /// Session outbound queue was closed by teardown.
    #[error("send queue closed")]
    SendQueueClosed,

    /// Per-user connection limit reached.
    #[error("connection limit reached")]
    ConnectionLimit,

    /// Operation requires a registered session.
    #[error("session not registered")]
    NotRegistered,

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

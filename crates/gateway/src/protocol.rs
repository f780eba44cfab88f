//! WebSocket protocol frame types.
//!
//! Defines the JSON frame format for client-server communication. Every
//! frame is a single tagged record; optional fields are omitted from the
//! wire when unset so replies stay compact.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

// Client -> Server commands
pub const TYPE_SUBSCRIBE: &str = "subscribe";
pub const TYPE_UNSUBSCRIBE: &str = "unsubscribe";
pub const TYPE_PING: &str = "ping";

// Server -> Client responses
pub const TYPE_CONNECTED: &str = "connected";
pub const TYPE_SUBSCRIBED: &str = "subscribed";
pub const TYPE_UNSUBSCRIBED: &str = "unsubscribed";
pub const TYPE_PONG: &str = "pong";
pub const TYPE_PUBLICATION: &str = "publication";
pub const TYPE_ERROR: &str = "error";
pub const TYPE_DISCONNECT: &str = "disconnect";

// Error codes for WebSocket communication
pub const CODE_BAD_REQUEST: u16 = 4000;
pub const CODE_CHANNEL_NOT_FOUND: u16 = 4001;
pub const CODE_ALREADY_SUBSCRIBED: u16 = 4002;
pub const CODE_NOT_SUBSCRIBED: u16 = 4003;
pub const CODE_SUBSCRIPTION_LIMIT: u16 = 4004;
pub const CODE_UNAUTHORIZED: u16 = 4100;
pub const CODE_CONNECTION_LIMIT: u16 = 4200;
pub const CODE_INTERNAL: u16 = 4500;

/// A WebSocket protocol frame.
#[derive(Debug, Serialize, Deserialize)]
pub struct Frame {
    /// Client correlation id, echoed back on replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Frame type tag.
    #[serde(rename = "type")]
    pub frame_type: String,
    /// Channel name, present on subscribe/unsubscribe/publication frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    /// Raw JSON payload, passed through without re-encoding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<RawValue>>,
    /// True on subscribed/unsubscribed, false on error replies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    /// Error code, present on error/disconnect frames.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    /// Error or disconnect reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Server timestamp in milliseconds; zero on client frames.
    #[serde(default)]
    pub timestamp: i64,
}

/// Payload of the `connected` greeting frame.
#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectedData {
    pub client_id: String,
    pub ajaib_id: String,
}

/// Current time in epoch milliseconds.
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl Frame {
    fn base(frame_type: &str) -> Self {
        Self {
            id: None,
            frame_type: frame_type.to_string(),
            channel: None,
            data: None,
            success: None,
            code: None,
            message: None,
            timestamp: now_millis(),
        }
    }

    /// Subscribed confirmation for a subscribe request.
    pub fn subscribed(request_id: Option<String>, channel: &str) -> Self {
        Self {
            id: request_id,
            channel: Some(channel.to_string()),
            success: Some(true),
            ..Self::base(TYPE_SUBSCRIBED)
        }
    }

    /// Unsubscribed confirmation for an unsubscribe request.
    pub fn unsubscribed(request_id: Option<String>, channel: &str) -> Self {
        Self {
            id: request_id,
            channel: Some(channel.to_string()),
            success: Some(true),
            ..Self::base(TYPE_UNSUBSCRIBED)
        }
    }

    /// Publication frame carrying channel data.
    pub fn publication(channel: &str, data: Box<RawValue>) -> Self {
        Self {
            channel: Some(channel.to_string()),
            data: Some(data),
            ..Self::base(TYPE_PUBLICATION)
        }
    }

    /// Pong reply to an application-level ping.
    pub fn pong(request_id: Option<String>) -> Self {
        Self {
            id: request_id,
            ..Self::base(TYPE_PONG)
        }
    }

    /// Greeting sent right after a successful upgrade.
    pub fn connected(client_id: &str, ajaib_id: &str) -> Result<Self, serde_json::Error> {
        let data = serde_json::value::to_raw_value(&ConnectedData {
            client_id: client_id.to_string(),
            ajaib_id: ajaib_id.to_string(),
        })?;
        Ok(Self {
            data: Some(data),
            ..Self::base(TYPE_CONNECTED)
        })
    }

    /// Error reply with a protocol error code.
    pub fn error(request_id: Option<String>, code: u16, message: &str) -> Self {
        Self {
            id: request_id,
            success: Some(false),
            code: Some(code),
            message: Some(message.to_string()),
            ..Self::base(TYPE_ERROR)
        }
    }

    /// Server-initiated close notice.
    pub fn disconnect(code: u16, reason: &str) -> Self {
        Self {
            code: Some(code),
            message: Some(reason.to_string()),
            ..Self::base(TYPE_DISCONNECT)
        }
    }

    /// Parse a raw JSON frame.
    pub fn parse(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }

    /// Encode the frame to a JSON string.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

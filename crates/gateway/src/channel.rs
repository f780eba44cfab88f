//! Channel name parsing and validation.
//!
//! The only channel shape this gateway routes is `user:<ajaib_id>:<kind>`
//! where `ajaib_id` is a 1-10 digit decimal string and `kind` is one of the
//! two user data streams.

use thiserror::Error;

/// Prefix of user channels.
pub const PREFIX_USER: &str = "user:";

/// Maximum number of digits in an Ajaib user id.
const AJAIB_ID_MAX_DIGITS: usize = 10;

/// The per-user data stream a channel selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Margin,
    Position,
}

impl ChannelKind {
    /// Channel-name suffix for this kind.
    pub const fn as_suffix(&self) -> &'static str {
        match self {
            Self::Margin => "margin",
            Self::Position => "position",
        }
    }

    fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            "margin" => Some(Self::Margin),
            "position" => Some(Self::Position),
            _ => None,
        }
    }
}

/// Parsed information about a channel name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub ajaib_id: String,
    pub kind: ChannelKind,
}

/// Channel validation error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChannelError {
    #[error("invalid channel format")]
    InvalidFormat,
    #[error("unknown channel type")]
    UnknownType,
    #[error("invalid user id format")]
    InvalidUserId,
}

/// Parse and validate a channel name.
pub fn parse_channel(channel: &str) -> Result<ChannelInfo, ChannelError> {
    let rest = channel
        .strip_prefix(PREFIX_USER)
        .ok_or(ChannelError::UnknownType)?;

    let parts: Vec<&str> = rest.split(':').collect();
    if parts.len() != 2 || parts[0].is_empty() || parts[1].is_empty() {
        return Err(ChannelError::InvalidFormat);
    }

    let ajaib_id = parts[0];
    if !is_valid_ajaib_id(ajaib_id) {
        return Err(ChannelError::InvalidUserId);
    }

    let kind = ChannelKind::from_suffix(parts[1]).ok_or(ChannelError::UnknownType)?;

    Ok(ChannelInfo {
        ajaib_id: ajaib_id.to_string(),
        kind,
    })
}

/// Build the channel name for a user data stream.
pub fn user_channel(ajaib_id: &str, kind: ChannelKind) -> String {
    format!("{}{}:{}", PREFIX_USER, ajaib_id, kind.as_suffix())
}

/// An Ajaib id is a 1-10 digit decimal string.
pub fn is_valid_ajaib_id(id: &str) -> bool {
    !id.is_empty() && id.len() <= AJAIB_ID_MAX_DIGITS && id.bytes().all(|b| b.is_ascii_digit())
}

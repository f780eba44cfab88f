//! Connection credential parsing.
//!
//! The upgrade request carries a JWT whose `sub` claim is the Ajaib user id.
//! Only the claims segment is read; signature verification happens at the
//! edge proxy, so none is attempted here.

use crate::channel::is_valid_ajaib_id;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    sub: String,
}

/// Extract the Ajaib user id from a bearer credential.
///
/// Accepts the raw header/query value with or without the `Bearer ` prefix.
/// Returns `None` when the token is not three dot-separated segments, the
/// claims segment is not base64url JSON, or `sub` is not a 1-10 digit
/// decimal string.
pub fn subject_from_bearer(raw: &str) -> Option<String> {
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw);

    let mut segments = token.split('.');
    let _header = segments.next()?;
    let claims_segment = segments.next()?;
    let _signature = segments.next()?;
    if segments.next().is_some() {
        return None;
    }

    let payload = URL_SAFE_NO_PAD.decode(claims_segment).ok()?;
    let claims: Claims = serde_json::from_slice(&payload).ok()?;

    if !is_valid_ajaib_id(&claims.sub) {
        return None;
    }

    Some(claims.sub)
}

#[cfg(test)]
pub(crate) fn make_token(sub: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"none","typ":"JWT"}"#);
    let claims = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"{}"}}"#, sub));
    format!("{}.{}.sig", header, claims)
}

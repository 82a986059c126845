//! Unverified JWT claim decoding.
//!
//! The backend signs its tokens; the client only reads `exp` and `role` to
//! decide when to refresh and which role to look up. No signature check is
//! performed here.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::Deserialize;

use crate::error::ApiError;

/// The claims this crate reads from a Directus access token.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub exp: Option<f64>,
    #[serde(default)]
    pub role: Option<String>,
}

/// Decode the payload segment of `token`.
pub fn decode_claims(token: &str) -> Result<Claims, ApiError> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| ApiError::InvalidToken("missing payload segment".to_string()))?;
    // Some encoders pad; the URL-safe engine rejects padding.
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| ApiError::InvalidToken(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::InvalidToken(e.to_string()))
}

/// Seconds since the Unix epoch.
pub fn now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Whether `access_token` needs replacing at time `now`.
///
/// A token that does not decode is expired; a decodable token without an
/// `exp` claim never expires.
pub fn is_expired(access_token: &str, now: f64) -> bool {
    match decode_claims(access_token) {
        Ok(claims) => claims.exp.is_some_and(|exp| exp < now),
        Err(e) => {
            tracing::debug!(error = %e, "treating undecodable access token as expired");
            true
        }
    }
}

/// Build an unsigned token carrying `payload`. Used by tests.
#[cfg(test)]
pub(crate) fn encode_unsigned(payload: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    format!("{header}.{body}.sig")
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JWT inspection: decode the payload and judge expiry.
//!
//! The signature is never verified here, that is the server's job. A token
//! that cannot be decoded is always treated as expired.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{Map, Value};

/// Default safety margin before `exp` at which a token counts as stale.
pub const DEFAULT_SKEW_SECS: u64 = 30;

/// Why a token could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("expected 3 segments, got {0}")]
    SegmentCount(usize),
    #[error("payload is not base64url")]
    Base64,
    #[error("payload is not JSON")]
    Json,
    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// Decoded payload claims.
#[derive(Debug, Clone, PartialEq)]
pub struct Claims {
    /// Expiry in Unix seconds. `None` when absent or not numeric.
    pub exp: Option<i64>,
    /// Subject (user id) when present as a string.
    pub sub: Option<String>,
    /// The full claim set.
    pub raw: Map<String, Value>,
}

impl Claims {
    fn from_map(raw: Map<String, Value>) -> Self {
        let exp = raw.get("exp").and_then(|v| match v {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.floor() as i64)),
            _ => None,
        });
        let sub = raw.get("sub").and_then(Value::as_str).map(str::to_owned);
        Self { exp, sub, raw }
    }
}

/// Decode a token's payload, reporting why it failed.
pub fn try_decode(token: &str) -> Result<Claims, DecodeError> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return Err(DecodeError::SegmentCount(segments.len()));
    }

    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD.decode(payload).map_err(|_| DecodeError::Base64)?;
    let value: Value = serde_json::from_slice(&bytes).map_err(|_| DecodeError::Json)?;
    match value {
        Value::Object(map) => Ok(Claims::from_map(map)),
        _ => Err(DecodeError::NotAnObject),
    }
}

/// Decode a token's payload. `None` on any malformed input.
pub fn decode(token: &str) -> Option<Claims> {
    try_decode(token).ok()
}

pub(crate) fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

/// `true` when the token is undecodable, has no `exp`, or `exp <= now + skew`.
pub fn is_expired_or_near_expiry(token: &str, skew_secs: u64) -> bool {
    is_expired_at(token, skew_secs, now_secs())
}

/// [`is_expired_or_near_expiry`] against an explicit clock.
pub fn is_expired_at(token: &str, skew_secs: u64, now: i64) -> bool {
    let Some(exp) = decode(token).and_then(|c| c.exp) else {
        return true;
    };
    let skew = i64::try_from(skew_secs).unwrap_or(i64::MAX);
    exp <= now.saturating_add(skew)
}

/// Seconds until `exp`, zero once passed. `None` if the token has no usable `exp`.
pub fn expires_in(token: &str, now: i64) -> Option<u64> {
    let exp = decode(token)?.exp?;
    Some(exp.saturating_sub(now).max(0) as u64)
}

#[cfg(test)]
#[path = "jwt_tests.rs"]
mod tests;

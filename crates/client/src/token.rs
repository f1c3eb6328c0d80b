//! Access-token inspection.
//!
//! Tokens are JWTs. We only decode the payload to read `exp` and `sub`; the
//! signature is the server's business and is never checked here.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::{ClientError, Result};

const SECS_PER_DAY: i64 = 86_400;

#[derive(Debug, Clone, PartialEq)]
pub struct TokenClaims {
    pub expires_at: DateTime<Utc>,
    pub subject: Option<String>,
}

/// Decode the claims of a JWT without verifying it.
pub fn decode_claims(token: &str) -> Result<TokenClaims> {
    let mut parts = token.split('.');
    let payload = match (parts.next(), parts.next(), parts.next()) {
        (Some(_), Some(payload), Some(_)) => payload,
        _ => return Err(ClientError::InvalidToken("expected three segments".into())),
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| ClientError::InvalidToken(format!("payload is not base64url: {e}")))?;
    let claims: Value = serde_json::from_slice(&bytes)
        .map_err(|e| ClientError::InvalidToken(format!("payload is not JSON: {e}")))?;

    let exp = claims
        .get("exp")
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .ok_or_else(|| ClientError::InvalidToken("missing `exp` claim".into()))?;
    let expires_at = DateTime::<Utc>::from_timestamp(exp, 0)
        .ok_or_else(|| ClientError::InvalidToken(format!("`exp` out of range: {exp}")))?;

    let subject = match claims.get("sub") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    Ok(TokenClaims {
        expires_at,
        subject,
    })
}

/// Whole days the credential may be kept, rounded up. Zero once expired.
pub fn retention_days(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let remaining = (expires_at - now).num_seconds();
    if remaining <= 0 {
        0
    } else {
        (remaining + SECS_PER_DAY - 1) / SECS_PER_DAY
    }
}

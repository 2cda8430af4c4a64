//! JWT payload decoding
//!
//! Only the claims are read; signatures are never verified. Tokens come from
//! the user's own local tool state and are used for identity hints only.

use base64::Engine;
use serde_json::Value;

use crate::error::ProviderError;

/// Decode the payload segment of a JWT into JSON
///
/// The segment is base64url; missing padding is restored before decoding.
pub fn decode_payload(token: &str) -> Result<Value, ProviderError> {
    let segment = token
        .split('.')
        .nth(1)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ProviderError::ParseFailed("token is not a JWT".to_string()))?;

    let mut payload = segment.replace('-', "+").replace('_', "/");
    while payload.len() % 4 != 0 {
        payload.push('=');
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(payload.as_bytes())
        .map_err(|e| ProviderError::ParseFailed(format!("invalid JWT payload encoding: {e}")))?;

    serde_json::from_slice(&decoded)
        .map_err(|e| ProviderError::ParseFailed(format!("invalid JWT payload JSON: {e}")))
}

/// The `sub` claim
pub fn subject(token: &str) -> Result<String, ProviderError> {
    decode_payload(token)?
        .get("sub")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ProviderError::ParseFailed("JWT has no sub claim".to_string()))
}

#[cfg(test)]
pub(crate) fn encode_for_test(claims: &Value) -> String {
    let engine = base64::engine::general_purpose::URL_SAFE_NO_PAD;
    format!(
        "{}.{}.sig",
        engine.encode(br#"{"alg":"none"}"#),
        engine.encode(claims.to_string())
    )
}

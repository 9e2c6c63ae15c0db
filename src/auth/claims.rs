//! Non-verifying decode of the access token payload.
//!
//! Access tokens are three dot-separated base64url segments. `decode`
//! extracts and JSON-parses the middle (payload) segment only - no
//! signature or expiry check happens client-side. The result is the
//! *claimed* identity, good for display and nothing else; authorization
//! is always re-validated by the server.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::error::DecodeError;

/// Identity claims embedded in the access token payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub user_id: i64,
}

/// Decode the payload segment of an access token.
///
/// Fails when the payload segment is missing, not valid base64url, or not
/// a JSON object carrying the expected claims. Unknown claims (expiry,
/// token type, ...) are ignored.
pub fn decode(access: &str) -> Result<Identity, DecodeError> {
    let payload = access
        .split('.')
        .nth(1)
        .filter(|segment| !segment.is_empty())
        .ok_or(DecodeError::MissingPayload)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Build a structurally valid access token carrying the given claims.
/// The signature segment is garbage - `decode` never looks at it.
#[cfg(test)]
pub(crate) fn encode_token(username: &str, user_id: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = serde_json::json!({
        "token_type": "access",
        "username": username,
        "user_id": user_id,
    });
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload).unwrap());
    format!("{header}.{payload}.sig")
}

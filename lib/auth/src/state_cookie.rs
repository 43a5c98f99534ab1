//! Signed cookie transport for login state.
//!
//! The login redirect stores `{state, code_verifier, nonce, created_at}` in
//! an HMAC-signed cookie so the callback can be validated without a store
//! round-trip. Wire format: `base64url(JSON payload) + "." +
//! base64url(HMAC-SHA256(payload, secret))`.

use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::login_state::LoginState;

type HmacSha256 = Hmac<Sha256>;

/// Payload of the signed login-state cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginStateCookie {
    /// The `state` token this payload belongs to.
    pub state: String,
    /// The login state carried through the redirect.
    #[serde(flatten)]
    pub login_state: LoginState,
}

/// Encodes and signs a login-state cookie value.
///
/// Returns `None` only when JSON serialization fails, which would indicate
/// a malformed payload rather than a runtime condition.
#[must_use]
pub fn encode_login_state_cookie(payload: &LoginStateCookie, secret: &str) -> Option<String> {
    let json = serde_json::to_vec(payload).ok()?;
    let data = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(json);
    let signature = sign(data.as_bytes(), secret)?;
    Some(format!("{data}.{signature}"))
}

/// Verifies and decodes a login-state cookie value.
///
/// Returns `None` for missing segments, a bad signature (compared in
/// constant time), or an undecodable payload.
#[must_use]
pub fn decode_login_state_cookie(value: &str, secret: &str) -> Option<LoginStateCookie> {
    let (data, signature) = value.split_once('.')?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(data.as_bytes());
    let signature_bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(signature)
        .ok()?;
    // verify_slice compares in constant time.
    mac.verify_slice(&signature_bytes).ok()?;

    let json = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(data)
        .ok()?;
    serde_json::from_slice(&json).ok()
}

fn sign(data: &[u8], secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(data);
    let tag = mac.finalize().into_bytes();
    Some(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(tag))
}

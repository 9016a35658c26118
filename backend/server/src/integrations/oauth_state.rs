//! The OAuth `state` parameter. The provider redirects the browser back
//! without our bearer token, so the state itself has to say who connected.
//!
//! Format: `base64url(user_id.provider.expiry.nonce).hex(hmac)`
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use models::Provider;
use sha2::Sha256;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

pub const STATE_TTL_SECS: i64 = 600;

pub fn sign_state(secret: &str, user_id: &str, provider: Provider, now: DateTime<Utc>) -> String {
    let expiry = now.timestamp() + STATE_TTL_SECS;
    let nonce = uuid::Uuid::new_v4().simple();
    let payload = URL_SAFE_NO_PAD.encode(format!("{user_id}.{provider}.{expiry}.{nonce}"));

    let signature = hex::encode(mac(secret, &payload).finalize().into_bytes());

    format!("{payload}.{signature}")
}

/// Returns the user id the state was issued to.
pub fn verify_state(
    secret: &str,
    state: &str,
    provider: Provider,
    now: DateTime<Utc>,
) -> Result<String, AppError> {
    let (payload, signature) = state.split_once('.').ok_or(AppError::Unauthorized)?;
    let signature = hex::decode(signature).map_err(|_| AppError::Unauthorized)?;

    mac(secret, payload)
        .verify_slice(&signature)
        .map_err(|_| AppError::Unauthorized)?;

    let decoded = URL_SAFE_NO_PAD
        .decode(payload)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or(AppError::Unauthorized)?;

    // user ids may contain dots, so peel fields off the right
    let mut fields = decoded.rsplitn(4, '.');
    let (Some(_nonce), Some(expiry), Some(issued_for), Some(user_id)) =
        (fields.next(), fields.next(), fields.next(), fields.next())
    else {
        return Err(AppError::Unauthorized);
    };

    let expiry: i64 = expiry.parse().map_err(|_| AppError::Unauthorized)?;
    if expiry <= now.timestamp() || issued_for != provider.as_str() || user_id.is_empty() {
        return Err(AppError::Unauthorized);
    }

    Ok(user_id.to_string())
}

fn mac(secret: &str, payload: &str) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(b"oauth-state:");
    mac.update(payload.as_bytes());
    mac
}

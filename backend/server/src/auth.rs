//! # Auth
//!
//! Sessions belong to the hosted auth provider. We only verify the HS256
//! access token it hands the frontend and trust its `sub` as the user id.
//!
//! Tokens arrive as `Authorization: Bearer <jwt>`.
use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rusqlite::{Connection, params};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::{error::AppError, state::State};

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Deserialize)]
struct Header {
    alg: String,
}

pub fn verify_token(secret: &str, token: &str, now: DateTime<Utc>) -> Result<Claims, AppError> {
    let mut parts = token.split('.');
    let (Some(header_segment), Some(payload_segment), Some(signature), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AppError::Unauthorized);
    };

    let header: Header = decode_segment(header_segment)?;
    if header.alg != "HS256" {
        return Err(AppError::Unauthorized);
    }

    let signature = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| AppError::Unauthorized)?;

    let mut mac = mac(secret);
    mac.update(header_segment.as_bytes());
    mac.update(b".");
    mac.update(payload_segment.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| AppError::Unauthorized)?;

    let claims: Claims = decode_segment(payload_segment)?;
    if claims.exp <= now.timestamp() || claims.sub.is_empty() {
        return Err(AppError::Unauthorized);
    }

    Ok(claims)
}

/// Mints a token the way the auth provider does. Used by tests and dev tools.
pub fn issue_token(secret: &str, claims: &Claims) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims).unwrap_or_default());
    let signing_input = format!("{header}.{payload}");

    let mut mac = mac(secret);
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    format!("{signing_input}.{signature}")
}

fn mac(secret: &str) -> HmacSha256 {
    HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size")
}

fn decode_segment<T: for<'de> Deserialize<'de>>(segment: &str) -> Result<T, AppError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| AppError::Unauthorized)?;

    serde_json::from_slice(&bytes).map_err(|_| AppError::Unauthorized)
}

/// The caller, resolved from the bearer token. A profile row exists for
/// every `AuthUser` once extraction succeeds.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
}

impl FromRequestParts<Arc<State>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<State>,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        let claims = verify_token(&state.config.auth_jwt_secret, token.trim(), Utc::now())?;

        let user = AuthUser {
            id: claims.sub,
            email: claims.email,
        };
        state
            .database
            .call(|conn| ensure_profile(conn, &user, Utc::now()))?;

        Ok(user)
    }
}

pub fn ensure_profile(
    conn: &Connection,
    user: &AuthUser,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO profiles (id, email, created_at) VALUES (?1, ?2, ?3)
         ON CONFLICT (id) DO UPDATE SET email = COALESCE(excluded.email, profiles.email)",
        params![user.id, user.email, now],
    )?;

    Ok(())
}

//! # Payments
//!
//! Thin client over the payment processor's REST API (Stripe wire format).
//!
//! Only hosted checkout is used. A paid registration becomes a checkout
//! session, the attendee pays on the processor's page, and the result comes
//! back twice: as a signed webhook, and through the status poll the frontend
//! runs after the redirect. Both paths end in the same idempotent finalize.
//!
//! ## Webhook signatures
//! - Header: `Stripe-Signature: t=<unix>,v1=<hex>[,v1=<hex>...]`
//! - Signed content: `"{t}.{raw body}"`, HMAC-SHA256 keyed by the endpoint secret
//! - Deliveries older or newer than five minutes are rejected
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, warn};

use crate::{config::StripeConfig, error::AppError};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
pub const SIGNATURE_TOLERANCE_SECS: u64 = 300;
/// The processor refuses checkout sessions that expire sooner than this.
pub const MIN_CHECKOUT_MINUTES: i64 = 30;

pub struct PaymentClient {
    http: reqwest::Client,
    api_base: String,
    secret_key: String,
    webhook_secret: String,
}

#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub registration_id: String,
    pub event_id: String,
    pub event_title: String,
    pub amount_cents: u32,
    pub currency: String,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    /// `open`, `complete` or `expired`.
    pub status: Option<String>,
    /// `paid`, `unpaid` or `no_payment_required`.
    pub payment_status: String,
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub amount_total: Option<i64>,
}

impl CheckoutSession {
    pub fn is_paid(&self) -> bool {
        self.payment_status == "paid"
    }

    pub fn is_expired(&self) -> bool {
        self.status.as_deref() == Some("expired")
    }

    /// Our registration id candidates, most trusted first.
    pub fn registration_ids(&self) -> impl Iterator<Item = &str> {
        self.client_reference_id
            .as_deref()
            .into_iter()
            .chain(self.metadata.get("registration_id").map(String::as_str))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub object: serde_json::Value,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

impl PaymentClient {
    pub fn new(http: reqwest::Client, config: &StripeConfig) -> Self {
        Self {
            http,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            webhook_secret: config.webhook_secret.clone(),
        }
    }

    pub async fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, AppError> {
        let amount = request.amount_cents.to_string();
        let expires_at = request.expires_at.timestamp().to_string();

        let mut form = vec![
            ("mode", "payment"),
            ("client_reference_id", request.registration_id.as_str()),
            ("success_url", request.success_url.as_str()),
            ("cancel_url", request.cancel_url.as_str()),
            ("expires_at", expires_at.as_str()),
            ("line_items[0][quantity]", "1"),
            ("line_items[0][price_data][currency]", request.currency.as_str()),
            ("line_items[0][price_data][unit_amount]", amount.as_str()),
            (
                "line_items[0][price_data][product_data][name]",
                request.event_title.as_str(),
            ),
            ("metadata[registration_id]", request.registration_id.as_str()),
            ("metadata[event_id]", request.event_id.as_str()),
        ];
        if let Some(email) = &request.customer_email {
            form.push(("customer_email", email.as_str()));
        }

        let response = self
            .http
            .post(format!("{}/v1/checkout/sessions", self.api_base))
            .bearer_auth(&self.secret_key)
            .form(&form)
            .send()
            .await?;

        let session: CheckoutSession = read_response(response).await?;
        debug!("Created checkout session {}", session.id);

        Ok(session)
    }

    pub async fn retrieve_checkout_session(&self, id: &str) -> Result<CheckoutSession, AppError> {
        let response = self
            .http
            .get(format!("{}/v1/checkout/sessions/{id}", self.api_base))
            .bearer_auth(&self.secret_key)
            .send()
            .await?;

        read_response(response).await
    }

    pub fn verify_webhook_signature(
        &self,
        payload: &[u8],
        header: &str,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        verify_signature(&self.webhook_secret, payload, header, now)
    }
}

async fn read_response<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T, AppError> {
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&body)
            .map(|e| e.error.message)
            .unwrap_or(body);

        warn!("Payment processor returned {status}: {message}");
        return Err(AppError::Upstream(format!(
            "payment processor returned {status}"
        )));
    }

    Ok(response.json().await?)
}

pub fn verify_signature(
    secret: &str,
    payload: &[u8],
    header: &str,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let mut timestamp: Option<i64> = None;
    let mut signatures: Vec<Vec<u8>> = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse().ok(),
            Some(("v1", value)) => {
                if let Ok(bytes) = hex::decode(value) {
                    signatures.push(bytes);
                }
            }
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(AppError::InvalidSignature)?;
    if signatures.is_empty() {
        return Err(AppError::InvalidSignature);
    }

    if now.timestamp().abs_diff(timestamp) > SIGNATURE_TOLERANCE_SECS {
        warn!("Webhook timestamp {timestamp} outside tolerance");
        return Err(AppError::InvalidSignature);
    }

    let mac = signed_mac(secret, payload, timestamp);
    let valid = signatures
        .iter()
        .any(|signature| mac.clone().verify_slice(signature).is_ok());

    if valid {
        Ok(())
    } else {
        Err(AppError::InvalidSignature)
    }
}

/// Builds a `Stripe-Signature` header value for `payload`.
pub fn sign_payload(secret: &str, payload: &[u8], timestamp: i64) -> String {
    let signature = hex::encode(signed_mac(secret, payload, timestamp).finalize().into_bytes());

    format!("t={timestamp},v1={signature}")
}

fn signed_mac(secret: &str, payload: &[u8], timestamp: i64) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac
}

//! Payment processor webhooks.
//!
//! Every delivery is verified against the raw body before parsing. The event
//! id is recorded in the same transaction that applies the event, so a
//! redelivery either finds the id and does nothing, or the first attempt
//! rolled back and this one applies it.
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, StatusCode},
};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::{debug, info, warn};

use crate::{
    error::AppError,
    payments::{CheckoutSession, SIGNATURE_HEADER, WebhookEvent},
    registrations::{Finalized, expire_session, finalize_paid},
    state::State,
};

#[derive(Debug, PartialEq, Eq)]
pub enum WebhookOutcome {
    Replayed,
    Ignored,
    Finalized(Finalized),
    Released(bool),
}

pub fn apply_webhook(
    conn: &Connection,
    event: &WebhookEvent,
    now: DateTime<Utc>,
) -> Result<WebhookOutcome, AppError> {
    let inserted = conn.execute(
        "INSERT OR IGNORE INTO webhook_events (id, event_type, received_at) VALUES (?1, ?2, ?3)",
        params![event.id, event.event_type, now],
    )?;
    if inserted == 0 {
        info!("Webhook {} already processed", event.id);
        return Ok(WebhookOutcome::Replayed);
    }

    match event.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            let session = session_from(event)?;

            // Delayed payment methods complete unpaid and follow up later
            if !session.is_paid() {
                debug!("Session {} completed without payment yet", session.id);
                return Ok(WebhookOutcome::Ignored);
            }

            Ok(WebhookOutcome::Finalized(finalize_paid(conn, &session, now)?))
        }
        "checkout.session.expired" | "checkout.session.async_payment_failed" => {
            let session = session_from(event)?;

            Ok(WebhookOutcome::Released(expire_session(conn, &session, now)?))
        }
        other => {
            debug!("Ignoring webhook type {other}");
            Ok(WebhookOutcome::Ignored)
        }
    }
}

fn session_from(event: &WebhookEvent) -> Result<CheckoutSession, AppError> {
    serde_json::from_value(event.data.object.clone()).map_err(|e| {
        warn!("Webhook {} carries an unreadable session: {e}", event.id);
        AppError::MalformedPayload
    })
}

pub async fn payments_handler(
    AxumState(state): AxumState<Arc<State>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or(AppError::InvalidSignature)?;

    state
        .payments
        .verify_webhook_signature(&body, signature, Utc::now())
        .inspect_err(|_| warn!("Rejected webhook with a bad signature"))?;

    let event: WebhookEvent =
        serde_json::from_slice(&body).map_err(|_| AppError::MalformedPayload)?;

    let outcome = state
        .database
        .transaction(|tx| apply_webhook(tx, &event, Utc::now()))?;

    debug!("Webhook {} ({}) -> {outcome:?}", event.id, event.event_type);

    Ok(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;
    use models::{RegistrationStatus, payloads::CreateEvent};
    use serde_json::json;

    use super::*;
    use crate::{
        auth::{AuthUser, ensure_profile},
        clubs::{create_club, toggle_membership},
        database::Database,
        events::create_event,
        registrations::{Admission, admit, attach_checkout, get_registration},
    };

    fn pending_registration(database: &Database) -> String {
        database
            .transaction(|tx| {
                for id in ["admin", "runner"] {
                    let user = AuthUser {
                        id: id.into(),
                        email: None,
                    };
                    ensure_profile(tx, &user, Utc::now())?;
                }
                let club = create_club(tx, "Paid Club", "admin", Utc::now())?;
                toggle_membership(tx, &club.id, "runner", Utc::now())?;

                let payload = CreateEvent {
                    title: "Gala".into(),
                    group_id: None,
                    description: None,
                    sport: None,
                    location: None,
                    starts_at: Utc::now() + Duration::days(10),
                    ends_at: None,
                    capacity: Some(50),
                    waitlist_enabled: false,
                    price_cents: 4000,
                    published: true,
                };
                let event = create_event(tx, &club.id, "admin", &payload, "usd", Utc::now())?;

                let Admission::AwaitingCheckout { registration, .. } =
                    admit(tx, &event.id, "runner", Utc::now())?
                else {
                    return Err(AppError::Internal("expected a pending checkout".into()));
                };

                let session: CheckoutSession = serde_json::from_value(session_json(
                    "cs_test_a1",
                    &registration.id,
                    "open",
                    "unpaid",
                ))
                .map_err(|e| AppError::Internal(e.to_string()))?;
                attach_checkout(tx, &registration.id, &session, Utc::now())?;

                Ok(registration.id)
            })
            .unwrap()
    }

    fn session_json(id: &str, registration_id: &str, status: &str, paid: &str) -> serde_json::Value {
        json!({
            "id": id,
            "object": "checkout.session",
            "url": format!("https://checkout.example.com/{id}"),
            "status": status,
            "payment_status": paid,
            "client_reference_id": registration_id,
            "metadata": { "registration_id": registration_id },
            "amount_total": 4000,
        })
    }

    fn event(id: &str, event_type: &str, object: serde_json::Value) -> WebhookEvent {
        serde_json::from_value(json!({
            "id": id,
            "type": event_type,
            "data": { "object": object },
        }))
        .unwrap()
    }

    #[test]
    fn completed_confirms_once() {
        let database = Database::in_memory().unwrap();
        let registration_id = pending_registration(&database);
        let completed = event(
            "evt_1",
            "checkout.session.completed",
            session_json("cs_test_a1", &registration_id, "complete", "paid"),
        );

        let first = database
            .transaction(|tx| apply_webhook(tx, &completed, Utc::now()))
            .unwrap();
        assert!(matches!(first, WebhookOutcome::Finalized(Finalized::Confirmed(_))));

        let replay = database
            .transaction(|tx| apply_webhook(tx, &completed, Utc::now()))
            .unwrap();
        assert_eq!(replay, WebhookOutcome::Replayed);

        let registration = database
            .call(|conn| get_registration(conn, &registration_id))
            .unwrap();
        assert_eq!(registration.status, RegistrationStatus::Confirmed);
        assert_eq!(registration.amount_cents, 4000);
    }

    #[test]
    fn unpaid_completion_waits() {
        let database = Database::in_memory().unwrap();
        let registration_id = pending_registration(&database);
        let completed = event(
            "evt_2",
            "checkout.session.completed",
            session_json("cs_test_a1", &registration_id, "complete", "unpaid"),
        );

        let outcome = database
            .transaction(|tx| apply_webhook(tx, &completed, Utc::now()))
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);

        let registration = database
            .call(|conn| get_registration(conn, &registration_id))
            .unwrap();
        assert_eq!(registration.status, RegistrationStatus::Pending);
    }

    #[test]
    fn expired_releases_seat() {
        let database = Database::in_memory().unwrap();
        let registration_id = pending_registration(&database);
        let expired = event(
            "evt_3",
            "checkout.session.expired",
            session_json("cs_test_a1", &registration_id, "expired", "unpaid"),
        );

        let outcome = database
            .transaction(|tx| apply_webhook(tx, &expired, Utc::now()))
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Released(true));

        let registration = database
            .call(|conn| get_registration(conn, &registration_id))
            .unwrap();
        assert_eq!(registration.status, RegistrationStatus::Cancelled);
    }

    #[test]
    fn malformed_session_rolls_back_the_event_id() {
        let database = Database::in_memory().unwrap();
        pending_registration(&database);
        let broken = event("evt_4", "checkout.session.completed", json!({ "nope": true }));

        let result = database.transaction(|tx| apply_webhook(tx, &broken, Utc::now()));
        assert!(matches!(result, Err(AppError::MalformedPayload)));

        let recorded: bool = database
            .call(|conn| {
                Ok(conn.query_row(
                    "SELECT EXISTS (SELECT 1 FROM webhook_events WHERE id = 'evt_4')",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert!(!recorded);
    }

    #[test]
    fn unrelated_types_are_acknowledged() {
        let database = Database::in_memory().unwrap();
        let other = event("evt_5", "customer.created", json!({ "id": "cus_1" }));

        let outcome = database
            .transaction(|tx| apply_webhook(tx, &other, Utc::now()))
            .unwrap();
        assert_eq!(outcome, WebhookOutcome::Ignored);
    }
}

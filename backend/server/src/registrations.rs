//! # Registrations
//!
//! Capacity, waitlist and the paid-ticket handshake.
//!
//! ## Flow
//!
//! - Free event with a seat: the row goes straight to `confirmed`
//! - Full event: `waitlisted` when the event keeps a waitlist, 409 otherwise
//! - Paid event with a seat: the row is inserted as `pending` (which holds the
//!   seat), the transaction commits, and only then do we ask the payment
//!   processor for a checkout session. A failed request deletes the row again
//! - A repeat sign-up while that request is in flight gets the same row back
//!   instead of a second session
//! - The attendee pays on the processor's page and is redirected back with
//!   the session id. The frontend polls `/checkout/sessions/{id}` while the
//!   webhook lands. Both call [`finalize_paid`], which is idempotent
//! - Pending rows that never complete are released by the sweeper
//!
//! ## Capacity
//!
//! [`admit`] counts occupied seats and writes the row inside one
//! `BEGIN IMMEDIATE` transaction, so two sign-ups for the last seat serialize
//! on SQLite's write lock instead of both seeing a free seat.
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Duration, Utc};
use models::{Event, Registration, RegistrationStatus};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::{info, warn};

use crate::{
    auth::AuthUser,
    clubs::{is_admin, require_member},
    config::Config,
    database::{new_id, parse_column},
    error::AppError,
    events::{get_event, seat_counts},
    payments::{CheckoutRequest, CheckoutSession, MIN_CHECKOUT_MINUTES},
    state::State,
};

pub const REGISTRATION_COLUMNS: &str = "id, event_id, user_id, status, checkout_session_id,
    checkout_url, amount_cents, created_at, updated_at";

pub const REGISTRATION_COLUMNS_R: &str = "r.id, r.event_id, r.user_id, r.status,
    r.checkout_session_id, r.checkout_url, r.amount_cents, r.created_at, r.updated_at";

pub fn registration_from_row(row: &Row<'_>) -> rusqlite::Result<Registration> {
    Ok(Registration {
        id: row.get("id")?,
        event_id: row.get("event_id")?,
        user_id: row.get("user_id")?,
        status: parse_column(row, "status")?,
        checkout_session_id: row.get("checkout_session_id")?,
        checkout_url: row.get("checkout_url")?,
        amount_cents: row.get("amount_cents")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn find_one(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Option<Registration>, AppError> {
    Ok(conn
        .query_row(
            &format!("SELECT {REGISTRATION_COLUMNS} FROM registrations WHERE {filter}"),
            params,
            registration_from_row,
        )
        .optional()?)
}

pub fn get_registration(conn: &Connection, id: &str) -> Result<Registration, AppError> {
    find_one(conn, "id = ?1", [id])?.ok_or(AppError::NotFound("Registration"))
}

pub fn find_for_user(
    conn: &Connection,
    event_id: &str,
    user_id: &str,
) -> Result<Option<Registration>, AppError> {
    find_one(conn, "event_id = ?1 AND user_id = ?2", [event_id, user_id])
}

pub fn find_by_session(
    conn: &Connection,
    session_id: &str,
) -> Result<Option<Registration>, AppError> {
    find_one(conn, "checkout_session_id = ?1", [session_id])
}

fn set_status(
    conn: &Connection,
    id: &str,
    status: RegistrationStatus,
    now: DateTime<Utc>,
) -> Result<Registration, AppError> {
    conn.execute(
        "UPDATE registrations SET status = ?2, updated_at = ?3 WHERE id = ?1",
        params![id, status.as_str(), now],
    )?;

    get_registration(conn, id)
}

/// How long a pending row without a checkout URL counts as being worked on
/// by another request. Longer than the HTTP client timeout.
const CHECKOUT_CLAIM_SECS: i64 = 60;

/// Writes the caller's registration, reusing a cancelled or waitlisted row so
/// `(event_id, user_id)` stays unique. Reuse resets the queue position.
fn upsert(
    conn: &Connection,
    existing: Option<&Registration>,
    event_id: &str,
    user_id: &str,
    status: RegistrationStatus,
    amount_cents: u32,
    now: DateTime<Utc>,
) -> Result<Registration, AppError> {
    let id = match existing {
        Some(registration) => {
            conn.execute(
                "UPDATE registrations SET status = ?2, checkout_session_id = NULL,
                    checkout_url = NULL, amount_cents = ?3, created_at = ?4, updated_at = ?4
                 WHERE id = ?1",
                params![registration.id, status.as_str(), amount_cents, now],
            )?;
            registration.id.clone()
        }
        None => {
            let id = new_id();
            conn.execute(
                &format!(
                    "INSERT INTO registrations ({REGISTRATION_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, NULL, NULL, ?5, ?6, ?6)"
                ),
                params![id, event_id, user_id, status.as_str(), amount_cents, now],
            )?;
            id
        }
    };

    get_registration(conn, &id)
}

#[derive(Debug)]
pub enum Admission {
    /// Nothing changed, e.g. a pending checkout being resumed.
    Existing(Registration),
    /// Confirmed or waitlisted, no payment needed.
    Admitted(Registration),
    /// Pending row written, a checkout session still has to be created.
    /// `previous` is the row to restore if that fails, `None` meaning delete.
    AwaitingCheckout {
        registration: Registration,
        previous: Option<Registration>,
    },
}

/// The seat decision. Must run inside an immediate transaction.
pub fn admit(
    conn: &Connection,
    event_id: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<Admission, AppError> {
    let event = get_event(conn, event_id)?;
    if !event.is_open() {
        return Err(AppError::NotFound("Event"));
    }

    require_member(conn, &event.club_id, user_id)?;

    let existing = find_for_user(conn, event_id, user_id)?;
    if let Some(registration) = &existing {
        match registration.status {
            RegistrationStatus::Confirmed => return Err(AppError::AlreadyRegistered),
            RegistrationStatus::Pending if registration.checkout_url.is_some() => {
                return Ok(Admission::Existing(registration.clone()));
            }
            // Another request is still creating the checkout
            RegistrationStatus::Pending
                if now - registration.updated_at < Duration::seconds(CHECKOUT_CLAIM_SECS) =>
            {
                return Ok(Admission::Existing(registration.clone()));
            }
            // Checkout creation died midway, claim the row and try again
            RegistrationStatus::Pending => {
                let registration =
                    set_status(conn, &registration.id, RegistrationStatus::Pending, now)?;
                return Ok(Admission::AwaitingCheckout {
                    registration,
                    previous: None,
                });
            }
            _ => {}
        }
    }

    if event.starts_at <= now {
        return Err(AppError::Validation("Registration closed, the event has started".into()));
    }

    let occupied = seat_counts(conn, event_id)?.occupied();

    if !event.has_seat(occupied) {
        if let Some(registration) = existing
            .as_ref()
            .filter(|r| r.status == RegistrationStatus::Waitlisted)
        {
            return Ok(Admission::Existing(registration.clone()));
        }
        if !event.waitlist_enabled {
            return Err(AppError::EventFull);
        }

        let registration = upsert(
            conn,
            existing.as_ref(),
            event_id,
            user_id,
            RegistrationStatus::Waitlisted,
            0,
            now,
        )?;
        return Ok(Admission::Admitted(registration));
    }

    if event.is_free() {
        let registration = upsert(
            conn,
            existing.as_ref(),
            event_id,
            user_id,
            RegistrationStatus::Confirmed,
            0,
            now,
        )?;
        return Ok(Admission::Admitted(registration));
    }

    let registration = upsert(
        conn,
        existing.as_ref(),
        event_id,
        user_id,
        RegistrationStatus::Pending,
        event.price_cents,
        now,
    )?;

    Ok(Admission::AwaitingCheckout {
        registration,
        previous: existing,
    })
}

pub fn checkout_request(
    config: &Config,
    event: &Event,
    registration: &Registration,
    customer_email: Option<String>,
    now: DateTime<Utc>,
) -> CheckoutRequest {
    let public_url = config.public_url.trim_end_matches('/');
    let hold = config.pending_ttl_minutes.max(MIN_CHECKOUT_MINUTES);

    CheckoutRequest {
        registration_id: registration.id.clone(),
        event_id: event.id.clone(),
        event_title: event.title.clone(),
        amount_cents: event.price_cents,
        currency: event.currency.clone(),
        customer_email,
        success_url: format!(
            "{public_url}/events/{}/registered?session_id={{CHECKOUT_SESSION_ID}}",
            event.id
        ),
        cancel_url: format!("{public_url}/events/{}", event.id),
        expires_at: now + Duration::minutes(hold),
    }
}

pub fn attach_checkout(
    conn: &Connection,
    registration_id: &str,
    session: &CheckoutSession,
    now: DateTime<Utc>,
) -> Result<Registration, AppError> {
    conn.execute(
        "UPDATE registrations SET checkout_session_id = ?2, checkout_url = ?3, updated_at = ?4
         WHERE id = ?1",
        params![registration_id, session.id, session.url, now],
    )?;

    get_registration(conn, registration_id)
}

/// Undo of [`admit`] when no checkout session could be created. A row that
/// got a session from a concurrent request in the meantime is left alone.
fn revert_checkout(
    conn: &Connection,
    registration: &Registration,
    previous: Option<&Registration>,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    match previous {
        None => conn.execute(
            "DELETE FROM registrations WHERE id = ?1 AND checkout_session_id IS NULL",
            [&registration.id],
        )?,
        Some(previous) => conn.execute(
            "UPDATE registrations SET status = ?2, amount_cents = ?3, created_at = ?4,
                updated_at = ?5
             WHERE id = ?1 AND checkout_session_id IS NULL",
            params![
                registration.id,
                previous.status.as_str(),
                previous.amount_cents,
                previous.created_at,
                now
            ],
        )?,
    };

    Ok(())
}

/// Returns the registration and whether anything new was written.
pub async fn register(
    state: &State,
    event_id: &str,
    user: &AuthUser,
) -> Result<(Registration, bool), AppError> {
    let now = Utc::now();
    let admission = state
        .database
        .transaction(|tx| admit(tx, event_id, &user.id, now))?;

    let (registration, previous) = match admission {
        Admission::Existing(registration) => return Ok((registration, false)),
        Admission::Admitted(registration) => {
            info!(
                "Registration {} for event {event_id} is {}",
                registration.id, registration.status
            );
            return Ok((registration, true));
        }
        Admission::AwaitingCheckout {
            registration,
            previous,
        } => (registration, previous),
    };

    let event = state.database.call(|conn| get_event(conn, event_id))?;
    let request = checkout_request(&state.config, &event, &registration, user.email.clone(), now);

    match state.payments.create_checkout_session(&request).await {
        Ok(session) => {
            let registration = state
                .database
                .call(|conn| attach_checkout(conn, &registration.id, &session, Utc::now()))?;

            info!(
                "Registration {} awaiting payment in session {}",
                registration.id, session.id
            );
            Ok((registration, true))
        }
        Err(e) => {
            warn!("Checkout for registration {} failed: {e}", registration.id);
            state
                .database
                .transaction(|tx| revert_checkout(tx, &registration, previous.as_ref(), Utc::now()))?;
            Err(e)
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Finalized {
    Confirmed(Registration),
    /// Already confirmed, e.g. the webhook after the poll got there first.
    AlreadyConfirmed(Registration),
    /// Paid after being cancelled or expired. Money was taken, so it counts.
    Reinstated(Registration),
    Unknown,
}

fn registration_for_session(
    conn: &Connection,
    session: &CheckoutSession,
) -> Result<Option<Registration>, AppError> {
    for id in session.registration_ids() {
        if let Some(registration) = find_one(conn, "id = ?1", [id])? {
            return Ok(Some(registration));
        }
    }

    find_by_session(conn, &session.id)
}

/// Applies a paid checkout session. Safe to call any number of times.
pub fn finalize_paid(
    conn: &Connection,
    session: &CheckoutSession,
    now: DateTime<Utc>,
) -> Result<Finalized, AppError> {
    let Some(registration) = registration_for_session(conn, session)? else {
        warn!("Paid session {} matches no registration", session.id);
        return Ok(Finalized::Unknown);
    };

    if registration.status == RegistrationStatus::Confirmed {
        return Ok(Finalized::AlreadyConfirmed(registration));
    }

    let reinstated = registration.status != RegistrationStatus::Pending;
    if reinstated {
        warn!(
            "Registration {} was {} when session {} was paid, confirming anyway",
            registration.id, registration.status, session.id
        );
    }

    let amount_cents = session
        .amount_total
        .and_then(|amount| u32::try_from(amount).ok())
        .unwrap_or(registration.amount_cents);

    conn.execute(
        "UPDATE registrations SET status = 'confirmed', amount_cents = ?2,
            checkout_session_id = ?3, updated_at = ?4
         WHERE id = ?1",
        params![registration.id, amount_cents, session.id, now],
    )?;
    let registration = get_registration(conn, &registration.id)?;

    info!("Registration {} confirmed by session {}", registration.id, session.id);

    if reinstated {
        Ok(Finalized::Reinstated(registration))
    } else {
        Ok(Finalized::Confirmed(registration))
    }
}

/// Cancels a pending registration and hands its seat on. Returns whether
/// anything was released.
pub fn release_pending(
    conn: &Connection,
    registration: &Registration,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    if registration.status != RegistrationStatus::Pending {
        return Ok(false);
    }

    set_status(conn, &registration.id, RegistrationStatus::Cancelled, now)?;
    let event = get_event(conn, &registration.event_id)?;
    promote_waitlist(conn, &event, now)?;

    Ok(true)
}

/// Applies an expired checkout session.
pub fn expire_session(
    conn: &Connection,
    session: &CheckoutSession,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    let Some(registration) = registration_for_session(conn, session)? else {
        return Ok(false);
    };

    // A newer checkout may have replaced this one
    if registration
        .checkout_session_id
        .as_deref()
        .is_some_and(|id| id != session.id)
    {
        return Ok(false);
    }

    release_pending(conn, &registration, now)
}

pub fn cancel_registration(
    conn: &Connection,
    registration: &Registration,
    now: DateTime<Utc>,
) -> Result<Registration, AppError> {
    if registration.status == RegistrationStatus::Cancelled {
        return Ok(registration.clone());
    }

    let cancelled = set_status(conn, &registration.id, RegistrationStatus::Cancelled, now)?;

    if registration.status.occupies_seat() {
        let event = get_event(conn, &registration.event_id)?;
        promote_waitlist(conn, &event, now)?;
    }

    Ok(cancelled)
}

/// Moves the oldest waitlisted registrations into free seats. Only free
/// events promote automatically, a paid waitlist entry has to check out.
pub fn promote_waitlist(
    conn: &Connection,
    event: &Event,
    now: DateTime<Utc>,
) -> Result<Vec<String>, AppError> {
    if !event.is_free() || !event.is_open() || event.starts_at <= now {
        return Ok(Vec::new());
    }

    let occupied = seat_counts(conn, &event.id)?.occupied();
    let limit: i64 = match event.seats_left(occupied) {
        Some(0) => return Ok(Vec::new()),
        Some(seats) => i64::from(seats),
        None => -1,
    };

    let promoted = {
        let mut statement = conn.prepare(
            "SELECT id FROM registrations WHERE event_id = ?1 AND status = 'waitlisted'
             ORDER BY created_at LIMIT ?2",
        )?;
        statement
            .query_map(params![event.id, limit], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?
    };

    for id in &promoted {
        set_status(conn, id, RegistrationStatus::Confirmed, now)?;
        info!("Registration {id} promoted from the waitlist of {}", event.id);
    }

    Ok(promoted)
}

/// Releases pending registrations untouched for `ttl_minutes`.
pub fn expire_stale_pending(
    conn: &Connection,
    now: DateTime<Utc>,
    ttl_minutes: i64,
) -> Result<usize, AppError> {
    let cutoff = now - Duration::minutes(ttl_minutes);

    let stale = {
        let mut statement = conn.prepare(&format!(
            "SELECT {REGISTRATION_COLUMNS} FROM registrations
             WHERE status = 'pending' AND updated_at < ?1"
        ))?;
        statement
            .query_map([cutoff], registration_from_row)?
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut released = 0;
    for registration in &stale {
        if release_pending(conn, registration, now)? {
            released += 1;
        }
    }

    Ok(released)
}

/// Owners see their own rows, club admins see every row of their events.
fn readable(
    conn: &Connection,
    registration: &Registration,
    user_id: &str,
) -> Result<bool, AppError> {
    if registration.user_id == user_id {
        return Ok(true);
    }

    let event = get_event(conn, &registration.event_id)?;
    is_admin(conn, &event.club_id, user_id)
}

pub async fn register_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(event_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (registration, created) = register(&state, &event_id, &user).await?;
    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((status, Json(registration)))
}

pub async fn mine_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(event_id): Path<String>,
) -> Result<Json<Registration>, AppError> {
    let registration = state
        .database
        .call(|conn| find_for_user(conn, &event_id, &user.id))?
        .ok_or(AppError::NotFound("Registration"))?;

    Ok(Json(registration))
}

pub async fn get_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(registration_id): Path<String>,
) -> Result<Json<Registration>, AppError> {
    let registration = state.database.call(|conn| {
        let registration = get_registration(conn, &registration_id)?;
        if !readable(conn, &registration, &user.id)? {
            return Err(AppError::NotFound("Registration"));
        }
        Ok(registration)
    })?;

    Ok(Json(registration))
}

pub async fn cancel_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(registration_id): Path<String>,
) -> Result<Json<Registration>, AppError> {
    let registration = state.database.transaction(|tx| {
        let registration = get_registration(tx, &registration_id)?;
        if !readable(tx, &registration, &user.id)? {
            return Err(AppError::NotFound("Registration"));
        }
        cancel_registration(tx, &registration, Utc::now())
    })?;

    info!("Registration {} cancelled by {}", registration.id, user.id);

    Ok(Json(registration))
}

/// Polled by the return page. Pending rows are reconciled against the
/// processor, so a late webhook does not leave the attendee waiting.
pub async fn checkout_status_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(session_id): Path<String>,
) -> Result<Json<Registration>, AppError> {
    let registration = state
        .database
        .call(|conn| find_by_session(conn, &session_id))?
        .filter(|registration| registration.user_id == user.id)
        .ok_or(AppError::NotFound("Checkout session"))?;

    if registration.status != RegistrationStatus::Pending {
        return Ok(Json(registration));
    }

    match state.payments.retrieve_checkout_session(&session_id).await {
        Ok(session) if session.is_paid() => {
            state
                .database
                .transaction(|tx| finalize_paid(tx, &session, Utc::now()))?;
        }
        Ok(session) if session.is_expired() => {
            state
                .database
                .transaction(|tx| expire_session(tx, &session, Utc::now()))?;
        }
        Ok(_) => {}
        Err(e) => warn!("Could not reconcile session {session_id}: {e}"),
    }

    let registration = state
        .database
        .call(|conn| get_registration(conn, &registration.id))?;

    Ok(Json(registration))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use models::payloads::CreateEvent;

    use super::*;
    use crate::{
        auth::ensure_profile,
        clubs::{create_club, toggle_membership},
        database::Database,
        events::create_event,
    };

    struct Fixture {
        database: Database,
        club_id: String,
    }

    impl Fixture {
        fn new(members: &[&str]) -> Self {
            let database = Database::in_memory().unwrap();

            let club_id = database
                .transaction(|tx| {
                    for id in std::iter::once(&"admin").chain(members) {
                        let user = AuthUser {
                            id: id.to_string(),
                            email: None,
                        };
                        ensure_profile(tx, &user, Utc::now())?;
                    }

                    let club = create_club(tx, "Test Club", "admin", Utc::now())?;
                    for id in members {
                        toggle_membership(tx, &club.id, id, Utc::now())?;
                    }
                    Ok(club.id)
                })
                .unwrap();

            Self { database, club_id }
        }

        fn event(&self, capacity: Option<u32>, waitlist: bool, price_cents: u32) -> Event {
            let payload = CreateEvent {
                title: "Intervals".into(),
                group_id: None,
                description: None,
                sport: None,
                location: None,
                starts_at: Utc::now() + Duration::days(3),
                ends_at: None,
                capacity,
                waitlist_enabled: waitlist,
                price_cents,
                published: true,
            };

            self.database
                .transaction(|tx| create_event(tx, &self.club_id, "admin", &payload, "usd", Utc::now()))
                .unwrap()
        }

        fn admit(&self, event: &Event, user: &str) -> Result<Admission, AppError> {
            self.database
                .transaction(|tx| admit(tx, &event.id, user, Utc::now()))
        }

        fn admitted(&self, event: &Event, user: &str) -> Registration {
            match self.admit(event, user).unwrap() {
                Admission::Admitted(registration)
                | Admission::Existing(registration)
                | Admission::AwaitingCheckout { registration, .. } => registration,
            }
        }
    }

    fn paid_session(id: &str, registration_id: &str) -> CheckoutSession {
        CheckoutSession {
            id: id.into(),
            url: Some(format!("https://checkout.example.com/{id}")),
            status: Some("complete".into()),
            payment_status: "paid".into(),
            client_reference_id: Some(registration_id.into()),
            metadata: HashMap::new(),
            amount_total: Some(2500),
        }
    }

    #[test]
    fn free_event_confirms_until_full() {
        let fixture = Fixture::new(&["a", "b", "c"]);
        let event = fixture.event(Some(2), false, 0);

        assert_eq!(fixture.admitted(&event, "a").status, RegistrationStatus::Confirmed);
        assert_eq!(fixture.admitted(&event, "b").status, RegistrationStatus::Confirmed);
        assert!(matches!(fixture.admit(&event, "c"), Err(AppError::EventFull)));
    }

    #[test]
    fn full_event_with_waitlist() {
        let fixture = Fixture::new(&["a", "b", "c"]);
        let event = fixture.event(Some(1), true, 0);

        fixture.admitted(&event, "a");
        let b = fixture.admitted(&event, "b");
        assert_eq!(b.status, RegistrationStatus::Waitlisted);

        // asking again while still full changes nothing
        assert!(matches!(
            fixture.admit(&event, "b").unwrap(),
            Admission::Existing(r) if r.id == b.id
        ));

        let c = fixture.admitted(&event, "c");
        assert_eq!(c.status, RegistrationStatus::Waitlisted);
    }

    #[test]
    fn double_registration_is_rejected() {
        let fixture = Fixture::new(&["a"]);
        let event = fixture.event(None, false, 0);

        fixture.admitted(&event, "a");
        assert!(matches!(
            fixture.admit(&event, "a"),
            Err(AppError::AlreadyRegistered)
        ));
    }

    #[test]
    fn outsiders_cannot_register() {
        let fixture = Fixture::new(&[]);
        let event = fixture.event(None, false, 0);

        fixture
            .database
            .call(|conn| {
                let user = AuthUser {
                    id: "stranger".into(),
                    email: None,
                };
                ensure_profile(conn, &user, Utc::now())
            })
            .unwrap();

        assert!(matches!(
            fixture.admit(&event, "stranger"),
            Err(AppError::Forbidden)
        ));
    }

    #[test]
    fn cancellation_promotes_oldest_waitlisted() {
        let fixture = Fixture::new(&["a", "b", "c"]);
        let event = fixture.event(Some(1), true, 0);

        let a = fixture.admitted(&event, "a");
        let b = fixture.admitted(&event, "b");
        let c = fixture.admitted(&event, "c");

        fixture
            .database
            .transaction(|tx| {
                cancel_registration(tx, &a, Utc::now())?;

                assert_eq!(get_registration(tx, &b.id)?.status, RegistrationStatus::Confirmed);
                assert_eq!(get_registration(tx, &c.id)?.status, RegistrationStatus::Waitlisted);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn cancelled_row_is_reused() {
        let fixture = Fixture::new(&["a"]);
        let event = fixture.event(Some(5), false, 0);

        let first = fixture.admitted(&event, "a");
        fixture
            .database
            .transaction(|tx| cancel_registration(tx, &first, Utc::now()))
            .unwrap();

        let second = fixture.admitted(&event, "a");
        assert_eq!(second.id, first.id);
        assert_eq!(second.status, RegistrationStatus::Confirmed);
    }

    #[test]
    fn paid_event_holds_a_pending_seat() {
        let fixture = Fixture::new(&["a", "b"]);
        let event = fixture.event(Some(1), false, 2500);

        let (registration, previous) = match fixture.admit(&event, "a").unwrap() {
            Admission::AwaitingCheckout {
                registration,
                previous,
            } => (registration, previous),
            other => panic!("expected a pending checkout, got {other:?}"),
        };
        assert_eq!(registration.status, RegistrationStatus::Pending);
        assert_eq!(registration.amount_cents, 2500);
        assert_eq!(previous, None);

        assert!(matches!(fixture.admit(&event, "b"), Err(AppError::EventFull)));
    }

    #[test]
    fn pending_with_checkout_is_resumed() {
        let fixture = Fixture::new(&["a"]);
        let event = fixture.event(None, false, 2500);

        let pending = fixture.admitted(&event, "a");
        fixture
            .database
            .call(|conn| attach_checkout(conn, &pending.id, &paid_session("cs_1", &pending.id), Utc::now()))
            .unwrap();

        assert!(matches!(
            fixture.admit(&event, "a").unwrap(),
            Admission::Existing(r) if r.checkout_session_id.as_deref() == Some("cs_1")
        ));
    }

    #[test]
    fn failed_checkout_removes_the_hold() {
        let fixture = Fixture::new(&["a"]);
        let event = fixture.event(Some(1), false, 2500);

        let pending = fixture.admitted(&event, "a");
        fixture
            .database
            .transaction(|tx| revert_checkout(tx, &pending, None, Utc::now()))
            .unwrap();

        let counts = fixture
            .database
            .call(|conn| seat_counts(conn, &event.id))
            .unwrap();
        assert_eq!(counts.occupied(), 0);
    }

    #[test]
    fn in_flight_checkout_is_not_started_twice() {
        let fixture = Fixture::new(&["a"]);
        let event = fixture.event(Some(2), false, 2500);
        let pending = fixture.admitted(&event, "a");

        let again = |at| {
            fixture
                .database
                .transaction(|tx| admit(tx, &event.id, "a", at))
                .unwrap()
        };

        assert!(matches!(
            again(Utc::now() + Duration::seconds(5)),
            Admission::Existing(r) if r.id == pending.id && r.checkout_url.is_none()
        ));

        // a request that died without a session is retried once the claim lapses
        let later = Utc::now() + Duration::minutes(2);
        match again(later) {
            Admission::AwaitingCheckout {
                registration,
                previous: None,
            } => {
                assert_eq!(registration.id, pending.id);
                assert_eq!(registration.updated_at, later);
            }
            other => panic!("expected a retried checkout, got {other:?}"),
        }
        assert!(matches!(
            again(later + Duration::seconds(1)),
            Admission::Existing(_)
        ));
    }

    #[test]
    fn failed_retry_keeps_a_row_with_a_live_session() {
        let fixture = Fixture::new(&["a"]);
        let event = fixture.event(Some(1), false, 2500);
        let pending = fixture.admitted(&event, "a");

        fixture
            .database
            .transaction(|tx| {
                attach_checkout(tx, &pending.id, &paid_session("cs_live", &pending.id), Utc::now())?;
                revert_checkout(tx, &pending, None, Utc::now())?;

                let kept = get_registration(tx, &pending.id)?;
                assert_eq!(kept.status, RegistrationStatus::Pending);
                assert_eq!(kept.checkout_session_id.as_deref(), Some("cs_live"));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn failed_checkout_keeps_waitlist_position() {
        let fixture = Fixture::new(&["a", "b"]);
        let event = fixture.event(Some(1), true, 2500);

        let pending = fixture.admitted(&event, "a");
        let waiting = fixture.admitted(&event, "b");
        assert_eq!(waiting.status, RegistrationStatus::Waitlisted);

        fixture
            .database
            .transaction(|tx| {
                let mut session = paid_session("cs_gone", &pending.id);
                attach_checkout(tx, &pending.id, &session, Utc::now())?;
                session.status = Some("expired".into());
                session.payment_status = "unpaid".into();
                expire_session(tx, &session, Utc::now())?;
                Ok(())
            })
            .unwrap();

        let later = Utc::now() + Duration::minutes(5);
        let (registration, previous) = match fixture
            .database
            .transaction(|tx| admit(tx, &event.id, "b", later))
            .unwrap()
        {
            Admission::AwaitingCheckout {
                registration,
                previous,
            } => (registration, previous),
            other => panic!("expected a pending checkout, got {other:?}"),
        };
        assert_eq!(registration.created_at, later);

        let restored = fixture
            .database
            .transaction(|tx| {
                revert_checkout(tx, &registration, previous.as_ref(), Utc::now())?;
                get_registration(tx, &waiting.id)
            })
            .unwrap();
        assert_eq!(restored.status, RegistrationStatus::Waitlisted);
        assert_eq!(restored.created_at, waiting.created_at);
        assert_eq!(restored.amount_cents, waiting.amount_cents);
    }

    #[test]
    fn finalize_is_idempotent() {
        let fixture = Fixture::new(&["a"]);
        let event = fixture.event(Some(10), false, 2500);
        let pending = fixture.admitted(&event, "a");
        let session = paid_session("cs_paid", &pending.id);

        fixture
            .database
            .transaction(|tx| {
                attach_checkout(tx, &pending.id, &session, Utc::now())?;

                let first = finalize_paid(tx, &session, Utc::now())?;
                assert!(matches!(&first, Finalized::Confirmed(r) if r.amount_cents == 2500));

                let second = finalize_paid(tx, &session, Utc::now())?;
                assert!(matches!(second, Finalized::AlreadyConfirmed(_)));

                assert_eq!(seat_counts(tx, &event.id)?.confirmed, 1);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn finalize_falls_back_to_session_id() {
        let fixture = Fixture::new(&["a"]);
        let event = fixture.event(None, false, 1000);
        let pending = fixture.admitted(&event, "a");

        fixture
            .database
            .transaction(|tx| {
                let mut session = paid_session("cs_lookup", &pending.id);
                attach_checkout(tx, &pending.id, &session, Utc::now())?;

                session.client_reference_id = None;
                assert!(matches!(
                    finalize_paid(tx, &session, Utc::now())?,
                    Finalized::Confirmed(_)
                ));

                let stranger = paid_session("cs_other", "nope");
                assert_eq!(finalize_paid(tx, &stranger, Utc::now())?, Finalized::Unknown);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn stale_client_reference_falls_back_to_metadata() {
        let fixture = Fixture::new(&["a"]);
        let event = fixture.event(None, false, 1000);
        let pending = fixture.admitted(&event, "a");

        let mut session = paid_session("cs_unattached", "deleted-registration");
        session
            .metadata
            .insert("registration_id".into(), pending.id.clone());

        let finalized = fixture
            .database
            .transaction(|tx| finalize_paid(tx, &session, Utc::now()))
            .unwrap();
        assert!(matches!(
            finalized,
            Finalized::Confirmed(r) if r.id == pending.id
        ));
    }

    #[test]
    fn payment_after_expiry_reinstates() {
        let fixture = Fixture::new(&["a"]);
        let event = fixture.event(Some(3), false, 2500);
        let pending = fixture.admitted(&event, "a");

        fixture
            .database
            .transaction(|tx| {
                let later = Utc::now() + Duration::minutes(45);
                assert_eq!(expire_stale_pending(tx, later, 30)?, 1);
                assert_eq!(
                    get_registration(tx, &pending.id)?.status,
                    RegistrationStatus::Cancelled
                );

                let session = paid_session("cs_late", &pending.id);
                assert!(matches!(
                    finalize_paid(tx, &session, later)?,
                    Finalized::Reinstated(r) if r.status == RegistrationStatus::Confirmed
                ));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn sweeper_leaves_fresh_pending_rows() {
        let fixture = Fixture::new(&["a"]);
        let event = fixture.event(Some(3), false, 2500);
        fixture.admitted(&event, "a");

        let released = fixture
            .database
            .transaction(|tx| expire_stale_pending(tx, Utc::now(), 30))
            .unwrap();
        assert_eq!(released, 0);
    }

    #[test]
    fn expired_session_frees_seat_for_free_waitlist_only() {
        let fixture = Fixture::new(&["a", "b"]);
        let event = fixture.event(Some(1), true, 2500);

        let pending = fixture.admitted(&event, "a");
        let waiting = fixture.admitted(&event, "b");
        assert_eq!(waiting.status, RegistrationStatus::Waitlisted);

        fixture
            .database
            .transaction(|tx| {
                let mut session = paid_session("cs_exp", &pending.id);
                attach_checkout(tx, &pending.id, &session, Utc::now())?;
                session.status = Some("expired".into());
                session.payment_status = "unpaid".into();

                assert!(expire_session(tx, &session, Utc::now())?);
                // paid events never auto-promote
                assert_eq!(
                    get_registration(tx, &waiting.id)?.status,
                    RegistrationStatus::Waitlisted
                );
                Ok(())
            })
            .unwrap();

        // the waitlisted attendee can now check out themselves
        assert!(matches!(
            fixture.admit(&event, "b").unwrap(),
            Admission::AwaitingCheckout {
                previous: Some(Registration {
                    status: RegistrationStatus::Waitlisted,
                    ..
                }),
                ..
            }
        ));
    }

    #[test]
    fn checkout_request_urls() {
        let fixture = Fixture::new(&["a"]);
        let event = fixture.event(None, false, 1500);
        let pending = fixture.admitted(&event, "a");

        let config = crate::test_support::config("http://unused", "http://unused");
        let request = checkout_request(&config, &event, &pending, None, Utc::now());

        assert_eq!(request.amount_cents, 1500);
        assert_eq!(
            request.success_url,
            format!(
                "http://localhost:5173/events/{}/registered?session_id={{CHECKOUT_SESSION_ID}}",
                event.id
            )
        );
        assert!(request.expires_at > Utc::now() + Duration::minutes(29));
    }
}

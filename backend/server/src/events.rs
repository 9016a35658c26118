//! Event admin CRUD and listings.
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use models::{
    Event, RegistrationStatus, slugify,
    payloads::{CreateEvent, EventDetails, EventQuery, RosterEntry, UpdateEvent},
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::info;

use crate::{
    auth::AuthUser,
    clubs::{find_by_slug, is_admin, require_admin},
    database::new_id,
    error::AppError,
    groups::get_group,
    registrations::{self, registration_from_row},
    state::State,
};

const EVENT_COLUMNS: &str = "id, club_id, group_id, organizer_id, title, slug, description, sport,
    location, starts_at, ends_at, capacity, waitlist_enabled, price_cents, currency, published,
    cancelled, created_at";

pub fn event_from_row(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get("id")?,
        club_id: row.get("club_id")?,
        group_id: row.get("group_id")?,
        organizer_id: row.get("organizer_id")?,
        title: row.get("title")?,
        slug: row.get("slug")?,
        description: row.get("description")?,
        sport: row.get("sport")?,
        location: row.get("location")?,
        starts_at: row.get("starts_at")?,
        ends_at: row.get("ends_at")?,
        capacity: row.get("capacity")?,
        waitlist_enabled: row.get("waitlist_enabled")?,
        price_cents: row.get("price_cents")?,
        currency: row.get("currency")?,
        published: row.get("published")?,
        cancelled: row.get("cancelled")?,
        created_at: row.get("created_at")?,
    })
}

pub fn get_event(conn: &Connection, event_id: &str) -> Result<Event, AppError> {
    conn.query_row(
        &format!("SELECT {EVENT_COLUMNS} FROM events WHERE id = ?1"),
        [event_id],
        event_from_row,
    )
    .optional()?
    .ok_or(AppError::NotFound("Event"))
}

/// Loads an event the caller may see. Drafts exist only for club admins.
pub fn visible_event(conn: &Connection, event_id: &str, user_id: &str) -> Result<Event, AppError> {
    let event = get_event(conn, event_id)?;

    if !event.published && !is_admin(conn, &event.club_id, user_id)? {
        return Err(AppError::NotFound("Event"));
    }

    Ok(event)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeatCounts {
    pub confirmed: u32,
    pub pending: u32,
    pub waitlisted: u32,
}

impl SeatCounts {
    pub fn occupied(&self) -> u32 {
        self.confirmed + self.pending
    }
}

pub fn seat_counts(conn: &Connection, event_id: &str) -> Result<SeatCounts, AppError> {
    let mut statement = conn.prepare(
        "SELECT status, COUNT(*) FROM registrations WHERE event_id = ?1 GROUP BY status",
    )?;
    let mut rows = statement.query([event_id])?;

    let mut counts = SeatCounts::default();
    while let Some(row) = rows.next()? {
        let status: String = row.get(0)?;
        let count: u32 = row.get(1)?;

        match status.parse::<RegistrationStatus>() {
            Ok(RegistrationStatus::Confirmed) => counts.confirmed = count,
            Ok(RegistrationStatus::Pending) => counts.pending = count,
            Ok(RegistrationStatus::Waitlisted) => counts.waitlisted = count,
            _ => {}
        }
    }

    Ok(counts)
}

pub fn details(conn: &Connection, event: Event) -> Result<EventDetails, AppError> {
    let counts = seat_counts(conn, &event.id)?;

    Ok(EventDetails {
        seats_left: event.seats_left(counts.occupied()),
        confirmed_count: counts.confirmed,
        pending_count: counts.pending,
        waitlist_count: counts.waitlisted,
        event,
    })
}

fn validate_schedule(
    title: &str,
    starts_at: DateTime<Utc>,
    ends_at: Option<DateTime<Utc>>,
    capacity: Option<u32>,
) -> Result<(), AppError> {
    if title.trim().is_empty() {
        return Err(AppError::Validation("Title is required".into()));
    }
    if ends_at.is_some_and(|ends_at| ends_at <= starts_at) {
        return Err(AppError::Validation("Event must end after it starts".into()));
    }
    if capacity == Some(0) {
        return Err(AppError::Validation("Capacity must be positive".into()));
    }

    Ok(())
}

/// `slug`, then `slug-2`, `slug-3`... until one is free in the club.
fn unique_slug(conn: &Connection, club_id: &str, title: &str) -> Result<String, AppError> {
    let base = match slugify(title) {
        slug if slug.is_empty() => "event".to_string(),
        slug => slug,
    };

    let mut candidate = base.clone();
    let mut suffix = 1;
    loop {
        let taken: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM events WHERE club_id = ?1 AND slug = ?2)",
            [club_id, candidate.as_str()],
            |row| row.get(0),
        )?;
        if !taken {
            return Ok(candidate);
        }

        suffix += 1;
        candidate = format!("{base}-{suffix}");
    }
}

pub fn create_event(
    conn: &Connection,
    club_id: &str,
    organizer_id: &str,
    payload: &CreateEvent,
    currency: &str,
    now: DateTime<Utc>,
) -> Result<Event, AppError> {
    validate_schedule(&payload.title, payload.starts_at, payload.ends_at, payload.capacity)?;

    if let Some(group_id) = &payload.group_id {
        let group = get_group(conn, group_id)?;
        if group.club_id != club_id {
            return Err(AppError::Validation("Group belongs to another club".into()));
        }
    }

    let event = Event {
        id: new_id(),
        club_id: club_id.to_string(),
        group_id: payload.group_id.clone(),
        organizer_id: organizer_id.to_string(),
        title: payload.title.trim().to_string(),
        slug: unique_slug(conn, club_id, &payload.title)?,
        description: payload.description.clone(),
        sport: payload.sport.clone(),
        location: payload.location.clone(),
        starts_at: payload.starts_at,
        ends_at: payload.ends_at,
        capacity: payload.capacity,
        waitlist_enabled: payload.waitlist_enabled,
        price_cents: payload.price_cents,
        currency: currency.to_string(),
        published: payload.published,
        cancelled: false,
        created_at: now,
    };

    conn.execute(
        &format!(
            "INSERT INTO events ({EVENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)"
        ),
        params![
            event.id,
            event.club_id,
            event.group_id,
            event.organizer_id,
            event.title,
            event.slug,
            event.description,
            event.sport,
            event.location,
            event.starts_at,
            event.ends_at,
            event.capacity,
            event.waitlist_enabled,
            event.price_cents,
            event.currency,
            event.published,
            event.cancelled,
            event.created_at,
        ],
    )?;

    Ok(event)
}

pub fn list_events(
    conn: &Connection,
    club_id: &str,
    include_hidden: bool,
    starting_after: Option<DateTime<Utc>>,
) -> Result<Vec<Event>, AppError> {
    let mut statement = conn.prepare(&format!(
        "SELECT {EVENT_COLUMNS} FROM events
         WHERE club_id = ?1
           AND (?2 OR (published AND NOT cancelled))
           AND (?3 IS NULL OR starts_at >= ?3)
         ORDER BY starts_at"
    ))?;

    let events = statement
        .query_map(params![club_id, include_hidden, starting_after], event_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

/// Applies a partial update. Capacity may not drop below the seats already
/// held, and any seats it frees go to the waitlist.
pub fn update_event(
    conn: &Connection,
    mut event: Event,
    update: &UpdateEvent,
    now: DateTime<Utc>,
) -> Result<Event, AppError> {
    if let Some(title) = &update.title {
        event.title = title.trim().to_string();
    }
    if let Some(description) = &update.description {
        event.description = Some(description.clone());
    }
    if let Some(sport) = &update.sport {
        event.sport = Some(sport.clone());
    }
    if let Some(location) = &update.location {
        event.location = Some(location.clone());
    }
    if let Some(starts_at) = update.starts_at {
        event.starts_at = starts_at;
    }
    if let Some(ends_at) = update.ends_at {
        event.ends_at = Some(ends_at);
    }
    if let Some(capacity) = update.capacity {
        event.capacity = capacity;
    }
    if let Some(waitlist_enabled) = update.waitlist_enabled {
        event.waitlist_enabled = waitlist_enabled;
    }
    if let Some(price_cents) = update.price_cents {
        event.price_cents = price_cents;
    }
    if let Some(published) = update.published {
        event.published = published;
    }

    validate_schedule(&event.title, event.starts_at, event.ends_at, event.capacity)?;

    let occupied = seat_counts(conn, &event.id)?.occupied();
    if event.capacity.is_some_and(|capacity| capacity < occupied) {
        return Err(AppError::Conflict(format!(
            "Capacity cannot drop below the {occupied} seats already taken"
        )));
    }

    conn.execute(
        "UPDATE events SET title = ?2, description = ?3, sport = ?4, location = ?5,
            starts_at = ?6, ends_at = ?7, capacity = ?8, waitlist_enabled = ?9,
            price_cents = ?10, published = ?11
         WHERE id = ?1",
        params![
            event.id,
            event.title,
            event.description,
            event.sport,
            event.location,
            event.starts_at,
            event.ends_at,
            event.capacity,
            event.waitlist_enabled,
            event.price_cents,
            event.published,
        ],
    )?;

    registrations::promote_waitlist(conn, &event, now)?;

    Ok(event)
}

/// Marks the event cancelled and releases everyone who has not paid.
/// Confirmed attendees keep their row so organisers can refund them.
pub fn cancel_event(conn: &Connection, event: &Event, now: DateTime<Utc>) -> Result<usize, AppError> {
    conn.execute("UPDATE events SET cancelled = 1 WHERE id = ?1", [&event.id])?;

    let released = conn.execute(
        "UPDATE registrations SET status = 'cancelled', updated_at = ?2
         WHERE event_id = ?1 AND status IN ('pending', 'waitlisted')",
        params![event.id, now],
    )?;

    Ok(released)
}

pub fn roster(conn: &Connection, event_id: &str) -> Result<Vec<RosterEntry>, AppError> {
    let mut statement = conn.prepare(&format!(
        "SELECT {}, p.display_name FROM registrations r
         JOIN profiles p ON p.id = r.user_id
         WHERE r.event_id = ?1
         ORDER BY r.created_at",
        registrations::REGISTRATION_COLUMNS_R
    ))?;

    let entries = statement
        .query_map([event_id], |row| {
            Ok(RosterEntry {
                registration: registration_from_row(row)?,
                display_name: row.get("display_name")?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(entries)
}

pub async fn create_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(slug): Path<String>,
    Json(payload): Json<CreateEvent>,
) -> Result<impl IntoResponse, AppError> {
    let event = state.database.transaction(|tx| {
        let club = find_by_slug(tx, &slug)?;
        require_admin(tx, &club.id, &user.id)?;
        create_event(tx, &club.id, &user.id, &payload, &state.config.currency, Utc::now())
    })?;

    info!("Event {} created in club {slug}", event.id);

    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn list_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(slug): Path<String>,
    Query(query): Query<EventQuery>,
) -> Result<Json<Vec<Event>>, AppError> {
    let events = state.database.call(|conn| {
        let club = find_by_slug(conn, &slug)?;
        let include_hidden = is_admin(conn, &club.id, &user.id)?;
        let starting_after = query.upcoming.then(Utc::now);

        list_events(conn, &club.id, include_hidden, starting_after)
    })?;

    Ok(Json(events))
}

pub async fn get_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(event_id): Path<String>,
) -> Result<Json<EventDetails>, AppError> {
    let event_details = state.database.call(|conn| {
        let event = visible_event(conn, &event_id, &user.id)?;
        details(conn, event)
    })?;

    Ok(Json(event_details))
}

pub async fn update_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(event_id): Path<String>,
    Json(payload): Json<UpdateEvent>,
) -> Result<Json<EventDetails>, AppError> {
    let event_details = state.database.transaction(|tx| {
        let event = get_event(tx, &event_id)?;
        require_admin(tx, &event.club_id, &user.id)?;

        let event = update_event(tx, event, &payload, Utc::now())?;
        details(tx, event)
    })?;

    Ok(Json(event_details))
}

pub async fn cancel_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(event_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.database.transaction(|tx| {
        let event = get_event(tx, &event_id)?;
        require_admin(tx, &event.club_id, &user.id)?;

        let released = cancel_event(tx, &event, Utc::now())?;
        info!("Event {event_id} cancelled, released {released} registrations");
        Ok(())
    })?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn roster_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(event_id): Path<String>,
) -> Result<Json<Vec<RosterEntry>>, AppError> {
    let entries = state.database.call(|conn| {
        let event = get_event(conn, &event_id)?;
        require_admin(conn, &event.club_id, &user.id)?;
        roster(conn, &event.id)
    })?;

    Ok(Json(entries))
}

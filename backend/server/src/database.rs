//! # SQLite
//!
//! Single relational store for tenants, events, registrations, provider
//! connections and the feed.
//!
//! ## Requirements
//!
//! - Registration capacity must hold under concurrent sign-ups
//! - Webhook deliveries must apply at most once
//! - Small dataset, a club has hundreds of members and events, not millions
//!
//! ## Implementation
//!
//! - One connection behind a mutex, every call is short and synchronous
//! - Capacity checks run inside `BEGIN IMMEDIATE`, which takes the write lock
//!   before the count, so count-then-insert cannot interleave
//! - `UNIQUE(event_id, user_id)` on registrations, one row per attendee
//! - Processed webhook event ids live in `webhook_events`
//! - Timestamps are stored as text via rusqlite's chrono support
use std::{
    str::FromStr,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use rusqlite::{Connection, Row, TransactionBehavior, types::Type};
use tracing::info;

use crate::error::AppError;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS profiles (
    id TEXT PRIMARY KEY,
    email TEXT,
    display_name TEXT,
    bio TEXT,
    avatar_url TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS clubs (
    id TEXT PRIMARY KEY,
    slug TEXT NOT NULL UNIQUE,
    name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS club_members (
    club_id TEXT NOT NULL REFERENCES clubs(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    joined_at TEXT NOT NULL,
    PRIMARY KEY (club_id, user_id)
);

CREATE TABLE IF NOT EXISTS club_groups (
    id TEXT PRIMARY KEY,
    club_id TEXT NOT NULL REFERENCES clubs(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS group_members (
    group_id TEXT NOT NULL REFERENCES club_groups(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    joined_at TEXT NOT NULL,
    PRIMARY KEY (group_id, user_id)
);

CREATE TABLE IF NOT EXISTS events (
    id TEXT PRIMARY KEY,
    club_id TEXT NOT NULL REFERENCES clubs(id) ON DELETE CASCADE,
    group_id TEXT REFERENCES club_groups(id) ON DELETE SET NULL,
    organizer_id TEXT NOT NULL REFERENCES profiles(id),
    title TEXT NOT NULL,
    slug TEXT NOT NULL,
    description TEXT,
    sport TEXT,
    location TEXT,
    starts_at TEXT NOT NULL,
    ends_at TEXT,
    capacity INTEGER,
    waitlist_enabled INTEGER NOT NULL DEFAULT 0,
    price_cents INTEGER NOT NULL DEFAULT 0,
    currency TEXT NOT NULL,
    published INTEGER NOT NULL DEFAULT 1,
    cancelled INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE (club_id, slug)
);

CREATE TABLE IF NOT EXISTS registrations (
    id TEXT PRIMARY KEY,
    event_id TEXT NOT NULL REFERENCES events(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    status TEXT NOT NULL,
    checkout_session_id TEXT UNIQUE,
    checkout_url TEXT,
    amount_cents INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (event_id, user_id)
);

CREATE INDEX IF NOT EXISTS registrations_by_status ON registrations (event_id, status, created_at);

CREATE TABLE IF NOT EXISTS webhook_events (
    id TEXT PRIMARY KEY,
    event_type TEXT NOT NULL,
    received_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS provider_connections (
    user_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    provider TEXT NOT NULL,
    external_user_id TEXT NOT NULL,
    access_token TEXT NOT NULL,
    refresh_token TEXT,
    expires_at TEXT,
    last_synced_at TEXT,
    connected_at TEXT NOT NULL,
    PRIMARY KEY (user_id, provider)
);

CREATE TABLE IF NOT EXISTS activities (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    provider TEXT NOT NULL,
    external_id TEXT NOT NULL,
    name TEXT,
    sport TEXT NOT NULL,
    distance_m REAL NOT NULL,
    moving_time_s INTEGER NOT NULL,
    elevation_gain_m REAL,
    started_at TEXT NOT NULL,
    UNIQUE (provider, external_id)
);

CREATE TABLE IF NOT EXISTS posts (
    id TEXT PRIMARY KEY,
    club_id TEXT NOT NULL REFERENCES clubs(id) ON DELETE CASCADE,
    author_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    body TEXT NOT NULL,
    activity_id TEXT REFERENCES activities(id) ON DELETE SET NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS posts_by_club ON posts (club_id, created_at);

CREATE TABLE IF NOT EXISTS post_likes (
    post_id TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
    user_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    PRIMARY KEY (post_id, user_id)
);

CREATE TABLE IF NOT EXISTS comments (
    id TEXT PRIMARY KEY,
    post_id TEXT NOT NULL REFERENCES posts(id) ON DELETE CASCADE,
    author_id TEXT NOT NULL REFERENCES profiles(id) ON DELETE CASCADE,
    body TEXT NOT NULL,
    created_at TEXT NOT NULL
);
"#;

pub struct Database {
    connection: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, AppError> {
        let connection = if path == ":memory:" {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };

        connection.busy_timeout(Duration::from_secs(5))?;
        connection.pragma_update(None, "foreign_keys", "ON")?;
        connection.execute_batch(SCHEMA)?;

        info!("Database ready at {path}");

        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    pub fn in_memory() -> Result<Self, AppError> {
        Self::open(":memory:")
    }

    /// Runs `f` with the connection. Never hold this across an `.await`.
    pub fn call<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut connection = self.lock()?;
        f(&mut connection)
    }

    /// Runs `f` inside `BEGIN IMMEDIATE`, committing on `Ok`.
    pub fn transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut connection = self.lock()?;
        let tx = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let value = f(&tx)?;
        tx.commit()?;

        Ok(value)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        self.connection
            .lock()
            .map_err(|_| AppError::Internal("database mutex poisoned".to_string()))
    }
}

/// Reads a text column into any `FromStr` type, e.g. the status enums.
pub fn parse_column<T>(row: &Row<'_>, column: &str) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let index = row.as_ref().column_index(column)?;
    let text: String = row.get(index)?;

    text.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(e)))
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

//! Provider connections and imported activities.
use chrono::{DateTime, Utc};
use models::{Activity, NewActivity, Provider, ProviderConnection, TokenGrant};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::{
    database::{new_id, parse_column},
    error::AppError,
};

const CONNECTION_COLUMNS: &str = "user_id, provider, external_user_id, access_token,
    refresh_token, expires_at, last_synced_at, connected_at";

pub const ACTIVITY_COLUMNS: &str = "a.id, a.user_id, a.provider, a.external_id, a.name, a.sport,
    a.distance_m, a.moving_time_s, a.elevation_gain_m, a.started_at";

fn connection_from_row(row: &Row<'_>) -> rusqlite::Result<ProviderConnection> {
    Ok(ProviderConnection {
        user_id: row.get("user_id")?,
        provider: parse_column(row, "provider")?,
        external_user_id: row.get("external_user_id")?,
        access_token: row.get("access_token")?,
        refresh_token: row.get("refresh_token")?,
        expires_at: row.get("expires_at")?,
        last_synced_at: row.get("last_synced_at")?,
        connected_at: row.get("connected_at")?,
    })
}

pub fn activity_from_row(row: &Row<'_>) -> rusqlite::Result<Activity> {
    Ok(Activity {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        provider: parse_column(row, "provider")?,
        external_id: row.get("external_id")?,
        name: row.get("name")?,
        sport: row.get("sport")?,
        distance_m: row.get("distance_m")?,
        moving_time_s: row.get("moving_time_s")?,
        elevation_gain_m: row.get("elevation_gain_m")?,
        started_at: row.get("started_at")?,
    })
}

pub fn get_connection(
    conn: &Connection,
    user_id: &str,
    provider: Provider,
) -> Result<Option<ProviderConnection>, AppError> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {CONNECTION_COLUMNS} FROM provider_connections
                 WHERE user_id = ?1 AND provider = ?2"
            ),
            [user_id, provider.as_str()],
            connection_from_row,
        )
        .optional()?)
}

pub fn list_connections(
    conn: &Connection,
    user_id: &str,
) -> Result<Vec<ProviderConnection>, AppError> {
    let mut statement = conn.prepare(&format!(
        "SELECT {CONNECTION_COLUMNS} FROM provider_connections WHERE user_id = ?1 ORDER BY provider"
    ))?;

    let connections = statement
        .query_map([user_id], connection_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(connections)
}

/// Every stored connection, optionally for one provider. Used by batch sync.
pub fn all_connections(
    conn: &Connection,
    provider: Option<Provider>,
) -> Result<Vec<ProviderConnection>, AppError> {
    let mut statement = conn.prepare(&format!(
        "SELECT {CONNECTION_COLUMNS} FROM provider_connections
         WHERE ?1 IS NULL OR provider = ?1
         ORDER BY connected_at"
    ))?;

    let connections = statement
        .query_map([provider.map(Provider::as_str)], connection_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(connections)
}

/// Upserts after an OAuth callback. Reconnecting keeps the sync cursor.
pub fn save_connection(
    conn: &Connection,
    user_id: &str,
    provider: Provider,
    grant: &TokenGrant,
    now: DateTime<Utc>,
) -> Result<ProviderConnection, AppError> {
    conn.execute(
        "INSERT INTO provider_connections
            (user_id, provider, external_user_id, access_token, refresh_token, expires_at, connected_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT (user_id, provider) DO UPDATE SET
            external_user_id = excluded.external_user_id,
            access_token = excluded.access_token,
            refresh_token = excluded.refresh_token,
            expires_at = excluded.expires_at",
        params![
            user_id,
            provider.as_str(),
            grant.external_user_id,
            grant.access_token,
            grant.refresh_token,
            grant.expires_at,
            now,
        ],
    )?;

    get_connection(conn, user_id, provider)?.ok_or(AppError::NotFound("Connection"))
}

pub fn update_tokens(
    conn: &Connection,
    connection: &ProviderConnection,
    grant: &TokenGrant,
) -> Result<ProviderConnection, AppError> {
    let refresh_token = grant
        .refresh_token
        .clone()
        .or_else(|| connection.refresh_token.clone());

    conn.execute(
        "UPDATE provider_connections SET access_token = ?3, refresh_token = ?4, expires_at = ?5
         WHERE user_id = ?1 AND provider = ?2",
        params![
            connection.user_id,
            connection.provider.as_str(),
            grant.access_token,
            refresh_token,
            grant.expires_at,
        ],
    )?;

    Ok(ProviderConnection {
        access_token: grant.access_token.clone(),
        refresh_token,
        expires_at: grant.expires_at,
        ..connection.clone()
    })
}

pub fn delete_connection(
    conn: &Connection,
    user_id: &str,
    provider: Provider,
) -> Result<bool, AppError> {
    let deleted = conn.execute(
        "DELETE FROM provider_connections WHERE user_id = ?1 AND provider = ?2",
        [user_id, provider.as_str()],
    )?;

    Ok(deleted > 0)
}

pub fn mark_synced(
    conn: &Connection,
    connection: &ProviderConnection,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    conn.execute(
        "UPDATE provider_connections SET last_synced_at = ?3 WHERE user_id = ?1 AND provider = ?2",
        params![connection.user_id, connection.provider.as_str(), now],
    )?;

    Ok(())
}

/// Keyed by `(provider, external_id)`, so re-imports update in place.
pub fn upsert_activities(
    conn: &Connection,
    user_id: &str,
    provider: Provider,
    activities: &[NewActivity],
) -> Result<u32, AppError> {
    let mut statement = conn.prepare(
        "INSERT INTO activities
            (id, user_id, provider, external_id, name, sport, distance_m, moving_time_s,
             elevation_gain_m, started_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT (provider, external_id) DO UPDATE SET
            user_id = excluded.user_id,
            name = excluded.name,
            sport = excluded.sport,
            distance_m = excluded.distance_m,
            moving_time_s = excluded.moving_time_s,
            elevation_gain_m = excluded.elevation_gain_m,
            started_at = excluded.started_at",
    )?;

    let mut imported = 0;
    for activity in activities {
        imported += statement.execute(params![
            new_id(),
            user_id,
            provider.as_str(),
            activity.external_id,
            activity.name,
            activity.sport,
            activity.distance_m,
            activity.moving_time_s,
            activity.elevation_gain_m,
            activity.started_at,
        ])? as u32;
    }

    Ok(imported)
}

pub fn get_activity(conn: &Connection, activity_id: &str) -> Result<Activity, AppError> {
    conn.query_row(
        &format!("SELECT {ACTIVITY_COLUMNS} FROM activities a WHERE a.id = ?1"),
        [activity_id],
        activity_from_row,
    )
    .optional()?
    .ok_or(AppError::NotFound("Activity"))
}

pub fn list_activities(
    conn: &Connection,
    user_id: &str,
    before: Option<DateTime<Utc>>,
    limit: u32,
) -> Result<Vec<Activity>, AppError> {
    let mut statement = conn.prepare(&format!(
        "SELECT {ACTIVITY_COLUMNS} FROM activities a
         WHERE a.user_id = ?1 AND (?2 IS NULL OR a.started_at < ?2)
         ORDER BY a.started_at DESC
         LIMIT ?3"
    ))?;

    let activities = statement
        .query_map(params![user_id, before, limit], activity_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(activities)
}

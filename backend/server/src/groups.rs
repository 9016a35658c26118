//! Sub-groups inside a club, e.g. "Tuesday intervals" or "Beginners".
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use models::{
    Group,
    payloads::{CreateGroup, Membership},
};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::{
    auth::AuthUser,
    clubs::{find_by_slug, require_admin, require_member},
    database::new_id,
    error::AppError,
    state::State,
};

const GROUP_COLUMNS: &str = "g.id, g.club_id, g.name, g.description,
    (SELECT COUNT(*) FROM group_members m WHERE m.group_id = g.id) AS member_count";

fn group_from_row(row: &Row<'_>) -> rusqlite::Result<Group> {
    Ok(Group {
        id: row.get("id")?,
        club_id: row.get("club_id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        member_count: row.get("member_count")?,
    })
}

pub fn get_group(conn: &Connection, group_id: &str) -> Result<Group, AppError> {
    conn.query_row(
        &format!("SELECT {GROUP_COLUMNS} FROM club_groups g WHERE g.id = ?1"),
        [group_id],
        group_from_row,
    )
    .optional()?
    .ok_or(AppError::NotFound("Group"))
}

pub fn list_groups(conn: &Connection, club_id: &str) -> Result<Vec<Group>, AppError> {
    let mut statement = conn.prepare(&format!(
        "SELECT {GROUP_COLUMNS} FROM club_groups g WHERE g.club_id = ?1 ORDER BY g.name COLLATE NOCASE"
    ))?;

    let groups = statement
        .query_map([club_id], group_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(groups)
}

pub fn create_group(
    conn: &Connection,
    club_id: &str,
    payload: &CreateGroup,
    now: DateTime<Utc>,
) -> Result<Group, AppError> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::Validation("Group name is required".into()));
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO club_groups (id, club_id, name, description, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, club_id, name, payload.description, now],
    )?;

    get_group(conn, &id)
}

pub fn toggle_group_membership(
    conn: &Connection,
    group: &Group,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    require_member(conn, &group.club_id, user_id)?;

    let removed = conn.execute(
        "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
        params![group.id, user_id],
    )?;
    if removed > 0 {
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO group_members (group_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
        params![group.id, user_id, now],
    )?;

    Ok(true)
}

pub async fn create_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(slug): Path<String>,
    Json(payload): Json<CreateGroup>,
) -> Result<impl IntoResponse, AppError> {
    let group = state.database.transaction(|tx| {
        let club = find_by_slug(tx, &slug)?;
        require_admin(tx, &club.id, &user.id)?;
        create_group(tx, &club.id, &payload, Utc::now())
    })?;

    Ok((StatusCode::CREATED, Json(group)))
}

pub async fn list_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(slug): Path<String>,
) -> Result<Json<Vec<Group>>, AppError> {
    let groups = state.database.call(|conn| {
        let club = find_by_slug(conn, &slug)?;
        list_groups(conn, &club.id)
    })?;

    Ok(Json(groups))
}

pub async fn membership_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(group_id): Path<String>,
) -> Result<Json<Membership>, AppError> {
    let member = state.database.transaction(|tx| {
        let group = get_group(tx, &group_id)?;
        toggle_group_membership(tx, &group, &user.id, Utc::now())
    })?;

    Ok(Json(Membership { member }))
}

pub async fn delete_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(group_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.database.transaction(|tx| {
        let group = get_group(tx, &group_id)?;
        require_admin(tx, &group.club_id, &user.id)?;
        tx.execute("DELETE FROM club_groups WHERE id = ?1", [&group.id])?;
        Ok(())
    })?;

    Ok(StatusCode::NO_CONTENT)
}

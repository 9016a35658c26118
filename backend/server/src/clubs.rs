//! Tenancy. Every club-scoped route resolves the club from its slug first,
//! then checks the caller's role in that club.
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use models::{
    Club, Role, slugify,
    payloads::{CreateClub, Membership, SetRole},
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::info;

use crate::{
    auth::AuthUser,
    database::{new_id, parse_column},
    error::AppError,
    state::State,
};

fn club_from_row(row: &Row<'_>) -> rusqlite::Result<Club> {
    Ok(Club {
        id: row.get("id")?,
        slug: row.get("slug")?,
        name: row.get("name")?,
        created_at: row.get("created_at")?,
    })
}

pub fn find_by_slug(conn: &Connection, slug: &str) -> Result<Club, AppError> {
    conn.query_row(
        "SELECT id, slug, name, created_at FROM clubs WHERE slug = ?1",
        [slug],
        club_from_row,
    )
    .optional()?
    .ok_or(AppError::NotFound("Club"))
}

pub fn role_of(conn: &Connection, club_id: &str, user_id: &str) -> Result<Option<Role>, AppError> {
    Ok(conn
        .query_row(
            "SELECT role FROM club_members WHERE club_id = ?1 AND user_id = ?2",
            [club_id, user_id],
            |row| parse_column(row, "role"),
        )
        .optional()?)
}

pub fn require_member(conn: &Connection, club_id: &str, user_id: &str) -> Result<Role, AppError> {
    role_of(conn, club_id, user_id)?.ok_or(AppError::Forbidden)
}

pub fn require_admin(conn: &Connection, club_id: &str, user_id: &str) -> Result<(), AppError> {
    match role_of(conn, club_id, user_id)? {
        Some(Role::Admin) => Ok(()),
        _ => Err(AppError::Forbidden),
    }
}

pub fn is_admin(conn: &Connection, club_id: &str, user_id: &str) -> Result<bool, AppError> {
    Ok(role_of(conn, club_id, user_id)? == Some(Role::Admin))
}

pub fn create_club(
    conn: &Connection,
    name: &str,
    creator_id: &str,
    now: DateTime<Utc>,
) -> Result<Club, AppError> {
    let name = name.trim();
    let slug = slugify(name);

    if slug.is_empty() {
        return Err(AppError::Validation("Club name must contain letters or digits".into()));
    }

    let taken: bool = conn.query_row(
        "SELECT EXISTS (SELECT 1 FROM clubs WHERE slug = ?1)",
        [&slug],
        |row| row.get(0),
    )?;
    if taken {
        return Err(AppError::Conflict(format!("Club {slug} already exists")));
    }

    let club = Club {
        id: new_id(),
        slug,
        name: name.to_string(),
        created_at: now,
    };

    conn.execute(
        "INSERT INTO clubs (id, slug, name, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![club.id, club.slug, club.name, club.created_at],
    )?;
    conn.execute(
        "INSERT INTO club_members (club_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
        params![club.id, creator_id, Role::Admin.as_str(), now],
    )?;

    Ok(club)
}

pub fn list_clubs(conn: &Connection) -> Result<Vec<Club>, AppError> {
    let mut statement =
        conn.prepare("SELECT id, slug, name, created_at FROM clubs ORDER BY name COLLATE NOCASE")?;

    let clubs = statement
        .query_map([], club_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(clubs)
}

fn admin_count(conn: &Connection, club_id: &str) -> Result<u32, AppError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM club_members WHERE club_id = ?1 AND role = 'admin'",
        [club_id],
        |row| row.get(0),
    )?)
}

/// Joins or leaves, returning whether the user is a member afterwards.
pub fn toggle_membership(
    conn: &Connection,
    club_id: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<bool, AppError> {
    match role_of(conn, club_id, user_id)? {
        None => {
            conn.execute(
                "INSERT INTO club_members (club_id, user_id, role, joined_at) VALUES (?1, ?2, ?3, ?4)",
                params![club_id, user_id, Role::Member.as_str(), now],
            )?;
            Ok(true)
        }
        Some(role) => {
            if role == Role::Admin && admin_count(conn, club_id)? <= 1 {
                return Err(AppError::Conflict("The last admin cannot leave the club".into()));
            }

            conn.execute(
                "DELETE FROM group_members WHERE user_id = ?1
                 AND group_id IN (SELECT id FROM club_groups WHERE club_id = ?2)",
                [user_id, club_id],
            )?;
            conn.execute(
                "DELETE FROM club_members WHERE club_id = ?1 AND user_id = ?2",
                [club_id, user_id],
            )?;
            Ok(false)
        }
    }
}

pub fn set_role(conn: &Connection, club_id: &str, user_id: &str, role: Role) -> Result<(), AppError> {
    let current = role_of(conn, club_id, user_id)?.ok_or(AppError::NotFound("Member"))?;

    if current == Role::Admin && role == Role::Member && admin_count(conn, club_id)? <= 1 {
        return Err(AppError::Conflict("A club needs at least one admin".into()));
    }

    conn.execute(
        "UPDATE club_members SET role = ?1 WHERE club_id = ?2 AND user_id = ?3",
        params![role.as_str(), club_id, user_id],
    )?;

    Ok(())
}

pub async fn create_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Json(payload): Json<CreateClub>,
) -> Result<impl IntoResponse, AppError> {
    let club = state
        .database
        .transaction(|tx| create_club(tx, &payload.name, &user.id, Utc::now()))?;

    info!("Club {} created by {}", club.slug, user.id);

    Ok((StatusCode::CREATED, Json(club)))
}

pub async fn list_handler(
    AxumState(state): AxumState<Arc<State>>,
) -> Result<Json<Vec<Club>>, AppError> {
    Ok(Json(state.database.call(|conn| list_clubs(conn))?))
}

pub async fn get_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(slug): Path<String>,
) -> Result<Json<Club>, AppError> {
    Ok(Json(state.database.call(|conn| find_by_slug(conn, &slug))?))
}

pub async fn membership_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(slug): Path<String>,
) -> Result<Json<Membership>, AppError> {
    let member = state.database.transaction(|tx| {
        let club = find_by_slug(tx, &slug)?;
        toggle_membership(tx, &club.id, &user.id, Utc::now())
    })?;

    Ok(Json(Membership { member }))
}

pub async fn role_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path((slug, member_id)): Path<(String, String)>,
    Json(payload): Json<SetRole>,
) -> Result<StatusCode, AppError> {
    state.database.transaction(|tx| {
        let club = find_by_slug(tx, &slug)?;
        require_admin(tx, &club.id, &user.id)?;
        set_role(tx, &club.id, &member_id, payload.role)
    })?;

    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{auth::ensure_profile, database::Database};

    fn seeded() -> Database {
        let database = Database::in_memory().unwrap();
        database
            .call(|conn| {
                for id in ["alice", "bob"] {
                    let user = AuthUser {
                        id: id.into(),
                        email: None,
                    };
                    ensure_profile(conn, &user, Utc::now())?;
                }
                Ok(())
            })
            .unwrap();
        database
    }

    #[test]
    fn creator_is_admin_and_slug_is_unique() {
        let database = seeded();

        database
            .transaction(|tx| {
                let club = create_club(tx, "Harbour Harriers", "alice", Utc::now())?;
                assert_eq!(club.slug, "harbour-harriers");
                assert_eq!(role_of(tx, &club.id, "alice")?, Some(Role::Admin));

                let duplicate = create_club(tx, "harbour_harriers", "bob", Utc::now());
                assert!(matches!(duplicate, Err(AppError::Conflict(_))));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn membership_toggles_and_last_admin_stays() {
        let database = seeded();

        database
            .transaction(|tx| {
                let club = create_club(tx, "Track Club", "alice", Utc::now())?;

                assert!(toggle_membership(tx, &club.id, "bob", Utc::now())?);
                assert_eq!(role_of(tx, &club.id, "bob")?, Some(Role::Member));
                assert!(!toggle_membership(tx, &club.id, "bob", Utc::now())?);
                assert_eq!(role_of(tx, &club.id, "bob")?, None);

                let leaving = toggle_membership(tx, &club.id, "alice", Utc::now());
                assert!(matches!(leaving, Err(AppError::Conflict(_))));
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn promoted_member_lets_admin_leave() {
        let database = seeded();

        database
            .transaction(|tx| {
                let club = create_club(tx, "Track Club", "alice", Utc::now())?;
                toggle_membership(tx, &club.id, "bob", Utc::now())?;
                set_role(tx, &club.id, "bob", Role::Admin)?;

                assert!(!toggle_membership(tx, &club.id, "alice", Utc::now())?);
                assert!(is_admin(tx, &club.id, "bob")?);
                Ok(())
            })
            .unwrap();
    }
}

use std::sync::Arc;

use axum::{Json, extract::State as AxumState};
use models::{Profile, payloads::UpdateProfile};
use rusqlite::{Connection, params};

use crate::{auth::AuthUser, error::AppError, state::State};

const MAX_DISPLAY_NAME: usize = 80;
const MAX_BIO: usize = 500;

pub fn get_profile(conn: &Connection, user_id: &str) -> Result<Profile, AppError> {
    conn.query_row(
        "SELECT id, email, display_name, bio, avatar_url FROM profiles WHERE id = ?1",
        [user_id],
        |row| {
            Ok(Profile {
                id: row.get("id")?,
                email: row.get("email")?,
                display_name: row.get("display_name")?,
                bio: row.get("bio")?,
                avatar_url: row.get("avatar_url")?,
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound("Profile"),
        e => e.into(),
    })
}

pub fn update_profile(
    conn: &Connection,
    user_id: &str,
    update: &UpdateProfile,
) -> Result<Profile, AppError> {
    let display_name = update.display_name.as_deref().map(str::trim);
    if display_name.is_some_and(|name| name.is_empty() || name.chars().count() > MAX_DISPLAY_NAME) {
        return Err(AppError::Validation(format!(
            "Display name must be 1 to {MAX_DISPLAY_NAME} characters"
        )));
    }
    if update
        .bio
        .as_deref()
        .is_some_and(|bio| bio.chars().count() > MAX_BIO)
    {
        return Err(AppError::Validation(format!("Bio is limited to {MAX_BIO} characters")));
    }

    conn.execute(
        "UPDATE profiles SET
            display_name = COALESCE(?2, display_name),
            bio = COALESCE(?3, bio),
            avatar_url = COALESCE(?4, avatar_url)
         WHERE id = ?1",
        params![user_id, display_name, update.bio, update.avatar_url],
    )?;

    get_profile(conn, user_id)
}

pub async fn me_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
) -> Result<Json<Profile>, AppError> {
    Ok(Json(state.database.call(|conn| get_profile(conn, &user.id))?))
}

pub async fn update_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Json(payload): Json<UpdateProfile>,
) -> Result<Json<Profile>, AppError> {
    Ok(Json(
        state
            .database
            .call(|conn| update_profile(conn, &user.id, &payload))?,
    ))
}

//! Club feed: posts, optionally carrying an imported activity, with likes and
//! comments. Pagination is by `created_at` cursor, newest first.
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use models::{
    Comment, Post,
    payloads::{CreateComment, CreatePost, LikeState, Page},
};
use rusqlite::{Connection, Row, params};

use crate::{
    auth::AuthUser,
    clubs::{find_by_slug, is_admin, require_member},
    database::new_id,
    error::AppError,
    integrations::store::get_activity,
    state::State,
};

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const MAX_POST_CHARS: usize = 2000;

/// `?2` is the viewer, for `liked_by_me`.
const POST_SELECT: &str = "SELECT p.id AS post_id, p.club_id, p.author_id, p.body,
        p.created_at AS posted_at, pr.display_name AS author_name,
        (SELECT COUNT(*) FROM post_likes l WHERE l.post_id = p.id) AS like_count,
        (SELECT COUNT(*) FROM comments c WHERE c.post_id = p.id) AS comment_count,
        EXISTS (SELECT 1 FROM post_likes l WHERE l.post_id = p.id AND l.user_id = ?2) AS liked_by_me,
        p.activity_id";

fn post_from_row(conn: &Connection, row: &Row<'_>) -> Result<Post, AppError> {
    let activity_id: Option<String> = row.get("activity_id")?;
    let activity = activity_id
        .map(|id| get_activity(conn, &id))
        .transpose()?;

    Ok(Post {
        id: row.get("post_id")?,
        club_id: row.get("club_id")?,
        author_id: row.get("author_id")?,
        author_name: row.get("author_name")?,
        body: row.get("body")?,
        activity,
        like_count: row.get("like_count")?,
        comment_count: row.get("comment_count")?,
        liked_by_me: row.get("liked_by_me")?,
        created_at: row.get("posted_at")?,
    })
}

fn query_posts(
    conn: &Connection,
    filter: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Post>, AppError> {
    let mut statement = conn.prepare(&format!(
        "{POST_SELECT} FROM posts p JOIN profiles pr ON pr.id = p.author_id {filter}"
    ))?;
    let mut rows = statement.query(params)?;

    let mut posts = Vec::new();
    while let Some(row) = rows.next()? {
        posts.push(post_from_row(conn, row)?);
    }

    Ok(posts)
}

pub fn get_post(conn: &Connection, post_id: &str, viewer_id: &str) -> Result<Post, AppError> {
    query_posts(conn, "WHERE p.id = ?1", params![post_id, viewer_id])?
        .pop()
        .ok_or(AppError::NotFound("Post"))
}

pub fn page_size(limit: Option<u32>) -> u32 {
    limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
}

pub fn list_feed(
    conn: &Connection,
    club_id: &str,
    viewer_id: &str,
    before: Option<DateTime<Utc>>,
    limit: u32,
) -> Result<Vec<Post>, AppError> {
    query_posts(
        conn,
        "WHERE p.club_id = ?1 AND (?3 IS NULL OR p.created_at < ?3)
         ORDER BY p.created_at DESC, p.id DESC
         LIMIT ?4",
        params![club_id, viewer_id, before, limit],
    )
}

pub fn create_post(
    conn: &Connection,
    club_id: &str,
    author_id: &str,
    payload: &CreatePost,
    now: DateTime<Utc>,
) -> Result<Post, AppError> {
    let body = payload.body.trim();
    if body.is_empty() || body.chars().count() > MAX_POST_CHARS {
        return Err(AppError::Validation(format!(
            "Post body must be 1 to {MAX_POST_CHARS} characters"
        )));
    }

    if let Some(activity_id) = &payload.activity_id {
        let activity = get_activity(conn, activity_id)?;
        if activity.user_id != author_id {
            return Err(AppError::Forbidden);
        }
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO posts (id, club_id, author_id, body, activity_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, club_id, author_id, body, payload.activity_id, now],
    )?;

    get_post(conn, &id, author_id)
}

pub fn delete_post(conn: &Connection, post: &Post, user_id: &str) -> Result<(), AppError> {
    if post.author_id != user_id && !is_admin(conn, &post.club_id, user_id)? {
        return Err(AppError::Forbidden);
    }

    conn.execute("DELETE FROM posts WHERE id = ?1", [&post.id])?;

    Ok(())
}

pub fn toggle_like(conn: &Connection, post_id: &str, user_id: &str) -> Result<LikeState, AppError> {
    let removed = conn.execute(
        "DELETE FROM post_likes WHERE post_id = ?1 AND user_id = ?2",
        [post_id, user_id],
    )?;
    if removed == 0 {
        conn.execute(
            "INSERT INTO post_likes (post_id, user_id) VALUES (?1, ?2)",
            [post_id, user_id],
        )?;
    }

    let like_count = conn.query_row(
        "SELECT COUNT(*) FROM post_likes WHERE post_id = ?1",
        [post_id],
        |row| row.get(0),
    )?;

    Ok(LikeState {
        liked: removed == 0,
        like_count,
    })
}

fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
    Ok(Comment {
        id: row.get("id")?,
        post_id: row.get("post_id")?,
        author_id: row.get("author_id")?,
        body: row.get("body")?,
        created_at: row.get("created_at")?,
    })
}

pub fn add_comment(
    conn: &Connection,
    post_id: &str,
    author_id: &str,
    payload: &CreateComment,
    now: DateTime<Utc>,
) -> Result<Comment, AppError> {
    let body = payload.body.trim();
    if body.is_empty() || body.chars().count() > MAX_POST_CHARS {
        return Err(AppError::Validation(format!(
            "Comment must be 1 to {MAX_POST_CHARS} characters"
        )));
    }

    let comment = Comment {
        id: new_id(),
        post_id: post_id.to_string(),
        author_id: author_id.to_string(),
        body: body.to_string(),
        created_at: now,
    };

    conn.execute(
        "INSERT INTO comments (id, post_id, author_id, body, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![comment.id, comment.post_id, comment.author_id, comment.body, comment.created_at],
    )?;

    Ok(comment)
}

pub fn list_comments(conn: &Connection, post_id: &str) -> Result<Vec<Comment>, AppError> {
    let mut statement = conn.prepare(
        "SELECT id, post_id, author_id, body, created_at FROM comments
         WHERE post_id = ?1 ORDER BY created_at",
    )?;

    let comments = statement
        .query_map([post_id], comment_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(comments)
}

/// Loads a post for a club member, the only people who may touch it.
fn member_post(conn: &Connection, post_id: &str, user_id: &str) -> Result<Post, AppError> {
    let post = get_post(conn, post_id, user_id)?;
    require_member(conn, &post.club_id, user_id)?;

    Ok(post)
}

pub async fn feed_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(slug): Path<String>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Post>>, AppError> {
    let posts = state.database.call(|conn| {
        let club = find_by_slug(conn, &slug)?;
        require_member(conn, &club.id, &user.id)?;

        list_feed(conn, &club.id, &user.id, page.before, page_size(page.limit))
    })?;

    Ok(Json(posts))
}

pub async fn create_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(slug): Path<String>,
    Json(payload): Json<CreatePost>,
) -> Result<impl IntoResponse, AppError> {
    let post = state.database.transaction(|tx| {
        let club = find_by_slug(tx, &slug)?;
        require_member(tx, &club.id, &user.id)?;

        create_post(tx, &club.id, &user.id, &payload, Utc::now())
    })?;

    Ok((StatusCode::CREATED, Json(post)))
}

pub async fn delete_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(post_id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.database.transaction(|tx| {
        let post = member_post(tx, &post_id, &user.id)?;
        delete_post(tx, &post, &user.id)
    })?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn like_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(post_id): Path<String>,
) -> Result<Json<LikeState>, AppError> {
    let like = state.database.transaction(|tx| {
        member_post(tx, &post_id, &user.id)?;
        toggle_like(tx, &post_id, &user.id)
    })?;

    Ok(Json(like))
}

pub async fn comment_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(post_id): Path<String>,
    Json(payload): Json<CreateComment>,
) -> Result<impl IntoResponse, AppError> {
    let comment = state.database.transaction(|tx| {
        member_post(tx, &post_id, &user.id)?;
        add_comment(tx, &post_id, &user.id, &payload, Utc::now())
    })?;

    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn comments_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(post_id): Path<String>,
) -> Result<Json<Vec<Comment>>, AppError> {
    let comments = state.database.call(|conn| {
        member_post(conn, &post_id, &user.id)?;
        list_comments(conn, &post_id)
    })?;

    Ok(Json(comments))
}

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State as AxumState},
    http::StatusCode,
    response::Redirect,
};
use chrono::Utc;
use models::{
    Activity, Provider,
    payloads::{AuthorizeUrl, ConnectionSummary, OAuthCallback, Page, SyncResult},
};
use tracing::{info, warn};

use super::{oauth_state, redirect_uri, store, sync_connection};
use crate::{auth::AuthUser, error::AppError, state::State};

const DEFAULT_ACTIVITY_LIMIT: u32 = 20;
const MAX_ACTIVITY_LIMIT: u32 = 100;

pub async fn list_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
) -> Result<Json<Vec<ConnectionSummary>>, AppError> {
    let connections = state
        .database
        .call(|conn| store::list_connections(conn, &user.id))?;

    let summaries = connections
        .into_iter()
        .map(|connection| ConnectionSummary {
            provider: connection.provider,
            external_user_id: connection.external_user_id,
            connected_at: connection.connected_at,
            last_synced_at: connection.last_synced_at,
        })
        .collect();

    Ok(Json(summaries))
}

pub async fn authorize_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(provider): Path<Provider>,
) -> Json<AuthorizeUrl> {
    let oauth_state =
        oauth_state::sign_state(&state.config.auth_jwt_secret, &user.id, provider, Utc::now());
    let url = state
        .providers
        .get(provider)
        .authorize_url(&oauth_state, &redirect_uri(&state.config, provider));

    Json(AuthorizeUrl { url })
}

async fn connect(
    state: &State,
    provider: Provider,
    params: OAuthCallback,
) -> Result<String, AppError> {
    let user_id = oauth_state::verify_state(
        &state.config.auth_jwt_secret,
        &params.state,
        provider,
        Utc::now(),
    )?;

    if let Some(error) = params.error {
        return Err(AppError::Validation(format!("Authorization declined: {error}")));
    }
    let code = params
        .code
        .ok_or_else(|| AppError::Validation("Missing authorization code".into()))?;

    let grant = state
        .providers
        .get(provider)
        .exchange_code(&code, &redirect_uri(&state.config, provider))
        .await?;

    state.database.call(|conn| {
        store::save_connection(conn, &user_id, provider, &grant, Utc::now())
    })?;

    Ok(user_id)
}

/// The provider sends the browser here, so every outcome is a redirect back
/// to the frontend's integrations page.
pub async fn callback_handler(
    AxumState(state): AxumState<Arc<State>>,
    Path(provider): Path<Provider>,
    Query(params): Query<OAuthCallback>,
) -> Redirect {
    let page = format!(
        "{}/settings/integrations",
        state.config.public_url.trim_end_matches('/')
    );

    match connect(&state, provider, params).await {
        Ok(user_id) => {
            info!("{user_id} connected {provider}");
            Redirect::to(&format!("{page}?connected={provider}"))
        }
        Err(e) => {
            warn!("Connecting {provider} failed: {e}");
            Redirect::to(&format!("{page}?error={provider}"))
        }
    }
}

pub async fn sync_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(provider): Path<Provider>,
) -> Result<Json<SyncResult>, AppError> {
    let connection = state
        .database
        .call(|conn| store::get_connection(conn, &user.id, provider))?
        .ok_or(AppError::NotFound("Connection"))?;

    let imported = sync_connection(
        &state.database,
        state.providers.get(provider),
        connection,
        Utc::now(),
    )
    .await?;

    Ok(Json(SyncResult { imported }))
}

pub async fn disconnect_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Path(provider): Path<Provider>,
) -> Result<StatusCode, AppError> {
    let deleted = state
        .database
        .call(|conn| store::delete_connection(conn, &user.id, provider))?;

    if !deleted {
        return Err(AppError::NotFound("Connection"));
    }

    info!("{} disconnected {provider}", user.id);

    Ok(StatusCode::NO_CONTENT)
}

pub async fn activities_handler(
    AxumState(state): AxumState<Arc<State>>,
    user: AuthUser,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Activity>>, AppError> {
    let limit = page
        .limit
        .unwrap_or(DEFAULT_ACTIVITY_LIMIT)
        .clamp(1, MAX_ACTIVITY_LIMIT);

    let activities = state
        .database
        .call(|conn| store::list_activities(conn, &user.id, page.before, limit))?;

    Ok(Json(activities))
}

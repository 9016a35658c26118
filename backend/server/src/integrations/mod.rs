//! # Fitness integrations
//!
//! Users connect Strava or Polar through OAuth, then activities are pulled on
//! demand (`POST /integrations/{provider}/sync`) or in batch by the `sync` CLI.
//! Imported activities can be attached to feed posts.
//!
//! Providers differ in token lifetime: Strava access tokens last six hours and
//! are refreshed with a refresh token, Polar tokens are long-lived and have no
//! refresh flow.
use chrono::{DateTime, Duration, Utc};
use models::{NewActivity, Provider, ProviderConnection, TokenGrant};
use serde::de::DeserializeOwned;
use tracing::{info, warn};

use crate::{config::Config, database::Database, error::AppError};

pub mod handlers;
pub mod oauth_state;
pub mod polar;
pub mod store;
pub mod strava;

use polar::Polar;
use strava::Strava;

/// Tokens expiring within this window are refreshed before use.
pub const REFRESH_MARGIN_SECS: i64 = 60;
/// First sync of a connection looks back this far.
pub const DEFAULT_SYNC_DAYS: i64 = 30;

#[async_trait::async_trait]
pub trait ActivityProvider: Send + Sync {
    fn provider(&self) -> Provider;

    fn authorize_url(&self, state: &str, redirect_uri: &str) -> String;

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant, AppError>;

    /// `None` when the provider's tokens do not expire.
    async fn refresh(&self, connection: &ProviderConnection)
    -> Result<Option<TokenGrant>, AppError>;

    async fn fetch_activities(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<NewActivity>, AppError>;
}

pub struct Providers {
    strava: Strava,
    polar: Polar,
}

impl Providers {
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        Self {
            strava: Strava::new(http.clone(), &config.strava),
            polar: Polar::new(http, &config.polar),
        }
    }

    pub fn get(&self, provider: Provider) -> &dyn ActivityProvider {
        match provider {
            Provider::Strava => &self.strava,
            Provider::Polar => &self.polar,
        }
    }
}

pub fn redirect_uri(config: &Config, provider: Provider) -> String {
    format!(
        "{}/integrations/{provider}/callback",
        config.api_url.trim_end_matches('/')
    )
}

/// Refreshes if needed, imports everything since the last sync and moves the
/// cursor. Returns the number of activities written.
pub async fn sync_connection(
    database: &Database,
    provider: &dyn ActivityProvider,
    connection: ProviderConnection,
    now: DateTime<Utc>,
) -> Result<u32, AppError> {
    let connection = if connection.expires_within(now, REFRESH_MARGIN_SECS) {
        match provider.refresh(&connection).await? {
            Some(grant) => {
                info!("Refreshed {} token for {}", connection.provider, connection.user_id);
                database.call(|conn| store::update_tokens(conn, &connection, &grant))?
            }
            None => connection,
        }
    } else {
        connection
    };

    let since = connection
        .last_synced_at
        .unwrap_or(now - Duration::days(DEFAULT_SYNC_DAYS));
    let activities = provider
        .fetch_activities(&connection.access_token, since)
        .await?;

    let imported = database.transaction(|tx| {
        let imported =
            store::upsert_activities(tx, &connection.user_id, connection.provider, &activities)?;
        store::mark_synced(tx, &connection, now)?;
        Ok(imported)
    })?;

    info!(
        "Imported {imported} {} activities for {}",
        connection.provider, connection.user_id
    );

    Ok(imported)
}

/// Decodes a provider response, turning non-2xx into an upstream error.
async fn read_json<T: DeserializeOwned>(
    provider: Provider,
    response: reqwest::Response,
) -> Result<T, AppError> {
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        warn!("{provider} returned {status}: {body}");

        return Err(AppError::Upstream(format!("{provider} returned {status}")));
    }

    Ok(response.json().await?)
}

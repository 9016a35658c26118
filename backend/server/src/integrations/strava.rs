use chrono::{DateTime, TimeZone, Utc};
use models::{NewActivity, Provider, ProviderConnection, TokenGrant};
use serde::Deserialize;
use url::form_urlencoded;

use super::{ActivityProvider, read_json};
use crate::{config::StravaConfig, error::AppError};

const PAGE_SIZE: usize = 100;
const MAX_PAGES: u32 = 10;

pub struct Strava {
    http: reqwest::Client,
    base_url: String,
    client_id: String,
    client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    /// Epoch seconds.
    expires_at: Option<i64>,
    athlete: Option<Athlete>,
}

#[derive(Deserialize)]
struct Athlete {
    id: i64,
}

#[derive(Deserialize)]
struct StravaActivity {
    id: i64,
    name: Option<String>,
    sport_type: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    distance: f64,
    #[serde(default)]
    moving_time: u32,
    total_elevation_gain: Option<f64>,
    start_date: DateTime<Utc>,
}

impl From<StravaActivity> for NewActivity {
    fn from(activity: StravaActivity) -> Self {
        let sport = activity
            .sport_type
            .or(activity.kind)
            .unwrap_or_else(|| "workout".into())
            .to_lowercase();

        NewActivity {
            external_id: activity.id.to_string(),
            name: activity.name,
            sport,
            distance_m: activity.distance,
            moving_time_s: activity.moving_time,
            elevation_gain_m: activity.total_elevation_gain,
            started_at: activity.start_date,
        }
    }
}

impl Strava {
    pub fn new(http: reqwest::Client, config: &StravaConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }

    async fn token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, AppError> {
        let response = self
            .http
            .post(format!("{}/oauth/token", self.base_url))
            .form(form)
            .send()
            .await?;

        read_json(Provider::Strava, response).await
    }
}

fn grant(response: TokenResponse, external_user_id: String) -> TokenGrant {
    TokenGrant {
        external_user_id,
        access_token: response.access_token,
        refresh_token: response.refresh_token,
        expires_at: response
            .expires_at
            .and_then(|seconds| Utc.timestamp_opt(seconds, 0).single()),
    }
}

#[async_trait::async_trait]
impl ActivityProvider for Strava {
    fn provider(&self) -> Provider {
        Provider::Strava
    }

    fn authorize_url(&self, state: &str, redirect_uri: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", "read,activity:read_all")
            .append_pair("approval_prompt", "auto")
            .append_pair("state", state)
            .finish();

        format!("{}/oauth/authorize?{query}", self.base_url)
    }

    async fn exchange_code(&self, code: &str, _redirect_uri: &str) -> Result<TokenGrant, AppError> {
        let response = self
            .token(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code),
                ("grant_type", "authorization_code"),
            ])
            .await?;

        let athlete = response
            .athlete
            .as_ref()
            .map(|athlete| athlete.id.to_string())
            .ok_or_else(|| AppError::Upstream("strava token response has no athlete".into()))?;

        Ok(grant(response, athlete))
    }

    async fn refresh(
        &self,
        connection: &ProviderConnection,
    ) -> Result<Option<TokenGrant>, AppError> {
        let Some(refresh_token) = &connection.refresh_token else {
            return Ok(None);
        };

        let response = self
            .token(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .await?;

        Ok(Some(grant(response, connection.external_user_id.clone())))
    }

    async fn fetch_activities(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<NewActivity>, AppError> {
        let after = since.timestamp().to_string();
        let per_page = PAGE_SIZE.to_string();
        let mut activities = Vec::new();

        for page in 1..=MAX_PAGES {
            let page = page.to_string();
            let response = self
                .http
                .get(format!("{}/api/v3/athlete/activities", self.base_url))
                .bearer_auth(access_token)
                .query(&[("after", &after), ("per_page", &per_page), ("page", &page)])
                .send()
                .await?;

            let batch: Vec<StravaActivity> = read_json(Provider::Strava, response).await?;
            let done = batch.len() < PAGE_SIZE;
            activities.extend(batch.into_iter().map(NewActivity::from));

            if done {
                break;
            }
        }

        Ok(activities)
    }
}

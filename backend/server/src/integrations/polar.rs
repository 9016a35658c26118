use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use models::{NewActivity, Provider, ProviderConnection, TokenGrant};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};
use url::form_urlencoded;

use super::{ActivityProvider, read_json};
use crate::{config::PolarConfig, error::AppError};

pub struct Polar {
    http: reqwest::Client,
    auth_base: String,
    token_base: String,
    api_base: String,
    client_id: String,
    client_secret: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    /// Seconds, usually about ten years.
    expires_in: Option<i64>,
    x_user_id: i64,
}

#[derive(Deserialize)]
struct Exercise {
    id: String,
    /// Local time without offset, e.g. `2030-05-01T07:30:00`.
    start_time: String,
    /// Minutes east of UTC.
    start_time_utc_offset: Option<i64>,
    duration: Option<String>,
    distance: Option<f64>,
    sport: Option<String>,
    detailed_sport_info: Option<String>,
    ascent: Option<f64>,
}

impl Exercise {
    fn into_activity(self) -> Option<NewActivity> {
        let local = NaiveDateTime::parse_from_str(&self.start_time, "%Y-%m-%dT%H:%M:%S%.f").ok()?;
        let offset = Duration::minutes(self.start_time_utc_offset.unwrap_or(0));
        let started_at = (local - offset).and_utc();

        let moving_time_s = self
            .duration
            .as_deref()
            .and_then(parse_duration)
            .map(|seconds| seconds.round() as u32)
            .unwrap_or(0);

        let sport = self
            .detailed_sport_info
            .or(self.sport)
            .unwrap_or_else(|| "workout".into())
            .to_lowercase();

        Some(NewActivity {
            external_id: self.id,
            name: None,
            sport,
            distance_m: self.distance.unwrap_or(0.0),
            moving_time_s,
            elevation_gain_m: self.ascent,
            started_at,
        })
    }
}

/// Seconds in an ISO-8601 duration such as `PT1H2M3.5S` or `P1DT2H`.
pub fn parse_duration(value: &str) -> Option<f64> {
    let rest = value.strip_prefix('P')?;
    let (date, time) = match rest.split_once('T') {
        Some((date, time)) => (date, time),
        None => (rest, ""),
    };

    let mut total = 0.0;
    let mut any = false;

    let sections: [(&str, &[(char, f64)]); 2] = [
        (date, &[('W', 604_800.0), ('D', 86_400.0)]),
        (time, &[('H', 3600.0), ('M', 60.0), ('S', 1.0)]),
    ];

    for (part, units) in sections {
        let mut number = String::new();

        for c in part.chars() {
            if c.is_ascii_digit() || c == '.' || c == ',' {
                number.push(if c == ',' { '.' } else { c });
                continue;
            }

            let (_, scale) = units.iter().find(|(unit, _)| *unit == c)?;
            let amount: f64 = number.parse().ok()?;

            total += amount * scale;
            any = true;
            number.clear();
        }

        if !number.is_empty() {
            return None;
        }
    }

    any.then_some(total)
}

impl Polar {
    pub fn new(http: reqwest::Client, config: &PolarConfig) -> Self {
        Self {
            http,
            auth_base: config.auth_base.trim_end_matches('/').to_string(),
            token_base: config.token_base.trim_end_matches('/').to_string(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
        }
    }

    /// AccessLink only serves data for registered users. Registering twice
    /// answers 409, which is fine.
    async fn register_user(&self, access_token: &str, member_id: &str) -> Result<(), AppError> {
        let response = self
            .http
            .post(format!("{}/v3/users", self.api_base))
            .bearer_auth(access_token)
            .json(&json!({ "member-id": member_id }))
            .send()
            .await?;

        match response.status() {
            StatusCode::CONFLICT => {
                debug!("Polar user {member_id} already registered");
                Ok(())
            }
            status if status.is_success() => Ok(()),
            status => {
                warn!("Polar user registration returned {status}");
                Err(AppError::Upstream(format!("polar returned {status}")))
            }
        }
    }
}

#[async_trait::async_trait]
impl ActivityProvider for Polar {
    fn provider(&self) -> Provider {
        Provider::Polar
    }

    fn authorize_url(&self, state: &str, redirect_uri: &str) -> String {
        let query = form_urlencoded::Serializer::new(String::new())
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("state", state)
            .finish();

        format!("{}/oauth2/authorization?{query}", self.auth_base)
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenGrant, AppError> {
        let response = self
            .http
            .post(format!("{}/v2/oauth2/token", self.token_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await?;

        let token: TokenResponse = read_json(Provider::Polar, response).await?;
        let member_id = token.x_user_id.to_string();

        self.register_user(&token.access_token, &member_id).await?;

        Ok(TokenGrant {
            external_user_id: member_id,
            expires_at: token
                .expires_in
                .map(|seconds| Utc::now() + Duration::seconds(seconds)),
            access_token: token.access_token,
            refresh_token: None,
        })
    }

    async fn refresh(
        &self,
        _connection: &ProviderConnection,
    ) -> Result<Option<TokenGrant>, AppError> {
        Ok(None)
    }

    async fn fetch_activities(
        &self,
        access_token: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<NewActivity>, AppError> {
        let response = self
            .http
            .get(format!("{}/v3/exercises", self.api_base))
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        let exercises: Vec<Exercise> = read_json(Provider::Polar, response).await?;

        let activities = exercises
            .into_iter()
            .filter_map(|exercise| {
                let id = exercise.id.clone();
                let activity = exercise.into_activity();
                if activity.is_none() {
                    warn!("Skipping polar exercise {id} with unreadable start time");
                }
                activity
            })
            .filter(|activity| activity.started_at >= since)
            .collect();

        Ok(activities)
    }
}

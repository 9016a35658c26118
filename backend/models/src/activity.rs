use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ParseEnumError;

/// Third-party fitness data sources a user can connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Strava,
    Polar,
}

impl Provider {
    pub const ALL: [Provider; 2] = [Provider::Strava, Provider::Polar];

    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Strava => "strava",
            Provider::Polar => "polar",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "strava" => Ok(Provider::Strava),
            "polar" => Ok(Provider::Polar),
            other => Err(ParseEnumError::new("provider", other)),
        }
    }
}

/// Stored OAuth credentials. Deliberately not `Serialize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConnection {
    pub user_id: String,
    pub provider: Provider,
    pub external_user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub connected_at: DateTime<Utc>,
}

impl ProviderConnection {
    pub fn expires_within(&self, now: DateTime<Utc>, seconds: i64) -> bool {
        self.expires_at
            .is_some_and(|expires_at| (expires_at - now).num_seconds() <= seconds)
    }
}

/// What a token endpoint hands back, normalised across providers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenGrant {
    pub external_user_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// An activity as fetched from a provider, before it gets an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewActivity {
    pub external_id: String,
    pub name: Option<String>,
    pub sport: String,
    pub distance_m: f64,
    pub moving_time_s: u32,
    pub elevation_gain_m: Option<f64>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub user_id: String,
    pub provider: Provider,
    pub external_id: String,
    pub name: Option<String>,
    pub sport: String,
    pub distance_m: f64,
    pub moving_time_s: u32,
    pub elevation_gain_m: Option<f64>,
    pub started_at: DateTime<Utc>,
}

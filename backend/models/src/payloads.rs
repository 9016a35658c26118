//! Request and response bodies, one block per route family.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Event, Provider, Registration, Role};

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateClub {
    pub name: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct UpdateProfile {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SetRole {
    pub role: Role,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Membership {
    pub member: bool,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateGroup {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CreateEvent {
    pub title: String,
    pub group_id: Option<String>,
    pub description: Option<String>,
    pub sport: Option<String>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    pub capacity: Option<u32>,
    #[serde(default)]
    pub waitlist_enabled: bool,
    #[serde(default)]
    pub price_cents: u32,
    #[serde(default = "default_published")]
    pub published: bool,
}

fn default_published() -> bool {
    true
}

/// Partial update. `capacity: Some(None)` clears the limit.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct UpdateEvent {
    pub title: Option<String>,
    pub description: Option<String>,
    pub sport: Option<String>,
    pub location: Option<String>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, with = "double_option")]
    pub capacity: Option<Option<u32>>,
    pub waitlist_enabled: Option<bool>,
    pub price_cents: Option<u32>,
    pub published: Option<bool>,
}

mod double_option {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        D: Deserializer<'de>,
        T: Deserialize<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }

    pub fn serialize<S, T>(value: &Option<Option<T>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Serialize,
    {
        match value {
            Some(inner) => inner.serialize(serializer),
            None => serializer.serialize_none(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    #[serde(default)]
    pub upcoming: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EventDetails {
    #[serde(flatten)]
    pub event: Event,
    pub confirmed_count: u32,
    pub pending_count: u32,
    pub waitlist_count: u32,
    pub seats_left: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RosterEntry {
    #[serde(flatten)]
    pub registration: Registration,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AuthorizeUrl {
    pub url: String,
}

#[derive(Debug, Deserialize)]
pub struct OAuthCallback {
    pub code: Option<String>,
    pub state: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ConnectionSummary {
    pub provider: Provider,
    pub external_user_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SyncResult {
    pub imported: u32,
}

#[derive(Debug, Deserialize)]
pub struct Page {
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreatePost {
    pub body: String,
    pub activity_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct CreateComment {
    pub body: String,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct LikeState {
    pub liked: bool,
    pub like_count: u32,
}

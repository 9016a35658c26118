use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Activity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub club_id: String,
    pub author_id: String,
    pub author_name: Option<String>,
    pub body: String,
    pub activity: Option<Activity>,
    pub like_count: u32,
    pub comment_count: u32,
    pub liked_by_me: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

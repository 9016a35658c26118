use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub club_id: String,
    pub group_id: Option<String>,
    pub organizer_id: String,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub sport: Option<String>,
    pub location: Option<String>,
    pub starts_at: DateTime<Utc>,
    pub ends_at: Option<DateTime<Utc>>,
    /// `None` means unlimited.
    pub capacity: Option<u32>,
    pub waitlist_enabled: bool,
    pub price_cents: u32,
    pub currency: String,
    pub published: bool,
    pub cancelled: bool,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn is_free(&self) -> bool {
        self.price_cents == 0
    }

    pub fn is_open(&self) -> bool {
        self.published && !self.cancelled
    }

    /// Seats left given the number of occupied seats, `None` when unlimited.
    pub fn seats_left(&self, occupied: u32) -> Option<u32> {
        self.capacity.map(|capacity| capacity.saturating_sub(occupied))
    }

    pub fn has_seat(&self, occupied: u32) -> bool {
        self.seats_left(occupied).is_none_or(|left| left > 0)
    }
}

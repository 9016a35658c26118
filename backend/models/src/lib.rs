//! # Models
//!
//! Types shared by the server, the sync job and the dev tools.
//!
//! Everything here is plain data: rows as the API hands them out, the enums
//! stored as text in the database, and the JSON payloads of each route.
//! Provider tokens never leave the server, so [`ProviderConnection`] is not
//! `Serialize`.

use thiserror::Error;

pub mod activity;
pub mod club;
pub mod event;
pub mod feed;
pub mod payloads;
pub mod registration;
pub mod slug;

pub use activity::{Activity, NewActivity, Provider, ProviderConnection, TokenGrant};
pub use club::{Club, Group, Profile, Role};
pub use event::Event;
pub use feed::{Comment, Post};
pub use registration::{Registration, RegistrationStatus};
pub use slug::slugify;

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Unknown {kind}: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

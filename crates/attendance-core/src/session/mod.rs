//! Client session identity and attachment state
//!
//! Exactly one [`Session`] exists per running client. Its
//! `attached_activity_id` is the single source of truth for which activity the
//! session is joined to; at most one value at any time.

pub mod store;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::activity::ActivityId;

pub use store::{FileSessionStore, MemorySessionStore, SessionStore};

/// Role of the session holder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionRole {
    /// Registered user
    Member,
    /// Anonymous visitor with a generated identity
    Guest,
}

impl SessionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionRole::Member => "member",
            SessionRole::Guest => "guest",
        }
    }
}

impl fmt::Display for SessionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Registered user id, or `guest-<uuid>` for guests
    pub identity: String,
    pub role: SessionRole,
    pub attached_activity_id: Option<ActivityId>,
}

impl Session {
    /// New guest session with a freshly generated identity
    pub fn guest() -> Self {
        Self {
            identity: format!("guest-{}", Uuid::new_v4()),
            role: SessionRole::Guest,
            attached_activity_id: None,
        }
    }

    pub fn member(user_id: impl Into<String>) -> Self {
        Self {
            identity: user_id.into(),
            role: SessionRole::Member,
            attached_activity_id: None,
        }
    }

    pub fn is_guest(&self) -> bool {
        self.role == SessionRole::Guest
    }

    pub fn is_attached(&self) -> bool {
        self.attached_activity_id.is_some()
    }
}

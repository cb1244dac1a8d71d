//! Activity records as delivered by the listing endpoint
//!
//! The activity store is external; this crate treats records as read-mostly.
//! The only field mutated locally is the attendee count, and that mutation
//! lives in [`crate::board::ActivityBoard`], never on the record itself.
//!
//! `scheduled_at` is kept as the raw wire string. A malformed value must only
//! exclude the one activity from classification, so parsing is deferred to
//! [`Activity::scheduled_in`].

use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{AttendanceError, AttendanceResult};

/// Category reported for activities that carry none
pub const UNCATEGORIZED: &str = "Uncategorized";

/// Identifier of an activity record
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActivityId(String);

impl ActivityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActivityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActivityId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ActivityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Owner of an activity, either a bare id or an embedded user record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OwnerRef {
    Id(String),
    Record {
        #[serde(alias = "_id")]
        id: String,
    },
}

impl OwnerRef {
    pub fn id(&self) -> &str {
        match self {
            OwnerRef::Id(id) => id,
            OwnerRef::Record { id } => id,
        }
    }
}

/// A scheduled activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(alias = "_id")]
    pub id: ActivityId,
    #[serde(default, deserialize_with = "lenient_text")]
    pub title: String,
    /// Raw scheduling timestamp, parsed lazily
    #[serde(default, alias = "date", deserialize_with = "lenient_text")]
    pub scheduled_at: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub location: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, alias = "attendees", deserialize_with = "lenient_count")]
    pub attendee_count: u32,
    #[serde(default, deserialize_with = "lenient_text")]
    pub description: String,
    #[serde(default, alias = "createdBy")]
    pub owner_ref: Option<OwnerRef>,
    /// Hosted image URL; carried through, never processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

/// Text field that tolerates `null` and non-string values. A bad value in
/// one record must not fail the whole listing.
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(text) => text,
        other => other.to_string(),
    })
}

fn lenient_count<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()).unwrap_or_default(),
        Value::String(text) => text.trim().parse().unwrap_or_default(),
        _ => 0,
    })
}

impl Activity {
    /// Create an activity with the fields the core cares about
    pub fn new(id: impl Into<ActivityId>, title: impl Into<String>, scheduled_at: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            scheduled_at: scheduled_at.into(),
            location: String::new(),
            category: None,
            attendee_count: 0,
            description: String::new(),
            owner_ref: None,
            image: None,
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_attendee_count(mut self, count: u32) -> Self {
        self.attendee_count = count;
        self
    }

    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_ref = Some(OwnerRef::Id(owner_id.into()));
        self
    }

    pub fn with_location(mut self, location: impl Into<String>) -> Self {
        self.location = location.into();
        self
    }

    /// Category label, falling back to [`UNCATEGORIZED`]
    pub fn category(&self) -> &str {
        self.category
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or(UNCATEGORIZED)
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.owner_ref.as_ref().map(OwnerRef::id)
    }

    /// Parse the scheduling timestamp into the given time zone.
    ///
    /// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM[:SS[.f]]` read as local to
    /// `tz`, or a bare `YYYY-MM-DD` taken as local midnight.
    pub fn scheduled_in<Tz: TimeZone>(&self, tz: &Tz) -> AttendanceResult<DateTime<Tz>> {
        let raw = self.scheduled_at.trim();

        if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
            return Ok(instant.with_timezone(tz));
        }

        let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M"))
            .ok()
            .or_else(|| {
                NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                    .ok()
                    .and_then(|date| date.and_hms_opt(0, 0, 0))
            });

        naive
            .and_then(|naive| tz.from_local_datetime(&naive).earliest())
            .ok_or_else(|| AttendanceError::ClassificationInputInvalid {
                activity_id: self.id.clone(),
                value: self.scheduled_at.clone(),
            })
    }
}

/// Inbound authoritative counter replacement for one activity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceUpdate {
    pub activity_id: ActivityId,
    pub attendee_count: u32,
}

impl AttendanceUpdate {
    pub fn new(activity_id: impl Into<ActivityId>, attendee_count: u32) -> Self {
        Self {
            activity_id: activity_id.into(),
            attendee_count,
        }
    }
}

//! Attendance endpoints consumed by the controller
//!
//! The server is the authority on counts: attach and detach answer with the
//! activity's new attendee count, and detaching an already-detached session
//! is idempotent on the server side.

pub mod http;

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::activity::{Activity, ActivityId};
use crate::error::AttendanceResult;

pub use http::HttpAttendanceApi;

/// Server answer to an attach or detach request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceReceipt {
    #[serde(alias = "attendees")]
    pub attendee_count: u32,
}

#[async_trait]
pub trait AttendanceApi: Send + Sync + Debug {
    async fn attach(&self, activity_id: &ActivityId) -> AttendanceResult<AttendanceReceipt>;

    async fn detach(&self, activity_id: &ActivityId) -> AttendanceResult<AttendanceReceipt>;

    /// Every activity visible to the session
    async fn list_activities(&self) -> AttendanceResult<Vec<Activity>>;
}

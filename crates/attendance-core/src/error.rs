//! Error types and handling for the attendance-core library
//!
//! This module defines all error types that can occur during attendance
//! operations and how callers are expected to treat them.
//!
//! # Error Categories
//!
//! - **Invariant Errors** - `AlreadyAttached`, resolved locally, never reach the network
//! - **Concurrency Errors** - `OperationInProgress`, a duplicate transition while one is in flight
//! - **Request Errors** - `RequestFailed`, the attach/detach endpoint refused or was unreachable;
//!   the optimistic update has already been rolled back when the caller sees it
//! - **Transport Errors** - `TransportUnavailable`, advisory only: displayed counts may be stale
//! - **Input Errors** - `ClassificationInputInvalid`, a single activity is excluded from the buckets
//!
//! Nothing here is fatal to the process. Every failure is recoverable at the
//! session or request level.
//!
//! # Basic Pattern
//!
//! ```rust,no_run
//! # use rollcall_attendance_core::{AttendanceClient, AttendanceError, ActivityId};
//! # use std::sync::Arc;
//! # async fn example(client: Arc<AttendanceClient>) {
//! match client.join(&ActivityId::from("evt-42")).await {
//!     Ok(count) => println!("Joined, {} attending", count),
//!     Err(AttendanceError::AlreadyAttached { current, .. }) => {
//!         println!("Leave {} first", current);
//!     }
//!     Err(e) if e.is_local() => println!("Try again shortly: {}", e),
//!     Err(e) => eprintln!("Join failed: {}", e),
//! }
//! # }
//! ```

use thiserror::Error;

use crate::activity::ActivityId;

/// Result type alias for attendance-core operations
pub type AttendanceResult<T> = Result<T, AttendanceError>;

/// Error types for attendance coordination
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttendanceError {
    /// The session is attached to a different activity
    #[error("Already attached to {current}, cannot attach to {requested}")]
    AlreadyAttached {
        current: ActivityId,
        requested: ActivityId,
    },

    /// The same transition is already in flight, or a reversal is already queued
    #[error("Operation in progress: {transition}")]
    OperationInProgress { transition: String },

    /// Realtime channel is degraded or not connected; counts may be stale
    #[error("Transport unavailable: {reason}")]
    TransportUnavailable { reason: String },

    /// Attach/detach endpoint error
    #[error("Request for {activity_id} failed: {reason}")]
    RequestFailed {
        activity_id: ActivityId,
        reason: String,
    },

    /// Malformed scheduling timestamp on a single activity
    #[error("Invalid scheduled time for {activity_id}: {value:?}")]
    ClassificationInputInvalid {
        activity_id: ActivityId,
        value: String,
    },

    #[error("Session store failed: {reason}")]
    SessionStoreFailed { reason: String },

    #[error("No active session")]
    NoSession,

    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    #[error("Network error: {reason}")]
    NetworkError { reason: String },

    #[error("Protocol error: {reason}")]
    ProtocolError { reason: String },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl AttendanceError {
    /// Create a request failed error
    pub fn request_failed(activity_id: &ActivityId, reason: impl Into<String>) -> Self {
        Self::RequestFailed {
            activity_id: activity_id.clone(),
            reason: reason.into(),
        }
    }

    /// Create a transport unavailable error
    pub fn transport_unavailable(reason: impl Into<String>) -> Self {
        Self::TransportUnavailable { reason: reason.into() }
    }

    /// Create a session store error
    pub fn store_failed(reason: impl Into<String>) -> Self {
        Self::SessionStoreFailed { reason: reason.into() }
    }

    /// Create a network error
    pub fn network_error(reason: impl Into<String>) -> Self {
        Self::NetworkError { reason: reason.into() }
    }

    /// Create a protocol error
    pub fn protocol_error(reason: impl Into<String>) -> Self {
        Self::ProtocolError { reason: reason.into() }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Check if retrying the same operation later may succeed
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AttendanceError::NetworkError { .. }
                | AttendanceError::TransportUnavailable { .. }
                | AttendanceError::RequestFailed { .. }
        )
    }

    /// Check if the error was resolved without issuing any network request
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            AttendanceError::AlreadyAttached { .. }
                | AttendanceError::OperationInProgress { .. }
                | AttendanceError::ClassificationInputInvalid { .. }
        )
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            AttendanceError::AlreadyAttached { .. } => "invariant",
            AttendanceError::OperationInProgress { .. } => "concurrency",
            AttendanceError::RequestFailed { .. } => "request",

            AttendanceError::TransportUnavailable { .. }
            | AttendanceError::NetworkError { .. }
            | AttendanceError::ProtocolError { .. } => "network",

            AttendanceError::ClassificationInputInvalid { .. } => "input",

            AttendanceError::SessionStoreFailed { .. } | AttendanceError::NoSession => "session",

            AttendanceError::InvalidConfiguration { .. } => "configuration",

            AttendanceError::InternalError { .. } => "system",
        }
    }
}

impl From<serde_json::Error> for AttendanceError {
    fn from(err: serde_json::Error) -> Self {
        AttendanceError::protocol_error(err.to_string())
    }
}

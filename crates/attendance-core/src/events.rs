//! Event stream for UI integration
//!
//! Every attendance-side change is published on a `tokio::sync::broadcast`
//! channel. Renderers subscribe through
//! [`crate::AttendanceClient::subscribe_events`] and redraw counters as
//! events arrive. A lagging subscriber loses old events, never blocks the
//! publisher.
//!
//! ```rust,no_run
//! # use rollcall_attendance_core::{AttendanceClient, ClientEvent};
//! # use std::sync::Arc;
//! # async fn example(client: Arc<AttendanceClient>) {
//! let mut events = client.subscribe_events();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         if let ClientEvent::CountChanged { activity_id, attendee_count } = event {
//!             println!("{} now has {} attendees", activity_id, attendee_count);
//!         }
//!     }
//! });
//! # }
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::activity::ActivityId;
use crate::channel::ChannelStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientEvent {
    /// Server confirmed an attach
    Attached {
        activity_id: ActivityId,
        attendee_count: u32,
    },
    /// Server confirmed a detach
    Detached {
        activity_id: ActivityId,
        attendee_count: u32,
    },
    /// Attach or detach was rolled back
    AttachmentFailed {
        activity_id: ActivityId,
        reason: String,
    },
    /// Displayed count changed, optimistically or authoritatively
    CountChanged {
        activity_id: ActivityId,
        attendee_count: u32,
    },
    ChannelStatusChanged { status: ChannelStatus },
    /// Termination cleanup released the attachment
    SessionReleased { activity_id: ActivityId },
}

/// Cloneable publisher half shared by the board, controller and client
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<ClientEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish to current subscribers; no subscribers is not an error
    pub fn publish(&self, event: ClientEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

//! Transport seam for the realtime channel
//!
//! A [`ChannelTransport`] opens connections; a [`TransportConnection`] moves
//! typed messages over one of them. The reconnect loop in
//! [`super::RealtimeChannel`] is written against these traits only, so the
//! WebSocket transport and the in-process [`super::MemoryHub`] are
//! interchangeable.
//!
//! Frames are JSON objects tagged by `event`:
//!
//! ```json
//! {"event":"attendanceChanged","activityId":"evt-1","attendeeCount":6}
//! {"event":"attach","activityId":"evt-1"}
//! ```

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::activity::{ActivityId, AttendanceUpdate};
use crate::error::AttendanceResult;

/// Server-to-client frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ServerMessage {
    AttendanceChanged(AttendanceUpdate),
    /// Any event this client does not understand
    #[serde(other)]
    Unknown,
}

/// Client-to-server frames
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Ask the server to deliver count changes for an activity
    Attach {
        #[serde(rename = "activityId")]
        activity_id: ActivityId,
    },
}

impl ServerMessage {
    pub fn decode(text: &str) -> AttendanceResult<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

impl ClientMessage {
    pub fn attach(activity_id: &ActivityId) -> Self {
        ClientMessage::Attach {
            activity_id: activity_id.clone(),
        }
    }

    pub fn encode(&self) -> AttendanceResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Factory for realtime connections
#[async_trait]
pub trait ChannelTransport: Send + Sync + Debug {
    async fn connect(&self) -> AttendanceResult<Box<dyn TransportConnection>>;
}

/// One live connection.
///
/// `recv` yields `None` once the peer closed the connection. A
/// `ProtocolError` is a single unreadable frame and the connection stays
/// usable; any other error means the connection is lost.
#[async_trait]
pub trait TransportConnection: Send {
    async fn send(&mut self, message: &ClientMessage) -> AttendanceResult<()>;
    async fn recv(&mut self) -> Option<AttendanceResult<ServerMessage>>;
}

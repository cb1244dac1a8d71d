//! # Rollcall attendance core
//!
//! Client-side coordination for joining and leaving scheduled activities.
//!
//! - [`controller`] - single-attachment sessions with optimistic counts and rollback
//! - [`channel`] - realtime count updates over a reconnecting connection
//! - [`classifier`] - active-today / future / past buckets by calendar day
//! - [`filter`] - category and day narrowing over the buckets
//! - [`guard`] - guest cleanup on process or page termination
//! - [`session`] - session identity and its persisted record
//!
//! [`ClientBuilder`] wires all of it into an [`AttendanceClient`].
//!
//! ```rust,no_run
//! use rollcall_attendance_core::{ActivityId, ClientBuilder, ClientEvent};
//!
//! # async fn example() -> rollcall_attendance_core::AttendanceResult<()> {
//! let client = ClientBuilder::new().build().await?;
//! client.start();
//! client.login_guest().await?;
//! client.refresh_activities().await?;
//!
//! let mut events = client.subscribe_events();
//! client.join(&ActivityId::from("evt-1")).await?;
//! while let Ok(event) = events.recv().await {
//!     if let ClientEvent::CountChanged { activity_id, attendee_count } = event {
//!         println!("{}: {}", activity_id, attendee_count);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod activity;
pub mod api;
pub mod board;
pub mod channel;
pub mod classifier;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod filter;
pub mod guard;
pub mod logging;
pub mod session;

pub use activity::{Activity, ActivityId, AttendanceUpdate, OwnerRef, UNCATEGORIZED};
pub use api::{AttendanceApi, AttendanceReceipt, HttpAttendanceApi};
pub use board::{ActivityBoard, BoardDiff};
pub use channel::{
    AttendanceHandler, ChannelStatus, ChannelTransport, MemoryHub, RealtimeChannel,
    ReconnectPolicy, Subscription, WebSocketTransport,
};
pub use classifier::{classify, classify_in, ActivityBuckets, DatedActivity, TemporalBucket};
pub use client::{AttendanceClient, ClientBuilder};
pub use config::AttendanceConfig;
pub use controller::{AttachmentPhase, AttendanceController};
pub use error::{AttendanceError, AttendanceResult};
pub use events::{ClientEvent, EventPublisher};
pub use filter::{FilterEngine, FilterSelection};
pub use guard::{LifecycleSignal, LifecycleSignals, SessionGuard};
pub use logging::{setup_logging, LogFormat, LoggingConfig};
pub use session::{FileSessionStore, MemorySessionStore, Session, SessionRole, SessionStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

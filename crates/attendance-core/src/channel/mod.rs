//! Realtime attendance channel
//!
//! [`RealtimeChannel`] keeps one connection to the server-side broadcast hub
//! for its whole lifetime and hides transport loss from its subscribers:
//!
//! - **Subscriptions** - any number of handlers per activity id, each removed
//!   through the [`Subscription`] handle returned at registration
//! - **Delivery scope** - ids passed to [`RealtimeChannel::notify_attach`] are
//!   remembered and replayed on every new connection
//! - **Reconnect** - exponential backoff per [`ReconnectPolicy`], never faster
//!   than its minimum interval
//! - **Degradation** - once the retry budget is spent the channel stops and
//!   reports [`ChannelStatus::Degraded`] until [`RealtimeChannel::reset`]
//!
//! Transport errors never reach subscribers. Callers that need to know whether
//! displayed counts are live use [`RealtimeChannel::check_fresh`].
//!
//! # Examples
//!
//! ```rust,no_run
//! # use rollcall_attendance_core::channel::{MemoryHub, RealtimeChannel, ReconnectPolicy};
//! # use rollcall_attendance_core::{ActivityId, AttendanceUpdate};
//! # use std::sync::Arc;
//! # async fn example() {
//! let hub = MemoryHub::new();
//! let channel = RealtimeChannel::new(Arc::new(hub.transport()), ReconnectPolicy::quick());
//! channel.connect();
//!
//! let id = ActivityId::from("evt-1");
//! let subscription = channel.subscribe(&id, |update: AttendanceUpdate| {
//!     println!("{} now has {}", update.activity_id, update.attendee_count);
//! });
//! channel.notify_attach(&id);
//!
//! // later
//! subscription.unsubscribe();
//! channel.disconnect().await;
//! # }
//! ```

pub mod backoff;
pub mod memory;
pub mod transport;
pub mod websocket;

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::activity::{ActivityId, AttendanceUpdate};
use crate::error::{AttendanceError, AttendanceResult};
use crate::events::{ClientEvent, EventPublisher};

pub use backoff::ReconnectPolicy;
pub use memory::{MemoryHub, MemoryTransport};
pub use transport::{ChannelTransport, ClientMessage, ServerMessage, TransportConnection};
pub use websocket::WebSocketTransport;

/// Connection state of the realtime channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelStatus {
    /// Never connected
    Idle,
    Connecting,
    Connected,
    /// Waiting before reconnect attempt `attempt`
    Reconnecting { attempt: u32 },
    /// Retry budget exhausted; counts may be stale until reset
    Degraded,
    /// Stopped by disconnect
    Closed,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelStatus::Idle => write!(f, "idle"),
            ChannelStatus::Connecting => write!(f, "connecting"),
            ChannelStatus::Connected => write!(f, "connected"),
            ChannelStatus::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
            ChannelStatus::Degraded => write!(f, "degraded"),
            ChannelStatus::Closed => write!(f, "closed"),
        }
    }
}

/// Receives authoritative count changes for one activity
#[async_trait]
pub trait AttendanceHandler: Send + Sync {
    async fn on_attendance_changed(&self, update: AttendanceUpdate);
}

#[async_trait]
impl<F> AttendanceHandler for F
where
    F: Fn(AttendanceUpdate) + Send + Sync,
{
    async fn on_attendance_changed(&self, update: AttendanceUpdate) {
        self(update)
    }
}

type Subscribers = Vec<(u64, Arc<dyn AttendanceHandler>)>;

struct ChannelInner {
    transport: Arc<dyn ChannelTransport>,
    policy: ReconnectPolicy,
    subscribers: DashMap<ActivityId, Subscribers>,
    next_subscriber_id: AtomicU64,
    scope: Mutex<Vec<ActivityId>>,
    commands: Mutex<Option<mpsc::UnboundedSender<ActivityId>>>,
    status_tx: watch::Sender<ChannelStatus>,
    events: Mutex<Option<EventPublisher>>,
}

enum PumpExit {
    Shutdown,
    Lost(String),
}

impl ChannelInner {
    fn set_status(&self, status: ChannelStatus) {
        let previous = self.status_tx.send_replace(status.clone());
        if previous != status {
            trace!(from = %previous, to = %status, "Realtime channel status changed");
            if let Some(events) = self.events.lock().as_ref() {
                events.publish(ClientEvent::ChannelStatusChanged { status });
            }
        }
    }

    fn remove_subscriber(&self, activity_id: &ActivityId, subscriber_id: u64) {
        if let Some(mut entry) = self.subscribers.get_mut(activity_id) {
            entry.retain(|(id, _)| *id != subscriber_id);
        }
        self.subscribers
            .remove_if(activity_id, |_, handlers| handlers.is_empty());
    }

    async fn run(
        &self,
        mut commands: mpsc::UnboundedReceiver<ActivityId>,
        mut stop: watch::Receiver<bool>,
    ) {
        let mut attempt: u32 = 0;

        loop {
            let connected = tokio::select! {
                result = self.transport.connect() => result,
                _ = stop.changed() => break,
            };

            match connected {
                Ok(mut connection) => {
                    attempt = 0;
                    self.set_status(ChannelStatus::Connected);
                    info!("Realtime channel connected");

                    match self.pump(connection.as_mut(), &mut commands, &mut stop).await {
                        PumpExit::Shutdown => break,
                        PumpExit::Lost(reason) => warn!(%reason, "Realtime connection lost"),
                    }
                }
                Err(e) => {
                    warn!(attempt = attempt + 1, error = %e, "Realtime connect failed");
                }
            }

            attempt += 1;
            if attempt > self.policy.max_attempts {
                error!(
                    attempts = self.policy.max_attempts,
                    "Realtime channel degraded, updates suspended until reset"
                );
                self.set_status(ChannelStatus::Degraded);
                return;
            }

            let delay = self.policy.delay_for(attempt);
            self.set_status(ChannelStatus::Reconnecting { attempt });
            debug!(attempt, delay_ms = delay.as_millis() as u64, "Scheduling reconnect");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = stop.changed() => break,
            }
        }

        self.set_status(ChannelStatus::Closed);
        debug!("Realtime channel loop stopped");
    }

    async fn pump(
        &self,
        connection: &mut dyn TransportConnection,
        commands: &mut mpsc::UnboundedReceiver<ActivityId>,
        stop: &mut watch::Receiver<bool>,
    ) -> PumpExit {
        let mut sent = HashSet::new();

        let scope = self.scope.lock().clone();
        if !scope.is_empty() {
            debug!(count = scope.len(), "Replaying delivery scope");
        }
        for activity_id in scope {
            if let Err(e) = connection.send(&ClientMessage::attach(&activity_id)).await {
                return PumpExit::Lost(e.to_string());
            }
            sent.insert(activity_id);
        }

        loop {
            tokio::select! {
                frame = connection.recv() => match frame {
                    None => return PumpExit::Lost("closed by server".to_string()),
                    Some(Ok(ServerMessage::AttendanceChanged(update))) => self.dispatch(update).await,
                    Some(Ok(ServerMessage::Unknown)) => debug!("Ignoring unknown realtime event"),
                    Some(Err(AttendanceError::ProtocolError { reason })) => {
                        warn!(%reason, "Skipping malformed realtime frame");
                    }
                    Some(Err(e)) => return PumpExit::Lost(e.to_string()),
                },
                command = commands.recv() => match command {
                    Some(activity_id) => {
                        if sent.insert(activity_id.clone()) {
                            if let Err(e) = connection.send(&ClientMessage::attach(&activity_id)).await {
                                return PumpExit::Lost(e.to_string());
                            }
                        }
                    }
                    None => return PumpExit::Shutdown,
                },
                _ = stop.changed() => return PumpExit::Shutdown,
            }
        }
    }

    async fn dispatch(&self, update: AttendanceUpdate) {
        let handlers: Vec<Arc<dyn AttendanceHandler>> = self
            .subscribers
            .get(&update.activity_id)
            .map(|entry| entry.iter().map(|(_, handler)| handler.clone()).collect())
            .unwrap_or_default();

        trace!(
            activity_id = %update.activity_id,
            attendee_count = update.attendee_count,
            handlers = handlers.len(),
            "Dispatching attendance update"
        );

        for handler in handlers {
            handler.on_attendance_changed(update.clone()).await;
        }
    }
}

/// Handle returned by [`RealtimeChannel::subscribe`]
#[derive(Debug)]
#[must_use = "dropping a Subscription keeps the handler registered; call unsubscribe to remove it"]
pub struct Subscription {
    activity_id: ActivityId,
    subscriber_id: u64,
    registry: Weak<ChannelInner>,
}

impl Subscription {
    pub fn activity_id(&self) -> &ActivityId {
        &self.activity_id
    }

    pub fn unsubscribe(self) {
        if let Some(inner) = self.registry.upgrade() {
            inner.remove_subscriber(&self.activity_id, self.subscriber_id);
        }
    }
}

struct Runner {
    task: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

pub struct RealtimeChannel {
    inner: Arc<ChannelInner>,
    runner: Mutex<Option<Runner>>,
}

impl fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("transport", &self.inner.transport)
            .field("status", &self.status())
            .field("subscribed_activities", &self.inner.subscribers.len())
            .finish()
    }
}

impl RealtimeChannel {
    pub fn new(transport: Arc<dyn ChannelTransport>, policy: ReconnectPolicy) -> Self {
        let (status_tx, _) = watch::channel(ChannelStatus::Idle);
        Self {
            inner: Arc::new(ChannelInner {
                transport,
                policy,
                subscribers: DashMap::new(),
                next_subscriber_id: AtomicU64::new(1),
                scope: Mutex::new(Vec::new()),
                commands: Mutex::new(None),
                status_tx,
                events: Mutex::new(None),
            }),
            runner: Mutex::new(None),
        }
    }

    /// Forward status changes as [`ClientEvent::ChannelStatusChanged`]
    pub fn with_events(self, events: EventPublisher) -> Self {
        *self.inner.events.lock() = Some(events);
        self
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.inner.policy
    }

    /// Start the connection loop. A no-op while the loop is running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut runner = self.runner.lock();
        if runner.as_ref().map_or(false, |r| !r.task.is_finished()) {
            debug!("Realtime channel already running");
            return;
        }

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        *self.inner.commands.lock() = Some(command_tx);
        self.inner.set_status(ChannelStatus::Connecting);

        let inner = self.inner.clone();
        let task = tokio::spawn(async move { inner.run(command_rx, stop_rx).await });
        *runner = Some(Runner {
            task,
            stop: stop_tx,
        });
    }

    /// Stop the connection loop and wait for it to exit
    pub async fn disconnect(&self) {
        self.stop_runner().await;
        self.inner.commands.lock().take();
        self.inner.set_status(ChannelStatus::Closed);
        info!("Realtime channel disconnected");
    }

    /// Leave `Degraded` (or restart a live loop) with a fresh retry budget
    pub async fn reset(&self) {
        info!(status = %self.status(), "Resetting realtime channel");
        self.stop_runner().await;
        self.connect();
    }

    async fn stop_runner(&self) {
        let runner = self.runner.lock().take();
        if let Some(runner) = runner {
            let _ = runner.stop.send(true);
            if let Err(e) = runner.task.await {
                warn!(error = %e, "Realtime channel task ended abnormally");
            }
        }
    }

    /// Register `handler` for every update to `activity_id`
    pub fn subscribe<H>(&self, activity_id: &ActivityId, handler: H) -> Subscription
    where
        H: AttendanceHandler + 'static,
    {
        let subscriber_id = self.inner.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .subscribers
            .entry(activity_id.clone())
            .or_default()
            .push((subscriber_id, Arc::new(handler)));

        trace!(activity_id = %activity_id, subscriber_id, "Subscribed to attendance updates");
        Subscription {
            activity_id: activity_id.clone(),
            subscriber_id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Ask the server to deliver updates for `activity_id`. Fire-and-forget:
    /// while disconnected the id is only recorded and goes out on the next
    /// connection.
    pub fn notify_attach(&self, activity_id: &ActivityId) {
        {
            let mut scope = self.inner.scope.lock();
            if !scope.contains(activity_id) {
                scope.push(activity_id.clone());
            }
        }
        if let Some(commands) = self.inner.commands.lock().as_ref() {
            let _ = commands.send(activity_id.clone());
        }
    }

    pub fn status(&self) -> ChannelStatus {
        self.inner.status_tx.borrow().clone()
    }

    pub fn status_watch(&self) -> watch::Receiver<ChannelStatus> {
        self.inner.status_tx.subscribe()
    }

    /// `TransportUnavailable` unless counts are currently live
    pub fn check_fresh(&self) -> AttendanceResult<()> {
        match self.status() {
            ChannelStatus::Connected => Ok(()),
            other => Err(AttendanceError::transport_unavailable(format!(
                "realtime channel is {}",
                other
            ))),
        }
    }

    pub fn subscriber_count(&self, activity_id: &ActivityId) -> usize {
        self.inner
            .subscribers
            .get(activity_id)
            .map_or(0, |entry| entry.len())
    }

    /// Activity ids replayed on every new connection
    pub fn scope(&self) -> Vec<ActivityId> {
        self.inner.scope.lock().clone()
    }
}

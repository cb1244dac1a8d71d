//! Client facade
//!
//! [`ClientBuilder`] assembles the session store, endpoint client, realtime
//! channel, controller and guard into one [`AttendanceClient`]. Every piece
//! can be injected, which is how tests run the whole client against an
//! in-process hub and a scripted endpoint.
//!
//! # Examples
//!
//! ```rust,no_run
//! use rollcall_attendance_core::{ActivityId, AttendanceConfig, ClientBuilder};
//!
//! # async fn example() -> rollcall_attendance_core::AttendanceResult<()> {
//! let client = ClientBuilder::new()
//!     .config(AttendanceConfig::from_env()?)
//!     .build()
//!     .await?;
//!
//! client.start();
//! client.login_guest().await?;
//! client.refresh_activities().await?;
//! client.join(&ActivityId::from("evt-42")).await?;
//!
//! let view = client.view(&chrono::Local::now());
//! println!("{} happening today", view.active.len());
//!
//! client.logout().await?;
//! client.stop().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::activity::{Activity, ActivityId};
use crate::api::{AttendanceApi, HttpAttendanceApi};
use crate::board::{ActivityBoard, BoardDiff};
use crate::channel::{ChannelTransport, RealtimeChannel, WebSocketTransport};
use crate::classifier::{classify_in, ActivityBuckets};
use crate::config::AttendanceConfig;
use crate::controller::{AttachmentPhase, AttendanceController};
use crate::error::{AttendanceError, AttendanceResult};
use crate::events::{ClientEvent, EventPublisher};
use crate::filter::{categories, scope_to_session, FilterEngine, FilterSelection};
use crate::guard::{LifecycleSignals, SessionGuard};
use crate::session::{FileSessionStore, MemorySessionStore, Session, SessionRole, SessionStore};

/// Fluent builder for [`AttendanceClient`]
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: AttendanceConfig,
    store: Option<Arc<dyn SessionStore>>,
    api: Option<Arc<dyn AttendanceApi>>,
    transport: Option<Arc<dyn ChannelTransport>>,
    signals: Option<LifecycleSignals>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: AttendanceConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `store` instead of the one `session_path` selects
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Use `api` instead of the HTTP endpoint client
    pub fn with_api(mut self, api: Arc<dyn AttendanceApi>) -> Self {
        self.api = Some(api);
        self
    }

    /// Use `transport` instead of the WebSocket transport
    pub fn with_transport(mut self, transport: Arc<dyn ChannelTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Share an existing lifecycle signal source with the host
    pub fn with_signals(mut self, signals: LifecycleSignals) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Validate the configuration, wire the components and restore any
    /// persisted session
    pub async fn build(self) -> AttendanceResult<Arc<AttendanceClient>> {
        let config = self.config;
        config.validate()?;

        let store: Arc<dyn SessionStore> = match (self.store, &config.session_path) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(FileSessionStore::new(path.clone())),
            (None, None) => Arc::new(MemorySessionStore::new()),
        };

        let api: Arc<dyn AttendanceApi> = match self.api {
            Some(api) => api,
            None => {
                let http = HttpAttendanceApi::new(&config.api_base_url, config.request_timeout)?;
                match &config.auth_token {
                    Some(token) => Arc::new(http.with_token(token)),
                    None => Arc::new(http),
                }
            }
        };

        let transport: Arc<dyn ChannelTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(WebSocketTransport::parse(&config.realtime_url)?),
        };

        let events = EventPublisher::new(config.event_channel_capacity);
        let board = Arc::new(ActivityBoard::new(events.clone()));
        let channel = Arc::new(
            RealtimeChannel::new(transport, config.reconnect.clone()).with_events(events.clone()),
        );
        let controller = Arc::new(AttendanceController::new(
            store,
            api.clone(),
            board,
            channel.clone(),
            events.clone(),
        ));
        let guard = SessionGuard::new(controller.clone());
        let signals = self.signals.unwrap_or_default();

        if controller.restore()?.is_some() {
            guard.register(&signals);
        }

        Ok(Arc::new(AttendanceClient {
            config,
            api,
            events,
            channel,
            controller,
            guard,
            signals,
            filters: Mutex::new(FilterEngine::new()),
        }))
    }
}

#[derive(Debug)]
pub struct AttendanceClient {
    config: AttendanceConfig,
    api: Arc<dyn AttendanceApi>,
    events: EventPublisher,
    channel: Arc<RealtimeChannel>,
    controller: Arc<AttendanceController>,
    guard: SessionGuard,
    signals: LifecycleSignals,
    filters: Mutex<FilterEngine>,
}

impl AttendanceClient {
    pub fn config(&self) -> &AttendanceConfig {
        &self.config
    }

    /// Open the realtime channel
    pub fn start(&self) {
        self.channel.connect();
    }

    /// Stop listening for termination and close the realtime channel
    pub async fn stop(&self) {
        self.guard.unregister();
        self.channel.disconnect().await;
    }

    /// Log in as a guest, reusing a persisted guest session when there is one
    pub async fn login_guest(&self) -> AttendanceResult<Session> {
        match self.controller.session() {
            Some(current) if current.is_guest() => {
                self.guard.register(&self.signals);
                return Ok(current);
            }
            Some(_) => self.release_attachment().await,
            None => {}
        }

        let session = match self.controller.store().load()? {
            Some(persisted) if persisted.is_guest() => persisted,
            _ => Session::guest(),
        };
        self.controller.begin_session(session.clone())?;
        self.guard.register(&self.signals);
        info!(identity = %session.identity, "Guest logged in");
        Ok(session)
    }

    /// Log in as a registered member, replacing any previous session
    pub async fn login_member(&self, user_id: impl Into<String>) -> AttendanceResult<Session> {
        let user_id = user_id.into();
        if let Some(current) = self.controller.session() {
            if current.role == SessionRole::Member && current.identity == user_id {
                self.guard.register(&self.signals);
                return Ok(current);
            }
            self.release_attachment().await;
        }

        let session = Session::member(user_id);
        self.controller.begin_session(session.clone())?;
        self.guard.register(&self.signals);
        info!(identity = %session.identity, "Member logged in");
        Ok(session)
    }

    /// Detach if attached, stop the guard and clear the persisted session
    pub async fn logout(&self) -> AttendanceResult<()> {
        self.release_attachment().await;
        self.guard.unregister();
        self.controller.end_session()?;
        info!("Logged out");
        Ok(())
    }

    async fn release_attachment(&self) {
        if self.controller.attached_activity().is_none() {
            return;
        }
        if let Err(e) = self.controller.detach().await {
            warn!(error = %e, "Detach during session change failed");
        }
    }

    pub fn session(&self) -> Option<Session> {
        self.controller.session()
    }

    /// Fetch the listing, scope it to the session and display it
    pub async fn refresh_activities(&self) -> AttendanceResult<BoardDiff> {
        let session = self.controller.session().ok_or(AttendanceError::NoSession)?;
        let activities = self.api.list_activities().await?;
        Ok(self.display_activities(scope_to_session(activities, &session)))
    }

    pub fn display_activities(&self, activities: Vec<Activity>) -> BoardDiff {
        self.controller.display(activities)
    }

    /// Displayed activities with live counts
    pub fn activities(&self) -> Vec<Activity> {
        self.controller.board().snapshot()
    }

    pub fn attendee_count(&self, activity_id: &ActivityId) -> Option<u32> {
        self.controller.board().count(activity_id)
    }

    pub async fn join(&self, activity_id: &ActivityId) -> AttendanceResult<u32> {
        self.controller.attach(activity_id).await
    }

    pub async fn leave(&self) -> AttendanceResult<Option<u32>> {
        self.controller.detach().await
    }

    pub fn phase(&self) -> AttachmentPhase {
        self.controller.phase()
    }

    /// Classify the displayed activities against `now` and apply the filters
    pub fn view<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> ActivityBuckets {
        let buckets = classify_in(&self.activities(), now);
        let mut filters = self.filters.lock();
        filters.set_source(buckets);
        filters.view().clone()
    }

    pub fn view_now(&self) -> ActivityBuckets {
        self.view(&Local::now())
    }

    pub fn set_category_filter(&self, category: Option<String>) {
        self.filters.lock().set_category(category);
    }

    pub fn set_day_filter(&self, day: Option<NaiveDate>) {
        self.filters.lock().set_day(day);
    }

    pub fn clear_filters(&self) {
        self.filters.lock().clear();
    }

    pub fn filter_selection(&self) -> FilterSelection {
        self.filters.lock().selection().clone()
    }

    pub fn categories(&self) -> Vec<String> {
        categories(&self.activities())
    }

    /// `TransportUnavailable` while displayed counts may be stale
    pub fn counts_fresh(&self) -> AttendanceResult<()> {
        self.channel.check_fresh()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    pub fn controller(&self) -> &Arc<AttendanceController> {
        &self.controller
    }

    pub fn channel(&self) -> &Arc<RealtimeChannel> {
        &self.channel
    }

    pub fn guard(&self) -> &SessionGuard {
        &self.guard
    }

    pub fn signals(&self) -> &LifecycleSignals {
        &self.signals
    }
}

//! Attendance controller
//!
//! Owns the session's attachment and drives every change to it:
//!
//! ```text
//! Detached --attach--> Attaching --ok--> Attached --detach--> Detaching --ok--> Detached
//!               ^          |                                      |
//!               +--failed--+               Attached <--failed-----+
//! ```
//!
//! # Ordering
//!
//! - At most one attach/detach request is outbound at a time. Requests queue
//!   on a single permit, which the termination path takes too.
//! - Repeating the in-flight transition fails with `OperationInProgress`.
//!   The opposite transition is queued and runs once the in-flight request
//!   settles. Only one transition can be queued.
//! - Read-modify-persist of the session happens under one lock and never
//!   spans an await point, so a guard-triggered release cannot interleave
//!   with a user-initiated attach.
//!
//! # Optimism
//!
//! The displayed count moves before the request is sent. A successful
//! receipt replaces it with the server's count, a failure reverts it along
//! with the session change. Broadcast updates may overwrite the count at any
//! point in between.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::activity::{Activity, ActivityId, AttendanceUpdate};
use crate::api::AttendanceApi;
use crate::board::{ActivityBoard, BoardDiff};
use crate::channel::{RealtimeChannel, Subscription};
use crate::error::{AttendanceError, AttendanceResult};
use crate::events::{ClientEvent, EventPublisher};
use crate::session::{Session, SessionStore};

/// Externally observable attachment state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachmentPhase {
    Detached,
    Attaching,
    Attached,
    Detaching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Attach,
    Detach,
}

impl Transition {
    fn name(self) -> &'static str {
        match self {
            Transition::Attach => "attach",
            Transition::Detach => "detach",
        }
    }
}

#[derive(Debug, Default)]
struct Traffic {
    in_flight: Option<Transition>,
    queued: Option<Transition>,
}

/// Admission to the request queue. Settles the traffic state on drop.
struct Ticket<'a> {
    traffic: &'a Mutex<Traffic>,
    transition: Transition,
    permit: Option<OwnedMutexGuard<()>>,
}

impl Ticket<'_> {
    fn activate(&mut self, permit: OwnedMutexGuard<()>) {
        let mut traffic = self.traffic.lock();
        traffic.in_flight = Some(self.transition);
        if traffic.queued == Some(self.transition) {
            traffic.queued = None;
        }
        self.permit = Some(permit);
    }
}

impl Drop for Ticket<'_> {
    fn drop(&mut self) {
        let mut traffic = self.traffic.lock();
        if self.permit.is_some() {
            // queued never holds this ticket's own transition once activated
            traffic.in_flight = traffic.queued.take();
        } else if traffic.queued == Some(self.transition) {
            // cancelled while waiting
            traffic.queued = None;
        } else if traffic.in_flight == Some(self.transition) {
            // cancelled before the permit, the queued ticket is next in line
            traffic.in_flight = traffic.queued.take();
        }
        // the permit is released after the traffic state settles
    }
}

pub struct AttendanceController {
    session: Mutex<Option<Session>>,
    store: Arc<dyn SessionStore>,
    api: Arc<dyn AttendanceApi>,
    board: Arc<ActivityBoard>,
    channel: Arc<RealtimeChannel>,
    events: EventPublisher,
    permit: Arc<tokio::sync::Mutex<()>>,
    traffic: Mutex<Traffic>,
    subscriptions: Mutex<HashMap<ActivityId, Subscription>>,
}

impl fmt::Debug for AttendanceController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttendanceController")
            .field("session", &*self.session.lock())
            .field("traffic", &*self.traffic.lock())
            .finish()
    }
}

impl AttendanceController {
    pub fn new(
        store: Arc<dyn SessionStore>,
        api: Arc<dyn AttendanceApi>,
        board: Arc<ActivityBoard>,
        channel: Arc<RealtimeChannel>,
        events: EventPublisher,
    ) -> Self {
        Self {
            session: Mutex::new(None),
            store,
            api,
            board,
            channel,
            events,
            permit: Arc::new(tokio::sync::Mutex::new(())),
            traffic: Mutex::new(Traffic::default()),
            subscriptions: Mutex::new(HashMap::new()),
        }
    }

    pub fn session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    pub fn attached_activity(&self) -> Option<ActivityId> {
        self.session
            .lock()
            .as_ref()
            .and_then(|session| session.attached_activity_id.clone())
    }

    pub fn board(&self) -> &Arc<ActivityBoard> {
        &self.board
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Adopt the persisted session, if any, as the current one
    pub fn restore(&self) -> AttendanceResult<Option<Session>> {
        let mut current = self.session.lock();
        let restored = self.store.load()?;
        if let Some(session) = &restored {
            info!(
                identity = %session.identity,
                role = %session.role,
                attached = ?session.attached_activity_id,
                "Session restored"
            );
        }
        *current = restored.clone();
        Ok(restored)
    }

    /// Make `session` current and persist it
    pub fn begin_session(&self, session: Session) -> AttendanceResult<()> {
        let mut current = self.session.lock();
        self.store.save(&session)?;
        info!(identity = %session.identity, role = %session.role, "Session started");
        *current = Some(session);
        Ok(())
    }

    /// Drop the current session and clear the store
    pub fn end_session(&self) -> AttendanceResult<()> {
        let mut current = self.session.lock();
        self.store.clear()?;
        if let Some(session) = current.take() {
            info!(identity = %session.identity, "Session ended");
        }
        Ok(())
    }

    pub fn phase(&self) -> AttachmentPhase {
        match self.traffic.lock().in_flight {
            Some(Transition::Attach) => AttachmentPhase::Attaching,
            Some(Transition::Detach) => AttachmentPhase::Detaching,
            None if self.attached_activity().is_some() => AttachmentPhase::Attached,
            None => AttachmentPhase::Detached,
        }
    }

    fn admit(&self, transition: Transition) -> AttendanceResult<Ticket<'_>> {
        let mut traffic = self.traffic.lock();
        match traffic.in_flight {
            None => traffic.in_flight = Some(transition),
            Some(current) if current != transition && traffic.queued.is_none() => {
                debug!(
                    queued = transition.name(),
                    in_flight = current.name(),
                    "Queued behind in-flight request"
                );
                traffic.queued = Some(transition);
            }
            Some(_) => {
                return Err(AttendanceError::OperationInProgress {
                    transition: transition.name().to_string(),
                })
            }
        }

        Ok(Ticket {
            traffic: &self.traffic,
            transition,
            permit: None,
        })
    }

    /// Join `activity_id`, returning its confirmed attendee count
    pub async fn attach(&self, activity_id: &ActivityId) -> AttendanceResult<u32> {
        let mut ticket = self.admit(Transition::Attach)?;
        ticket.activate(self.permit.clone().lock_owned().await);

        {
            let mut guard = self.session.lock();
            let session = guard.as_mut().ok_or(AttendanceError::NoSession)?;
            match &session.attached_activity_id {
                Some(current) if current == activity_id => {
                    debug!(activity_id = %activity_id, "Already attached, nothing to do");
                    return Ok(self.board.count(activity_id).unwrap_or_default());
                }
                Some(current) => {
                    return Err(AttendanceError::AlreadyAttached {
                        current: current.clone(),
                        requested: activity_id.clone(),
                    })
                }
                None => {}
            }

            session.attached_activity_id = Some(activity_id.clone());
            if let Err(e) = self.store.save(session) {
                session.attached_activity_id = None;
                return Err(e);
            }
        }

        self.board.adjust(activity_id, 1);
        info!(activity_id = %activity_id, "Attaching");

        match self.api.attach(activity_id).await {
            Ok(receipt) => {
                self.board.confirm(activity_id, receipt.attendee_count);
                info!(
                    activity_id = %activity_id,
                    attendee_count = receipt.attendee_count,
                    "Attached"
                );
                self.events.publish(ClientEvent::Attached {
                    activity_id: activity_id.clone(),
                    attendee_count: receipt.attendee_count,
                });
                Ok(receipt.attendee_count)
            }
            Err(e) => {
                let rolled_back = self.restore_attachment(|session| {
                    if session.attached_activity_id.as_ref() == Some(activity_id) {
                        session.attached_activity_id = None;
                        true
                    } else {
                        false
                    }
                });
                if rolled_back {
                    self.board.revert(activity_id, 1);
                }
                Err(self.fail(activity_id, e))
            }
        }
    }

    /// Leave the attached activity. `Ok(None)` when nothing was attached.
    pub async fn detach(&self) -> AttendanceResult<Option<u32>> {
        let mut ticket = self.admit(Transition::Detach)?;
        ticket.activate(self.permit.clone().lock_owned().await);

        let activity_id = {
            let mut guard = self.session.lock();
            let Some(session) = guard.as_mut() else {
                return Ok(None);
            };
            let Some(activity_id) = session.attached_activity_id.take() else {
                debug!("Not attached, detach is a no-op");
                return Ok(None);
            };
            if let Err(e) = self.store.save(session) {
                session.attached_activity_id = Some(activity_id);
                return Err(e);
            }
            activity_id
        };

        self.board.adjust(&activity_id, -1);
        info!(activity_id = %activity_id, "Detaching");

        match self.api.detach(&activity_id).await {
            Ok(receipt) => {
                self.board.confirm(&activity_id, receipt.attendee_count);
                info!(
                    activity_id = %activity_id,
                    attendee_count = receipt.attendee_count,
                    "Detached"
                );
                self.events.publish(ClientEvent::Detached {
                    activity_id: activity_id.clone(),
                    attendee_count: receipt.attendee_count,
                });
                Ok(Some(receipt.attendee_count))
            }
            Err(e) => {
                let rolled_back = self.restore_attachment(|session| {
                    if session.attached_activity_id.is_none() {
                        session.attached_activity_id = Some(activity_id.clone());
                        true
                    } else {
                        false
                    }
                });
                if rolled_back {
                    self.board.revert(&activity_id, -1);
                }
                Err(self.fail(&activity_id, e))
            }
        }
    }

    /// Apply a rollback to the session if it still applies, then persist it
    fn restore_attachment(&self, rollback: impl FnOnce(&mut Session) -> bool) -> bool {
        let mut guard = self.session.lock();
        let Some(session) = guard.as_mut() else {
            return false;
        };
        if !rollback(session) {
            return false;
        }
        if let Err(e) = self.store.save(session) {
            warn!(error = %e, "Failed to persist rolled back session");
        }
        true
    }

    fn fail(&self, activity_id: &ActivityId, error: AttendanceError) -> AttendanceError {
        let error = match error {
            AttendanceError::RequestFailed { .. } => error,
            other => AttendanceError::request_failed(activity_id, other.to_string()),
        };
        warn!(activity_id = %activity_id, error = %error, "Rolled back attachment change");
        self.events.publish(ClientEvent::AttachmentFailed {
            activity_id: activity_id.clone(),
            reason: error.to_string(),
        });
        error
    }

    /// Guest termination cleanup.
    ///
    /// Clears and persists the attachment before anything goes out, then
    /// sends a best-effort detach behind any in-flight request. Returns the
    /// handle of that detach, or `None` when there was nothing to release.
    pub fn release_on_termination(&self) -> Option<JoinHandle<()>> {
        let activity_id = {
            let mut guard = self.session.lock();
            let session = guard.as_mut()?;
            if !session.is_guest() {
                return None;
            }
            let activity_id = session.attached_activity_id.take()?;
            if let Err(e) = self.store.save(session) {
                warn!(error = %e, "Failed to persist released attachment");
            }
            activity_id
        };

        self.board.adjust(&activity_id, -1);
        self.events.publish(ClientEvent::SessionReleased {
            activity_id: activity_id.clone(),
        });
        info!(activity_id = %activity_id, "Released attachment on termination");

        let api = self.api.clone();
        let board = self.board.clone();
        let permit = self.permit.clone();
        Some(tokio::spawn(async move {
            let _permit = permit.lock_owned().await;
            match api.detach(&activity_id).await {
                Ok(receipt) => {
                    board.confirm(&activity_id, receipt.attendee_count);
                    debug!(activity_id = %activity_id, "Termination detach confirmed");
                }
                Err(e) => warn!(activity_id = %activity_id, error = %e, "Termination detach failed"),
            }
        }))
    }

    /// Show `activities`, keeping channel subscriptions and delivery scope
    /// in step with what is displayed
    pub fn display(&self, activities: Vec<Activity>) -> BoardDiff {
        let diff = self.board.replace(activities);
        let mut subscriptions = self.subscriptions.lock();

        for activity_id in &diff.removed {
            if let Some(subscription) = subscriptions.remove(activity_id) {
                subscription.unsubscribe();
            }
        }

        for activity_id in &diff.added {
            let board = self.board.clone();
            let subscription = self.channel.subscribe(activity_id, move |update: AttendanceUpdate| {
                board.apply_update(&update);
            });
            subscriptions.insert(activity_id.clone(), subscription);
            self.channel.notify_attach(activity_id);
        }

        diff
    }
}

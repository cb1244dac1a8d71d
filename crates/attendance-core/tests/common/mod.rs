//! Shared fixtures for the integration tests
#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rollcall_attendance_core::{
    Activity, ActivityId, AttendanceApi, AttendanceError, AttendanceReceipt, AttendanceResult,
    AttendanceUpdate, MemoryHub, MemorySessionStore, Session, SessionStore,
};
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Ordered record of store writes and outbound requests
pub type Journal = Arc<Mutex<Vec<String>>>;

/// Session store that journals every write
#[derive(Debug)]
pub struct JournalingStore {
    inner: MemorySessionStore,
    journal: Journal,
}

impl JournalingStore {
    pub fn new(journal: Journal) -> Self {
        Self {
            inner: MemorySessionStore::new(),
            journal,
        }
    }

    pub fn seeded(session: &Session, journal: Journal) -> Self {
        Self {
            inner: MemorySessionStore::with_session(session),
            journal,
        }
    }
}

impl SessionStore for JournalingStore {
    fn load(&self) -> AttendanceResult<Option<Session>> {
        self.inner.load()
    }

    fn save(&self, session: &Session) -> AttendanceResult<()> {
        let attached = session
            .attached_activity_id
            .as_ref()
            .map_or("none".to_string(), |id| id.to_string());
        self.journal.lock().push(format!("save:{}", attached));
        self.inner.save(session)
    }

    fn clear(&self) -> AttendanceResult<()> {
        self.journal.lock().push("clear".to_string());
        self.inner.clear()
    }
}

/// Attendance endpoints backed by in-memory counts. Every accepted change is
/// broadcast through the hub, like the real server does.
#[derive(Debug)]
pub struct FakeServer {
    hub: MemoryHub,
    activities: Vec<Activity>,
    counts: Mutex<HashMap<ActivityId, u32>>,
    failing: AtomicBool,
    journal: Journal,
}

impl FakeServer {
    pub fn new(hub: MemoryHub, activities: Vec<Activity>, journal: Journal) -> Self {
        let counts = activities
            .iter()
            .map(|activity| (activity.id.clone(), activity.attendee_count))
            .collect();
        Self {
            hub,
            activities,
            counts: Mutex::new(counts),
            failing: AtomicBool::new(false),
            journal,
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn count(&self, activity_id: &ActivityId) -> u32 {
        self.counts.lock().get(activity_id).copied().unwrap_or_default()
    }

    /// Requests received, as `attach:<id>` / `detach:<id>`
    pub fn requests(&self) -> Vec<String> {
        self.journal
            .lock()
            .iter()
            .filter(|entry| entry.starts_with("attach:") || entry.starts_with("detach:"))
            .cloned()
            .collect()
    }

    fn apply(&self, action: &str, activity_id: &ActivityId, delta: i64) -> AttendanceResult<AttendanceReceipt> {
        self.journal.lock().push(format!("{}:{}", action, activity_id));
        if self.failing.load(Ordering::SeqCst) {
            return Err(AttendanceError::request_failed(activity_id, "503 Service Unavailable"));
        }

        let attendee_count = {
            let mut counts = self.counts.lock();
            let count = counts.entry(activity_id.clone()).or_default();
            *count = (i64::from(*count) + delta).max(0) as u32;
            *count
        };
        self.hub.broadcast(AttendanceUpdate::new(activity_id.clone(), attendee_count));
        Ok(AttendanceReceipt { attendee_count })
    }
}

#[async_trait]
impl AttendanceApi for FakeServer {
    async fn attach(&self, activity_id: &ActivityId) -> AttendanceResult<AttendanceReceipt> {
        self.apply("attach", activity_id, 1)
    }

    async fn detach(&self, activity_id: &ActivityId) -> AttendanceResult<AttendanceReceipt> {
        self.apply("detach", activity_id, -1)
    }

    async fn list_activities(&self) -> AttendanceResult<Vec<Activity>> {
        let counts = self.counts.lock();
        Ok(self
            .activities
            .iter()
            .cloned()
            .map(|mut activity| {
                activity.attendee_count = counts.get(&activity.id).copied().unwrap_or_default();
                activity
            })
            .collect())
    }
}

/// Poll `condition` until it holds, failing the test after two seconds
pub async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

/// Await `future`, failing the test after two seconds
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}

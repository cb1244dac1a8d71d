//! Durable session storage
//!
//! The persisted layout is a flat key/value record with the keys
//! `sessionIdentity`, `sessionRole` and `attachedActivityId`. Stores save and
//! clear the whole record at once so a logout never leaves a partial session
//! behind.

use std::fmt::Debug;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{Session, SessionRole};
use crate::activity::ActivityId;
use crate::error::{AttendanceError, AttendanceResult};

/// Typed load/save/clear over the persisted session record.
///
/// Calls are synchronous: callers rely on a completed `save` before they issue
/// any outbound request that depends on it.
pub trait SessionStore: Send + Sync + Debug {
    fn load(&self) -> AttendanceResult<Option<Session>>;
    fn save(&self, session: &Session) -> AttendanceResult<()>;
    fn clear(&self) -> AttendanceResult<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SessionRecord {
    #[serde(rename = "sessionIdentity")]
    identity: String,
    #[serde(rename = "sessionRole")]
    role: SessionRole,
    #[serde(rename = "attachedActivityId", default)]
    attached_activity_id: Option<ActivityId>,
}

impl From<&Session> for SessionRecord {
    fn from(session: &Session) -> Self {
        Self {
            identity: session.identity.clone(),
            role: session.role,
            attached_activity_id: session.attached_activity_id.clone(),
        }
    }
}

impl From<SessionRecord> for Session {
    fn from(record: SessionRecord) -> Self {
        Self {
            identity: record.identity,
            role: record.role,
            attached_activity_id: record.attached_activity_id,
        }
    }
}

/// In-process store; the default when no session path is configured
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    record: Mutex<Option<SessionRecord>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a session, as if persisted by an earlier run
    pub fn with_session(session: &Session) -> Self {
        Self {
            record: Mutex::new(Some(SessionRecord::from(session))),
        }
    }
}

impl SessionStore for MemorySessionStore {
    fn load(&self) -> AttendanceResult<Option<Session>> {
        Ok(self.record.lock().clone().map(Session::from))
    }

    fn save(&self, session: &Session) -> AttendanceResult<()> {
        *self.record.lock() = Some(SessionRecord::from(session));
        Ok(())
    }

    fn clear(&self) -> AttendanceResult<()> {
        *self.record.lock() = None;
        Ok(())
    }
}

/// JSON file store. Writes go through a temp file and a rename.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStore for FileSessionStore {
    fn load(&self) -> AttendanceResult<Option<Session>> {
        let data = match fs::read(&self.path) {
            Ok(data) => data,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(AttendanceError::store_failed(format!(
                    "Failed to read session record: {}",
                    err
                )))
            }
        };

        let record: SessionRecord = serde_json::from_slice(&data).map_err(|err| {
            AttendanceError::store_failed(format!("Failed to parse session record: {}", err))
        })?;
        Ok(Some(record.into()))
    }

    fn save(&self, session: &Session) -> AttendanceResult<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|err| {
            AttendanceError::store_failed(format!("Failed to create session dir: {}", err))
        })?;

        let payload = serde_json::to_vec_pretty(&SessionRecord::from(session)).map_err(|err| {
            AttendanceError::store_failed(format!("Failed to serialize session record: {}", err))
        })?;

        // same directory as the target so persist is a rename
        let mut tmp = NamedTempFile::new_in(dir).map_err(|err| {
            AttendanceError::store_failed(format!("Failed to create temp session file: {}", err))
        })?;
        tmp.write_all(&payload).map_err(|err| {
            AttendanceError::store_failed(format!("Failed to write session record: {}", err))
        })?;
        tmp.flush().map_err(|err| {
            AttendanceError::store_failed(format!("Failed to flush session record: {}", err))
        })?;
        tmp.persist(&self.path).map_err(|err| {
            AttendanceError::store_failed(format!("Failed to commit session record: {}", err.error))
        })?;

        debug!(
            path = %self.path.display(),
            attached = ?session.attached_activity_id,
            "Session record saved"
        );
        Ok(())
    }

    fn clear(&self) -> AttendanceResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AttendanceError::store_failed(format!(
                "Failed to clear session record: {}",
                err
            ))),
        }
    }
}

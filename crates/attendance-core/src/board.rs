//! The displayed activity set and its live attendee counters
//!
//! Each counter is an authoritative base plus a pending optimistic delta.
//! Broadcast updates and server receipts replace the base and drop the delta,
//! so an authoritative count always supersedes earlier local optimism.
//! Rollback only reverts optimism that has not been superseded yet.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::activity::{Activity, ActivityId, AttendanceUpdate};
use crate::events::{ClientEvent, EventPublisher};

#[derive(Debug, Clone)]
struct Entry {
    activity: Activity,
    base: u32,
    pending: i64,
}

impl Entry {
    fn displayed(&self) -> u32 {
        (i64::from(self.base) + self.pending).clamp(0, i64::from(u32::MAX)) as u32
    }
}

#[derive(Debug, Default)]
struct BoardState {
    order: Vec<ActivityId>,
    entries: HashMap<ActivityId, Entry>,
}

/// Changes produced by replacing the displayed collection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BoardDiff {
    pub added: Vec<ActivityId>,
    pub removed: Vec<ActivityId>,
}

#[derive(Debug)]
pub struct ActivityBoard {
    state: RwLock<BoardState>,
    events: EventPublisher,
}

impl ActivityBoard {
    pub fn new(events: EventPublisher) -> Self {
        Self {
            state: RwLock::new(BoardState::default()),
            events,
        }
    }

    /// Replace the displayed collection, keeping input order
    pub fn replace(&self, activities: Vec<Activity>) -> BoardDiff {
        let mut state = self.state.write();
        let mut next = BoardState::default();

        for activity in activities {
            if next.entries.contains_key(&activity.id) {
                continue;
            }
            next.order.push(activity.id.clone());
            next.entries.insert(
                activity.id.clone(),
                Entry {
                    base: activity.attendee_count,
                    pending: 0,
                    activity,
                },
            );
        }

        let diff = BoardDiff {
            added: next
                .order
                .iter()
                .filter(|id| !state.entries.contains_key(*id))
                .cloned()
                .collect(),
            removed: state
                .order
                .iter()
                .filter(|id| !next.entries.contains_key(*id))
                .cloned()
                .collect(),
        };

        debug!(
            total = next.order.len(),
            added = diff.added.len(),
            removed = diff.removed.len(),
            "Activity board replaced"
        );
        *state = next;
        diff
    }

    pub fn contains(&self, id: &ActivityId) -> bool {
        self.state.read().entries.contains_key(id)
    }

    pub fn ids(&self) -> Vec<ActivityId> {
        self.state.read().order.clone()
    }

    pub fn count(&self, id: &ActivityId) -> Option<u32> {
        self.state.read().entries.get(id).map(Entry::displayed)
    }

    /// Activities in display order, carrying their live counts
    pub fn snapshot(&self) -> Vec<Activity> {
        let state = self.state.read();
        state
            .order
            .iter()
            .filter_map(|id| state.entries.get(id))
            .map(|entry| {
                let mut activity = entry.activity.clone();
                activity.attendee_count = entry.displayed();
                activity
            })
            .collect()
    }

    /// Local optimistic adjustment, pending the next authoritative count
    pub fn adjust(&self, id: &ActivityId, delta: i64) -> Option<u32> {
        let count = {
            let mut state = self.state.write();
            let entry = state.entries.get_mut(id)?;
            entry.pending += delta;
            entry.displayed()
        };
        trace!(activity_id = %id, delta, count, "Optimistic count adjustment");
        self.publish_count(id, count);
        Some(count)
    }

    /// Undo an optimistic adjustment unless an authoritative count already replaced it
    pub fn revert(&self, id: &ActivityId, delta: i64) -> Option<u32> {
        let count = {
            let mut state = self.state.write();
            let entry = state.entries.get_mut(id)?;
            if entry.pending == 0 {
                return Some(entry.displayed());
            }
            entry.pending -= delta;
            entry.displayed()
        };
        debug!(activity_id = %id, delta, count, "Reverted optimistic count");
        self.publish_count(id, count);
        Some(count)
    }

    /// Replace the count with an authoritative value. Returns `false` for
    /// activities that are not displayed.
    pub fn apply_update(&self, update: &AttendanceUpdate) -> bool {
        self.set_authoritative(&update.activity_id, update.attendee_count)
            .is_some()
    }

    /// Record the count returned by the attach/detach endpoint
    pub fn confirm(&self, id: &ActivityId, attendee_count: u32) -> Option<u32> {
        self.set_authoritative(id, attendee_count)
    }

    fn set_authoritative(&self, id: &ActivityId, attendee_count: u32) -> Option<u32> {
        let count = {
            let mut state = self.state.write();
            let entry = state.entries.get_mut(id)?;
            entry.base = attendee_count;
            entry.pending = 0;
            entry.displayed()
        };
        trace!(activity_id = %id, count, "Authoritative count applied");
        self.publish_count(id, count);
        Some(count)
    }

    fn publish_count(&self, id: &ActivityId, attendee_count: u32) {
        self.events.publish(ClientEvent::CountChanged {
            activity_id: id.clone(),
            attendee_count,
        });
    }
}

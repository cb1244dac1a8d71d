//! Category and day predicates over classified buckets
//!
//! [`apply`] is the pure narrowing step. [`FilterEngine`] keeps the latest
//! source buckets and selection together and recomputes its view whenever
//! either changes, so a caller can never read output built from a stale
//! combination of inputs.

use std::collections::HashSet;

use chrono::NaiveDate;
use tracing::debug;

use crate::activity::Activity;
use crate::classifier::{ActivityBuckets, DatedActivity};
use crate::session::{Session, SessionRole};

/// User-selected predicates. `None` means no narrowing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterSelection {
    pub category: Option<String>,
    pub day: Option<NaiveDate>,
}

impl FilterSelection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = normalize_category(Some(category.into()));
        self
    }

    pub fn with_day(mut self, day: NaiveDate) -> Self {
        self.day = Some(day);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.day.is_none()
    }

    /// Category is an exact match; day compares the normalized calendar day
    pub fn matches(&self, dated: &DatedActivity) -> bool {
        let category_ok = self
            .category
            .as_deref()
            .map_or(true, |category| dated.activity.category() == category);
        let day_ok = self.day.map_or(true, |day| dated.day == day);
        category_ok && day_ok
    }
}

fn normalize_category(category: Option<String>) -> Option<String> {
    category.filter(|value| !value.is_empty())
}

/// Narrow each bucket by `selection`. Invalid entries pass through untouched.
pub fn apply(buckets: &ActivityBuckets, selection: &FilterSelection) -> ActivityBuckets {
    if selection.is_empty() {
        return buckets.clone();
    }

    let narrow = |bucket: &[DatedActivity]| -> Vec<DatedActivity> {
        bucket
            .iter()
            .filter(|dated| selection.matches(dated))
            .cloned()
            .collect()
    };

    ActivityBuckets {
        active: narrow(&buckets.active),
        future: narrow(&buckets.future),
        past: narrow(&buckets.past),
        invalid: buckets.invalid.clone(),
    }
}

/// Distinct categories in order of first appearance
pub fn categories(activities: &[Activity]) -> Vec<String> {
    let mut seen = HashSet::new();
    activities
        .iter()
        .map(Activity::category)
        .filter(|category| seen.insert(*category))
        .map(str::to_string)
        .collect()
}

/// Members only see activities they own; guests see everything
pub fn scope_to_session(activities: Vec<Activity>, session: &Session) -> Vec<Activity> {
    match session.role {
        SessionRole::Guest => activities,
        SessionRole::Member => activities
            .into_iter()
            .filter(|activity| activity.owner_id() == Some(session.identity.as_str()))
            .collect(),
    }
}

/// Memoized filter view over the latest classified source
#[derive(Debug, Default)]
pub struct FilterEngine {
    source: ActivityBuckets,
    selection: FilterSelection,
    view: Option<ActivityBuckets>,
}

impl FilterEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn selection(&self) -> &FilterSelection {
        &self.selection
    }

    pub fn set_source(&mut self, source: ActivityBuckets) {
        self.source = source;
        self.view = None;
    }

    pub fn set_category(&mut self, category: Option<String>) {
        let category = normalize_category(category);
        if self.selection.category != category {
            self.selection.category = category;
            self.view = None;
        }
    }

    pub fn set_day(&mut self, day: Option<NaiveDate>) {
        if self.selection.day != day {
            self.selection.day = day;
            self.view = None;
        }
    }

    pub fn clear(&mut self) {
        self.set_category(None);
        self.set_day(None);
    }

    /// Filtered buckets for the current source and selection
    pub fn view(&mut self) -> &ActivityBuckets {
        if self.view.is_none() {
            let view = apply(&self.source, &self.selection);
            debug!(
                category = ?self.selection.category,
                day = ?self.selection.day,
                active = view.active.len(),
                future = view.future.len(),
                past = view.past.len(),
                "Recomputed filtered activity view"
            );
            self.view = Some(view);
        }
        self.view.get_or_insert_with(ActivityBuckets::default)
    }
}

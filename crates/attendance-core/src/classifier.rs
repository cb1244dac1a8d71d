//! Temporal classification of activities
//!
//! Buckets a collection into active-today, future and past by comparing
//! calendar days, not timestamps. Both the scheduled instant and `now` are
//! normalized to a day in the same time zone (the zone `now` carries; the
//! process-local zone for [`classify`]). An activity at 23:59 yesterday is
//! past at 00:01 today, however close the two instants are.
//!
//! Classification is pure and stateless. Input order is preserved within each
//! bucket. An activity whose timestamp cannot be parsed lands in
//! [`ActivityBuckets::invalid`] and in none of the three buckets.

use std::cmp::Ordering;

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use tracing::warn;

use crate::activity::{Activity, ActivityId};
use crate::error::AttendanceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemporalBucket {
    Active,
    Future,
    Past,
}

impl TemporalBucket {
    /// Bucket for `day` relative to `today`
    pub fn for_day(day: NaiveDate, today: NaiveDate) -> Self {
        match day.cmp(&today) {
            Ordering::Equal => TemporalBucket::Active,
            Ordering::Greater => TemporalBucket::Future,
            Ordering::Less => TemporalBucket::Past,
        }
    }
}

/// An activity paired with its normalized calendar day
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatedActivity {
    pub activity: Activity,
    pub day: NaiveDate,
}

/// An activity excluded from classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidActivity {
    pub activity_id: ActivityId,
    pub error: AttendanceError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivityBuckets {
    pub active: Vec<DatedActivity>,
    pub future: Vec<DatedActivity>,
    pub past: Vec<DatedActivity>,
    pub invalid: Vec<InvalidActivity>,
}

impl ActivityBuckets {
    pub fn bucket(&self, bucket: TemporalBucket) -> &[DatedActivity] {
        match bucket {
            TemporalBucket::Active => &self.active,
            TemporalBucket::Future => &self.future,
            TemporalBucket::Past => &self.past,
        }
    }

    /// Number of classified activities (excluding invalid ones)
    pub fn len(&self) -> usize {
        self.active.len() + self.future.len() + self.past.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self, bucket: TemporalBucket) -> Vec<&ActivityId> {
        self.bucket(bucket).iter().map(|dated| &dated.activity.id).collect()
    }

    fn push(&mut self, bucket: TemporalBucket, dated: DatedActivity) {
        match bucket {
            TemporalBucket::Active => self.active.push(dated),
            TemporalBucket::Future => self.future.push(dated),
            TemporalBucket::Past => self.past.push(dated),
        }
    }
}

/// Strip time-of-day, keeping the day in the instant's own zone
pub fn calendar_day<Tz: TimeZone>(instant: &DateTime<Tz>) -> NaiveDate {
    instant.date_naive()
}

/// Classify against `now` in the process-local time zone
pub fn classify(activities: &[Activity], now: DateTime<Local>) -> ActivityBuckets {
    classify_in(activities, &now)
}

/// Classify against `now`, normalizing every activity into `now`'s zone
pub fn classify_in<Tz: TimeZone>(activities: &[Activity], now: &DateTime<Tz>) -> ActivityBuckets {
    let tz = now.timezone();
    let today = calendar_day(now);
    let mut buckets = ActivityBuckets::default();

    for activity in activities {
        match activity.scheduled_in(&tz) {
            Ok(scheduled) => {
                let day = calendar_day(&scheduled);
                buckets.push(
                    TemporalBucket::for_day(day, today),
                    DatedActivity {
                        activity: activity.clone(),
                        day,
                    },
                );
            }
            Err(error) => {
                warn!(
                    activity_id = %activity.id,
                    scheduled_at = %activity.scheduled_at,
                    "Excluding activity with malformed schedule"
                );
                buckets.invalid.push(InvalidActivity {
                    activity_id: activity.id.clone(),
                    error,
                });
            }
        }
    }

    buckets
}

//! Reconnect backoff for the realtime channel
//!
//! Delays grow exponentially from `initial_delay`, are capped at `max_delay`,
//! optionally carry ±10% jitter, and are never shorter than `min_interval` so
//! a flapping transport cannot storm the server.
//!
//! # Examples
//!
//! ```rust
//! # use rollcall_attendance_core::channel::ReconnectPolicy;
//! # use std::time::Duration;
//! let policy = ReconnectPolicy {
//!     max_attempts: 4,
//!     initial_delay: Duration::from_millis(100),
//!     max_delay: Duration::from_secs(1),
//!     min_interval: Duration::from_millis(50),
//!     backoff_multiplier: 2.0,
//!     use_jitter: false,
//! };
//!
//! assert_eq!(policy.delay_for(1), Duration::from_millis(100));
//! assert_eq!(policy.delay_for(3), Duration::from_millis(400));
//! assert_eq!(policy.delay_for(10), Duration::from_secs(1));
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AttendanceError, AttendanceResult};

/// Configuration for reconnect behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before the channel degrades
    pub max_attempts: u32,
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,
    /// Upper bound for any single delay
    pub max_delay: Duration,
    /// Floor for any single delay, jitter included
    pub min_interval: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays
    pub use_jitter: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 8,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            min_interval: Duration::from_millis(250),
            backoff_multiplier: 2.0,
            use_jitter: true,
        }
    }
}

impl ReconnectPolicy {
    /// Short delays for local or LAN servers
    pub fn quick() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
            min_interval: Duration::from_millis(20),
            backoff_multiplier: 1.5,
            use_jitter: true,
        }
    }

    /// Conservative delays for shared or rate-limited servers
    pub fn slow() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            min_interval: Duration::from_secs(1),
            backoff_multiplier: 3.0,
            use_jitter: false,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let base_ms = self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped_ms = base_ms.min(self.max_delay.as_millis() as f64);

        let jittered_ms = if self.use_jitter {
            let jitter = (rand::random::<f64>() - 0.5) * 0.2; // ±10% jitter
            capped_ms * (1.0 + jitter)
        } else {
            capped_ms
        };

        Duration::from_millis(jittered_ms.max(0.0) as u64).max(self.min_interval)
    }

    pub fn validate(&self) -> AttendanceResult<()> {
        if self.max_attempts == 0 {
            return Err(AttendanceError::invalid_configuration(
                "reconnect.max_attempts",
                "must allow at least one attempt",
            ));
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(AttendanceError::invalid_configuration(
                "reconnect.backoff_multiplier",
                "must be at least 1.0",
            ));
        }
        if self.min_interval.is_zero() {
            return Err(AttendanceError::invalid_configuration(
                "reconnect.min_interval",
                "must be greater than zero",
            ));
        }
        if self.min_interval > self.max_delay || self.initial_delay > self.max_delay {
            return Err(AttendanceError::invalid_configuration(
                "reconnect.max_delay",
                "must not be shorter than min_interval or initial_delay",
            ));
        }
        Ok(())
    }
}

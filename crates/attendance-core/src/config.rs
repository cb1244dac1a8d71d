//! Client configuration
//!
//! ```rust
//! # use rollcall_attendance_core::AttendanceConfig;
//! # use std::time::Duration;
//! let config = AttendanceConfig::new()
//!     .with_api_base_url("https://rollcall.example.org/api")
//!     .with_realtime_url("wss://rollcall.example.org/realtime")
//!     .with_request_timeout(Duration::from_secs(5));
//! assert!(config.validate().is_ok());
//! ```
//!
//! Hosts that configure through the environment use
//! [`AttendanceConfig::from_env`], which starts from the defaults and
//! overrides whatever `ROLLCALL_*` variables are set.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::channel::ReconnectPolicy;
use crate::error::{AttendanceError, AttendanceResult};

pub const ENV_API_URL: &str = "ROLLCALL_API_URL";
pub const ENV_REALTIME_URL: &str = "ROLLCALL_REALTIME_URL";
pub const ENV_TOKEN: &str = "ROLLCALL_TOKEN";
pub const ENV_SESSION_PATH: &str = "ROLLCALL_SESSION_PATH";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "ROLLCALL_REQUEST_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceConfig {
    /// Base URL of the attendance endpoints
    pub api_base_url: String,
    /// WebSocket URL of the broadcast hub
    pub realtime_url: String,
    /// Bearer token sent with every endpoint request
    pub auth_token: Option<String>,
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    /// File-backed session store when set, in-memory otherwise
    pub session_path: Option<PathBuf>,
    /// Buffered client events per subscriber before old ones are dropped
    pub event_channel_capacity: usize,
}

impl Default for AttendanceConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:5000/api".to_string(),
            realtime_url: "ws://localhost:5000/realtime".to_string(),
            auth_token: None,
            request_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            session_path: None,
            event_channel_capacity: 256,
        }
    }
}

impl AttendanceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by any `ROLLCALL_*` variables present
    pub fn from_env() -> AttendanceResult<Self> {
        let mut config = Self::default();

        if let Ok(url) = env::var(ENV_API_URL) {
            config.api_base_url = url;
        }
        if let Ok(url) = env::var(ENV_REALTIME_URL) {
            config.realtime_url = url;
        }
        if let Ok(token) = env::var(ENV_TOKEN) {
            config.auth_token = Some(token).filter(|token| !token.is_empty());
        }
        if let Ok(path) = env::var(ENV_SESSION_PATH) {
            config.session_path = Some(PathBuf::from(path));
        }
        if let Ok(raw) = env::var(ENV_REQUEST_TIMEOUT_MS) {
            let millis: u64 = raw.trim().parse().map_err(|_| {
                AttendanceError::invalid_configuration(
                    ENV_REQUEST_TIMEOUT_MS,
                    format!("not a number of milliseconds: {}", raw),
                )
            })?;
            config.request_timeout = Duration::from_millis(millis);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    pub fn with_realtime_url(mut self, url: impl Into<String>) -> Self {
        self.realtime_url = url.into();
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    pub fn with_session_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_path = Some(path.into());
        self
    }

    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    pub fn validate(&self) -> AttendanceResult<()> {
        check_url("api_base_url", &self.api_base_url, &["http", "https"])?;
        check_url("realtime_url", &self.realtime_url, &["ws", "wss"])?;

        if self.request_timeout.is_zero() {
            return Err(AttendanceError::invalid_configuration(
                "request_timeout",
                "must be greater than zero",
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(AttendanceError::invalid_configuration(
                "event_channel_capacity",
                "must be greater than zero",
            ));
        }
        self.reconnect.validate()
    }
}

fn check_url(field: &str, raw: &str, schemes: &[&str]) -> AttendanceResult<()> {
    let url = Url::parse(raw).map_err(|e| AttendanceError::invalid_configuration(field, e.to_string()))?;
    if !schemes.contains(&url.scheme()) {
        return Err(AttendanceError::invalid_configuration(
            field,
            format!("scheme must be one of {:?}, got {}", schemes, url.scheme()),
        ));
    }
    Ok(())
}

//! Subscriber installation for hosts embedding the attendance client
//!
//! The crate only emits `tracing` events. Hosts that have no subscriber of
//! their own can call [`setup_logging`], usually with
//! [`LoggingConfig::from_env`]:
//!
//! - `ROLLCALL_LOG` sets the level for this crate (`info` by default)
//! - `ROLLCALL_LOG_FORMAT` picks `pretty` or `json`
//! - `RUST_LOG` directives are applied on top

use std::env;
use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{fmt, EnvFilter};

use crate::error::{AttendanceError, AttendanceResult};

pub const ENV_LOG_LEVEL: &str = "ROLLCALL_LOG";
pub const ENV_LOG_FORMAT: &str = "ROLLCALL_LOG_FORMAT";

const CRATE_TARGET: &str = "rollcall_attendance_core";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    /// One JSON object per line on stdout
    Json,
}

impl FromStr for LogFormat {
    type Err = AttendanceError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(AttendanceError::invalid_configuration(
                ENV_LOG_FORMAT,
                format!("unknown log format: {}", other),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Level for events from this crate
    pub level: Level,
    pub format: LogFormat,
    /// Include source file and line in every event
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: LogFormat::Pretty,
            source_location: false,
        }
    }
}

impl LoggingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Self::default()
        }
    }

    /// Defaults overridden by `ROLLCALL_LOG` and `ROLLCALL_LOG_FORMAT`
    pub fn from_env() -> AttendanceResult<Self> {
        let mut config = Self::default();
        if let Ok(raw) = env::var(ENV_LOG_LEVEL) {
            config.level = parse_log_level(&raw)?;
        }
        if let Ok(raw) = env::var(ENV_LOG_FORMAT) {
            config.format = raw.parse()?;
        }
        Ok(config)
    }

    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_source_location(mut self) -> Self {
        self.source_location = true;
        self
    }

    /// Directive scoping the configured level to this crate
    pub fn directive(&self) -> AttendanceResult<Directive> {
        let level = self.level.as_str().to_ascii_lowercase();
        format!("{}={}", CRATE_TARGET, level)
            .parse()
            .map_err(|e| AttendanceError::internal_error(format!("Bad log directive: {}", e)))
    }
}

/// Install the global subscriber. Fails with `InternalError` if one is
/// already installed.
pub fn setup_logging(config: &LoggingConfig) -> AttendanceResult<()> {
    let filter = EnvFilter::from_default_env().add_directive(config.directive()?);
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_file(config.source_location)
        .with_line_number(config.source_location);

    let installed = match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.with_writer(std::io::stdout).json().try_init(),
    };
    installed.map_err(|e| AttendanceError::internal_error(format!("Logger already installed: {}", e)))?;

    tracing::info!(version = crate::VERSION, format = ?config.format, "Attendance logging ready");
    Ok(())
}

pub fn parse_log_level(level: &str) -> AttendanceResult<Level> {
    Level::from_str(level.trim()).map_err(|_| {
        AttendanceError::invalid_configuration(ENV_LOG_LEVEL, format!("Invalid log level: {}", level))
    })
}

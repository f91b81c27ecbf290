//! Structured logging with a runtime-adjustable level.
//!
//! [`init_logging`] installs a global `tracing-subscriber` stack:
//!
//! ```text
//! registry ─ reload(EnvFilter) ─ fmt (logfmt | json)
//! ```
//!
//! The filter sits behind a reload layer, so the minimum severity can be
//! changed while the process runs through the returned [`LogLevelHandle`]
//! (for example from the `PUT /log/level` ops endpoint).

use crate::error::TelemetryError;
use crate::TelemetryResult;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{reload, EnvFilter, Registry};

/// Minimum severity of emitted log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Debug and above.
    Debug,
    /// Info and above.
    #[default]
    Info,
    /// Warnings and errors.
    Warn,
    /// Errors only.
    Error,
}

impl LogLevel {
    /// Returns the lowercase level name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    fn filter(self) -> EnvFilter {
        EnvFilter::new(self.as_str())
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warn" | "warning" => Ok(Self::Warn),
            "error" => Ok(Self::Error),
            other => Err(TelemetryError::InvalidLevel(other.to_string())),
        }
    }
}

/// Output format of log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Single-line `key=value` output.
    #[default]
    Logfmt,
    /// One JSON object per event.
    Json,
}

impl FromStr for LogFormat {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "logfmt" => Ok(Self::Logfmt),
            "json" => Ok(Self::Json),
            other => Err(TelemetryError::InvalidFormat(other.to_string())),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum severity.
    pub level: LogLevel,

    /// Output format.
    pub format: LogFormat,

    /// Include the source file and line of each event.
    pub with_caller: bool,

    /// Include the event target (module path).
    pub include_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Logfmt,
            with_caller: true,
            include_target: true,
        }
    }
}

impl LogConfig {
    /// Debug level logfmt output, for local development.
    #[must_use]
    pub fn development() -> Self {
        Self {
            level: LogLevel::Debug,
            ..Self::default()
        }
    }

    /// Info level JSON output.
    #[must_use]
    pub fn production() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Json,
            with_caller: false,
            include_target: true,
        }
    }
}

/// Reads and changes the active minimum log level.
#[derive(Clone)]
pub struct LogLevelHandle {
    current: Arc<RwLock<LogLevel>>,
    reload: Option<reload::Handle<EnvFilter, Registry>>,
}

impl LogLevelHandle {
    /// A handle that only tracks the level, for processes that install their
    /// own subscriber.
    #[must_use]
    pub fn detached(level: LogLevel) -> Self {
        Self {
            current: Arc::new(RwLock::new(level)),
            reload: None,
        }
    }

    /// Returns the active level.
    #[must_use]
    pub fn level(&self) -> LogLevel {
        *self.current.read()
    }

    /// Swaps the active filter for `level`.
    pub fn set_level(&self, level: LogLevel) -> TelemetryResult<()> {
        let mut current = self.current.write();
        if let Some(reload) = &self.reload {
            reload
                .reload(level.filter())
                .map_err(|e| TelemetryError::Reload(e.to_string()))?;
        }
        let previous = std::mem::replace(&mut *current, level);
        drop(current);

        tracing::info!(from = %previous, to = %level, "log level changed");
        Ok(())
    }
}

impl fmt::Debug for LogLevelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogLevelHandle")
            .field("level", &self.level())
            .field("reloadable", &self.reload.is_some())
            .finish()
    }
}

/// Creates a reloadable level filter layer and the handle controlling it.
///
/// The layer must sit directly on a [`Registry`].
#[must_use]
pub fn reloadable_filter(level: LogLevel) -> (reload::Layer<EnvFilter, Registry>, LogLevelHandle) {
    let (layer, reload) = reload::Layer::new(level.filter());
    let handle = LogLevelHandle {
        current: Arc::new(RwLock::new(level)),
        reload: Some(reload),
    };
    (layer, handle)
}

/// Installs the global subscriber and returns the level handle.
///
/// Fails if a global subscriber is already set.
pub fn init_logging(config: &LogConfig) -> TelemetryResult<LogLevelHandle> {
    let (filter, handle) = reloadable_filter(config.level);
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_file(config.with_caller)
                    .with_line_number(config.with_caller)
                    .with_target(config.include_target),
            )
            .try_init(),
        LogFormat::Logfmt => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .compact()
                    .with_ansi(false)
                    .with_file(config.with_caller)
                    .with_line_number(config.with_caller)
                    .with_target(config.include_target),
            )
            .try_init(),
    };
    installed.map_err(|e| TelemetryError::LoggingInit(e.to_string()))?;

    Ok(handle)
}

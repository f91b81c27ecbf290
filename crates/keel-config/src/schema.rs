//! Configuration sections.

use keel_telemetry::{LogConfig, LogFormat, LogLevel};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The operational HTTP server: health, metrics, diagnostics and log control.
///
/// ```
/// use keel_config::OpsConfig;
///
/// let ops = OpsConfig::default();
/// assert_eq!(ops.addr, ":6060");
/// assert!(ops.with_metrics);
/// assert!(!ops.with_pprof);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct OpsConfig {
    /// Listen address, `host:port` or `:port`.
    #[serde(default = "default_ops_addr")]
    pub addr: String,

    /// Skip the ops server entirely.
    #[serde(default)]
    pub disable: bool,

    /// Serve `GET /metrics`.
    #[serde(default = "default_true")]
    pub with_metrics: bool,

    /// Serve the `/debug/pprof/` diagnostics.
    #[serde(default)]
    pub with_pprof: bool,

    /// Serve `GET` and `PUT /log/level`.
    #[serde(default)]
    pub with_log_control: bool,

    /// Shutdown grace period in milliseconds. Zero closes connections at once.
    #[serde(default)]
    pub grace_period_ms: u64,
}

impl OpsConfig {
    /// Returns the grace period as a [`Duration`].
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            addr: default_ops_addr(),
            disable: false,
            with_metrics: true,
            with_pprof: false,
            with_log_control: false,
            grace_period_ms: 0,
        }
    }
}

/// Process logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Minimum severity: debug, info, warn or error.
    #[serde(default)]
    pub level: LogLevel,

    /// `logfmt` or `json`.
    #[serde(default)]
    pub format: LogFormat,

    /// Include the source file and line of each event.
    #[serde(default = "default_true")]
    pub with_caller: bool,
}

impl LoggingConfig {
    /// Converts to the settings taken by `keel_telemetry::init_logging`.
    #[must_use]
    pub fn to_log_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            format: self.format,
            with_caller: self.with_caller,
            ..LogConfig::default()
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Logfmt,
            with_caller: true,
        }
    }
}

fn default_ops_addr() -> String {
    ":6060".to_string()
}

const fn default_true() -> bool {
    true
}

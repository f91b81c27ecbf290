//! Telemetry error types.

use thiserror::Error;

/// Errors that can occur during telemetry operations.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A collector with the same name is already registered.
    #[error("collector `{0}` is already registered")]
    DuplicateCollector(String),

    /// Failed to initialize logging.
    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    /// The log level is not one of debug, info, warn, error.
    #[error("invalid log level `{0}`, expected one of: debug, info, warn, error")]
    InvalidLevel(String),

    /// The log format is not one of logfmt, json.
    #[error("invalid log format `{0}`, expected one of: logfmt, json")]
    InvalidFormat(String),

    /// Failed to swap the active log filter.
    #[error("Failed to reload log filter: {0}")]
    Reload(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::DuplicateCollector("process".to_string());
        assert_eq!(err.to_string(), "collector `process` is already registered");

        let err = TelemetryError::InvalidLevel("trace".to_string());
        assert!(err.to_string().contains("debug, info, warn, error"));
    }
}

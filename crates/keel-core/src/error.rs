//! Construction-time errors.
//!
//! Both error kinds are raised before a listener is ever opened: a
//! [`ConfigurationError`] when the option record is incomplete or malformed,
//! and a [`RegistrationConflict`] when two attach callbacks claim the same
//! route or service.

use thiserror::Error;

/// Result type alias using [`ConfigurationError`].
pub type ConfigurationResult<T> = Result<T, ConfigurationError>;

/// A server configuration that cannot be turned into a running instance.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// No listen address was configured.
    #[error("listen address is empty")]
    EmptyListen,

    /// The listen address could not be parsed for the configured network.
    #[error("invalid listen address `{address}`: {reason}")]
    InvalidListen {
        /// The offending address.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The network kind is unknown or not usable by a stream server.
    #[error("unsupported network `{0}`")]
    UnsupportedNetwork(String),

    /// The TLS certificate chain or private key is not valid PEM.
    #[error("invalid TLS material: {0}")]
    InvalidTls(String),

    /// A transport specific setting is out of range.
    #[error("invalid transport setting `{name}`: {reason}")]
    InvalidSetting {
        /// Setting name.
        name: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Two attach callbacks registered the same route or service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} `{name}` is already registered")]
pub struct RegistrationConflict {
    /// What was registered twice, e.g. `"route"` or `"service"`.
    pub kind: &'static str,
    /// The duplicated name.
    pub name: String,
}

impl RegistrationConflict {
    /// Creates a new conflict error.
    #[must_use]
    pub fn new(kind: &'static str, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_display() {
        let err = RegistrationConflict::new("route", "GET /users");
        assert_eq!(err.to_string(), "route `GET /users` is already registered");
    }

    #[test]
    fn test_invalid_listen_display() {
        let err = ConfigurationError::InvalidListen {
            address: "nope".to_string(),
            reason: "missing port".to_string(),
        };
        assert_eq!(err.to_string(), "invalid listen address `nope`: missing port");
    }
}

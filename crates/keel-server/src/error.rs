//! Server errors.

use crate::lifecycle::ServerState;
use keel_core::{ConfigurationError, RegistrationConflict};
use std::io;
use thiserror::Error;

/// Errors returned by [`Server::new`](crate::Server::new) and
/// [`Server::start`](crate::Server::start).
///
/// Every variant is fatal to the caller: a server that failed to construct or
/// start never accepts a request. Request failures are
/// [`RequestError`](keel_middleware::RequestError)s and never surface here.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The option record is invalid.
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ConfigurationError),

    /// Two attach callbacks registered the same route or service.
    #[error(transparent)]
    RegistrationConflict(#[from] RegistrationConflict),

    /// The listener could not be opened.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// The address that was requested.
        address: String,
        /// The underlying socket error.
        #[source]
        source: io::Error,
    },

    /// The requested transition is not valid from the current state.
    #[error("cannot {action} a server that is {state}")]
    InvalidState {
        /// The attempted operation.
        action: &'static str,
        /// The state the server was in.
        state: ServerState,
    },

    /// I/O failure outside of binding.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ServerError {
    /// Returns `true` for errors raised while opening the listener.
    #[must_use]
    pub fn is_bind(&self) -> bool {
        matches!(self, Self::Bind { .. })
    }
}

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

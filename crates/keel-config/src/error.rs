//! Errors raised while loading a [`KeelConfig`](crate::KeelConfig).

use std::path::PathBuf;
use thiserror::Error;

/// A config source could not be read, parsed, or validated.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file passed to [`with_file`](crate::ConfigLoader::with_file) does not exist.
    #[error("config file {path} does not exist")]
    FileNotFound {
        /// The missing path.
        path: PathBuf,
    },

    /// The file exists but could not be read.
    #[error("cannot read config file {path}")]
    ReadError {
        /// The unreadable path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed TOML or an unknown key.
    #[error("invalid TOML config: {0}")]
    TomlError(#[from] toml::de::Error),

    /// Malformed JSON or an unknown key.
    #[error("invalid JSON config: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The file extension or format name is neither toml nor json.
    #[error("config format `{0}` is not supported")]
    UnsupportedFormat(String),

    /// An environment override could not be parsed.
    #[error("environment override {var} is invalid: {reason}")]
    EnvParseError {
        /// Full variable name, prefix included.
        var: String,
        /// Why parsing failed.
        reason: String,
    },

    /// A loaded value failed validation.
    #[error("{field}: {reason}")]
    InvalidValue {
        /// Dotted path of the field.
        field: String,
        /// Why the value is invalid.
        reason: String,
    },
}

impl ConfigError {
    /// Creates a [`ConfigError::FileNotFound`].
    pub fn file_not_found(path: impl Into<PathBuf>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    /// Creates a [`ConfigError::ReadError`].
    pub fn read_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ReadError {
            path: path.into(),
            source,
        }
    }

    /// Creates a [`ConfigError::EnvParseError`].
    pub fn env_parse_error(var: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnvParseError {
            var: var.into(),
            reason: reason.into(),
        }
    }

    /// Creates a [`ConfigError::InvalidValue`].
    pub fn invalid_value(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias for config loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

//! # Keel Config
//!
//! Layered configuration for the operational side of a Keel process: the ops
//! HTTP server and logging.
//!
//! Values are resolved from defaults, then a TOML or JSON file, then
//! environment variables. Unknown fields fail loading.
//!
//! ```toml
//! [ops]
//! addr = ":6060"
//! disable = false
//! with_metrics = true
//! with_pprof = false
//! with_log_control = false
//! grace_period_ms = 0
//!
//! [logging]
//! level = "info"
//! format = "logfmt"
//! with_caller = true
//! ```
//!
//! Environment overrides use `PREFIX__SECTION__KEY`, for example
//! `KEEL__OPS__ADDR=:7070` or `KEEL__LOGGING__LEVEL=debug`.

#![doc(html_root_url = "https://docs.rs/keel-config/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::KeelConfig;
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;
pub use schema::{LoggingConfig, OpsConfig};

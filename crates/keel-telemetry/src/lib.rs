//! Observability for Keel services.
//!
//! - **Metrics**: a process-wide [`MetricsRegistry`] backed by a Prometheus
//!   recorder, created once by [`init_metrics`] with default runtime and
//!   process collectors.
//! - **Logging**: [`init_logging`] installs a `tracing-subscriber` stack whose
//!   minimum level can be changed at runtime through a [`LogLevelHandle`].
//!
//! # Registry lifecycle
//!
//! The registry is created on the first call to [`init_metrics`] and lives
//! until the process exits. Later calls return the same instance. Domain
//! collectors are registered before servers start exposing `/metrics`;
//! registering while scrapes are in progress is not supported.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Source |
//! |--------|------|--------|
//! | `keel_runtime_workers` | Gauge | runtime collector |
//! | `keel_runtime_alive_tasks` | Gauge | runtime collector |
//! | `process_resident_memory_bytes` | Gauge | process collector |
//! | `process_virtual_memory_bytes` | Gauge | process collector |
//! | `process_cpu_usage_percent` | Gauge | process collector |
//! | `process_start_time_seconds` | Gauge | process collector |
//!
//! # Example
//!
//! ```rust,no_run
//! use keel_telemetry::{init_logging, init_metrics, LogConfig};
//!
//! let levels = init_logging(&LogConfig::default()).expect("logging");
//! let registry = init_metrics();
//!
//! metrics::counter!("orders_total").increment(1);
//! println!("{}", registry.render());
//! # let _ = levels;
//! ```

#![doc(html_root_url = "https://docs.rs/keel-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod collectors;
pub mod error;
pub mod logging;
pub mod registry;

pub use collectors::{
    process_snapshot, runtime_snapshot, Collector, ProcessCollector, ProcessSnapshot,
    RuntimeCollector, RuntimeSnapshot,
};
pub use error::TelemetryError;
pub use logging::{init_logging, reloadable_filter, LogConfig, LogFormat, LogLevel, LogLevelHandle};
pub use registry::{init_metrics, MetricsRegistry};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

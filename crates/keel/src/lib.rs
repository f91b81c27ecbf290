//! # Keel
//!
//! Graceful HTTP and gRPC servers with an ops endpoint, structured logging
//! and Prometheus metrics.
//!
//! This crate re-exports the Keel building blocks and adds [`App`], which
//! runs a set of servers next to the ops server until the process is asked
//! to stop.
//!
//! ## Crates
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | [`core`] | Functional options, endpoints, TLS material |
//! | [`server`] | Server lifecycle, HTTP and gRPC flavours, probes |
//! | [`middleware`] | Interceptor chains and request errors |
//! | [`telemetry`] | Logging setup and the metrics registry |
//! | [`config`] | File and environment configuration |
//!
//! ## Example
//!
//! ```no_run
//! use keel::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigLoader::new()
//!         .with_dotenv()
//!         .with_optional_file("keel.toml")?
//!         .with_env_prefix("KEEL")
//!         .load()?;
//!
//!     let api = HttpServer::new([
//!         with_listen(":8080"),
//!         with_service_name("api"),
//!     ])?;
//!
//!     App::new(config).with_logging()?.with_server(api).run().await
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/keel/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod app;

pub use app::{App, OPS_SERVICE_NAME};

pub use keel_config as config;
pub use keel_core as core;
pub use keel_middleware as middleware;
pub use keel_server as server;
pub use keel_telemetry as telemetry;

/// Common imports for building a Keel service.
pub mod prelude {
    pub use crate::App;
    pub use keel_config::{ConfigLoader, KeelConfig};
    pub use keel_core::{
        with_grace_period, with_listen, with_network, with_service_name, with_tls, Network,
        TlsMaterial,
    };
    pub use keel_middleware::{RequestError, UnaryRequest, UnaryResponse};
    pub use keel_server::grpc::{with_service, GrpcService};
    pub use keel_server::http::{with_middleware, with_route};
    pub use keel_server::{
        GrpcServer, HttpServer, ProbeResult, Prober, ShutdownOutcome, ShutdownSignal,
    };
}

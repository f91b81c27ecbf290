//! # Keel Server
//!
//! Graceful server lifecycle for Keel HTTP and gRPC services.
//!
//! Both flavours share one state machine, [`Server`], parameterised over a
//! [`Transport`] that knows how to serve a single accepted connection:
//!
//! ```text
//! Constructed ──start──▶ Starting ──bind ok──▶ Running ──shutdown──▶ Draining ──▶ Stopped
//!                            │                                                 (clean | forced)
//!                            └──bind error──▶ FailedToStart
//! ```
//!
//! - [`http::HttpServer`] - HTTP/1.1 with routing, middleware and the ops
//!   endpoints (`/healthz`, `/metrics`, `/debug/pprof/`, `/log/level`)
//! - [`grpc::GrpcServer`] - gRPC over HTTP/2 with unary and stream interceptors
//! - [`Prober`] - named health checks plus a built-in readiness probe
//! - [`ShutdownSignal`] - one-shot, cloneable shutdown trigger
//!
//! ## Shutdown
//!
//! [`Server::shutdown`] stops accepting, asks open connections to finish and
//! waits up to the grace period. Connections still open when it elapses are
//! closed forcibly and the outcome is [`ShutdownOutcome::Forced`]. A zero
//! grace period forces closure straight away.
//!
//! ## Example
//!
//! ```no_run
//! use keel_core::{with_grace_period, with_listen};
//! use keel_server::http::{with_prober, HttpServer};
//! use keel_server::{Prober, ShutdownSignal};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), keel_server::ServerError> {
//! let prober = Prober::new();
//! let server = HttpServer::new([
//!     with_listen(":6060"),
//!     with_grace_period(Duration::from_secs(10)),
//!     with_prober(prober.clone()),
//! ])?;
//!
//! let signal = ShutdownSignal::with_os_signals();
//! let outcome = server.run_until(signal.recv()).await?;
//! println!("stopped: {outcome:?}");
//! # Ok(())
//! # }
//! ```

#![doc(html_root_url = "https://docs.rs/keel-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod grpc;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod listener;
pub mod shutdown;
pub mod transport;

pub use error::{ServerError, ServerResult};
pub use grpc::GrpcServer;
pub use health::{ProbeFn, ProbeReport, ProbeResult, Prober, READINESS_PROBE};
pub use http::HttpServer;
pub use lifecycle::{Server, ServerState, ShutdownOutcome};
pub use listener::{BoxedIo, Io, LocalAddr};
pub use shutdown::{ConnectionToken, ConnectionTracker, ShutdownSignal};
pub use transport::Transport;

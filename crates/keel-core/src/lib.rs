//! # Keel Core
//!
//! Configuration foundation shared by every Keel server flavour.
//!
//! - [`ServerOptions`] - the configuration record a server instance is built from
//! - [`ServerOption`] - a composable, side-effect free transformation of that record
//! - [`combine`] / [`noop`] - option composition and its identity element
//! - [`Endpoint`] / [`Network`] - validated listen addresses
//! - [`TlsMaterial`] - PEM encoded certificate chain and private key
//!
//! Flavour specific pieces (interceptor lists, the attach registrar, raw
//! transport settings) are supplied through the [`Flavor`] trait, so the HTTP
//! and gRPC servers share one option model.
//!
//! ## Example
//!
//! ```
//! use keel_core::{combine, with_grace_period, with_listen, Flavor, ServerOptions};
//! use std::time::Duration;
//!
//! struct Plain;
//!
//! impl Flavor for Plain {
//!     type Interceptors = ();
//!     type Registrar = ();
//!     type Settings = ();
//! }
//!
//! let options: ServerOptions<Plain> = ServerOptions::from_options([
//!     with_listen(":8080"),
//!     combine([with_grace_period(Duration::from_secs(5))]),
//! ]);
//!
//! assert_eq!(options.listen(), ":8080");
//! assert_eq!(options.grace_period(), Duration::from_secs(5));
//! ```

#![doc(html_root_url = "https://docs.rs/keel-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod endpoint;
mod error;
mod options;
mod tls;

pub use endpoint::{Endpoint, Network};
pub use error::{ConfigurationError, ConfigurationResult, RegistrationConflict};
pub use options::{
    combine, noop, with_attach, with_grace_period, with_listen, with_network,
    with_service_name, with_tls, with_transport_option, AttachFn, Flavor, ServerOption,
    ServerOptions, TransportFn, DEFAULT_SERVICE_NAME,
};
pub use tls::{Alpn, TlsMaterial};

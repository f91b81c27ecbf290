//! Functional options.
//!
//! A [`ServerOptions`] record is never built field by field. Callers hand a
//! server a list of [`ServerOption`]s, each of which sets or appends exactly
//! one concern. Options are applied in order: later options override earlier
//! ones on scalar fields and append on list fields (attach callbacks,
//! interceptors, raw transport settings).
//!
//! ```text
//! combine([a, b]) applied to o  ==  b(a(o))
//! noop()          applied to o  ==  o
//! ```
//!
//! Once a server is constructed it keeps its own snapshot of the record, so
//! applying further options only affects servers built afterwards.

use crate::endpoint::{Endpoint, Network};
use crate::error::{ConfigurationResult, RegistrationConflict};
use crate::tls::TlsMaterial;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Service name used in logs and metric labels when none is configured.
pub const DEFAULT_SERVICE_NAME: &str = "server";

/// Flavour specific parts of the option record.
///
/// The HTTP and gRPC servers each provide an implementation, which lets the
/// generic option functions in this module serve both.
pub trait Flavor: Send + Sync + 'static {
    /// Ordered interceptor lists carried by the record.
    type Interceptors: Clone + Default + Send + Sync + 'static;
    /// Target handed to attach callbacks at construction.
    type Registrar: 'static;
    /// Raw transport settings, built from defaults plus appended tweaks.
    type Settings: Default + 'static;
}

/// Attach callback: registers routes or services into the flavour registrar.
pub type AttachFn<R> = Arc<dyn Fn(&mut R) -> Result<(), RegistrationConflict> + Send + Sync>;

/// Raw transport setting tweak.
pub type TransportFn<S> = Arc<dyn Fn(&mut S) + Send + Sync>;

/// Configuration record for one server instance.
pub struct ServerOptions<F: Flavor> {
    listen: String,
    network: Network,
    tls: Option<TlsMaterial>,
    grace_period: Duration,
    service_name: String,
    attach: Vec<AttachFn<F::Registrar>>,
    interceptors: F::Interceptors,
    transport: Vec<TransportFn<F::Settings>>,
}

impl<F: Flavor> ServerOptions<F> {
    /// Applies `options` in order to a default record.
    pub fn from_options<I>(options: I) -> Self
    where
        I: IntoIterator<Item = ServerOption<F>>,
    {
        let mut record = Self::default();
        for option in options {
            option.apply(&mut record);
        }
        record
    }

    /// Returns the configured listen address, possibly empty.
    #[must_use]
    pub fn listen(&self) -> &str {
        &self.listen
    }

    /// Returns the configured network kind.
    #[must_use]
    pub fn network(&self) -> Network {
        self.network
    }

    /// Returns the TLS material, if any.
    #[must_use]
    pub fn tls(&self) -> Option<&TlsMaterial> {
        self.tls.as_ref()
    }

    /// Returns the shutdown grace period. Zero means shutdown forces closure.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Returns the service name used for logs and metric labels.
    #[must_use]
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Returns the attach callbacks in registration order.
    #[must_use]
    pub fn attach_callbacks(&self) -> &[AttachFn<F::Registrar>] {
        &self.attach
    }

    /// Returns the flavour specific interceptor lists.
    #[must_use]
    pub fn interceptors(&self) -> &F::Interceptors {
        &self.interceptors
    }

    /// Mutable access for flavour specific options that append interceptors.
    pub fn interceptors_mut(&mut self) -> &mut F::Interceptors {
        &mut self.interceptors
    }

    /// Builds the raw transport settings by applying every tweak to the defaults.
    #[must_use]
    pub fn transport_settings(&self) -> F::Settings {
        let mut settings = F::Settings::default();
        for tweak in &self.transport {
            tweak(&mut settings);
        }
        settings
    }

    /// Validates the record and returns the endpoint to bind.
    ///
    /// Checks that the listen address is present and parses for the network,
    /// and that TLS material, when given, decodes.
    pub fn validate(&self) -> ConfigurationResult<Endpoint> {
        let endpoint = Endpoint::parse(self.network, &self.listen)?;
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }
        Ok(endpoint)
    }

    /// Runs every attach callback against `registrar`, stopping at the first conflict.
    pub fn attach_all(&self, registrar: &mut F::Registrar) -> Result<(), RegistrationConflict> {
        for attach in &self.attach {
            attach(registrar)?;
        }
        Ok(())
    }
}

impl<F: Flavor> Default for ServerOptions<F> {
    fn default() -> Self {
        Self {
            listen: String::new(),
            network: Network::default(),
            tls: None,
            grace_period: Duration::ZERO,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            attach: Vec::new(),
            interceptors: F::Interceptors::default(),
            transport: Vec::new(),
        }
    }
}

impl<F: Flavor> Clone for ServerOptions<F> {
    fn clone(&self) -> Self {
        Self {
            listen: self.listen.clone(),
            network: self.network,
            tls: self.tls.clone(),
            grace_period: self.grace_period,
            service_name: self.service_name.clone(),
            attach: self.attach.clone(),
            interceptors: self.interceptors.clone(),
            transport: self.transport.clone(),
        }
    }
}

impl<F: Flavor> fmt::Debug for ServerOptions<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerOptions")
            .field("listen", &self.listen)
            .field("network", &self.network)
            .field("tls", &self.tls.is_some())
            .field("grace_period", &self.grace_period)
            .field("service_name", &self.service_name)
            .field("attach", &self.attach.len())
            .field("transport", &self.transport.len())
            .finish_non_exhaustive()
    }
}

/// A single configuration step.
///
/// Options are total: applying one never fails and touches nothing but the
/// record it is given.
pub struct ServerOption<F: Flavor> {
    apply: Arc<dyn Fn(&mut ServerOptions<F>) + Send + Sync>,
}

impl<F: Flavor> ServerOption<F> {
    /// Wraps a record transformation as an option.
    pub fn new<A>(apply: A) -> Self
    where
        A: Fn(&mut ServerOptions<F>) + Send + Sync + 'static,
    {
        Self {
            apply: Arc::new(apply),
        }
    }

    /// Applies this option to `options`.
    pub fn apply(&self, options: &mut ServerOptions<F>) {
        (self.apply)(options);
    }
}

impl<F: Flavor> Clone for ServerOption<F> {
    fn clone(&self) -> Self {
        Self {
            apply: Arc::clone(&self.apply),
        }
    }
}

impl<F: Flavor> fmt::Debug for ServerOption<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ServerOption")
    }
}

/// Composes `options` into one option that applies them in list order.
pub fn combine<F, I>(options: I) -> ServerOption<F>
where
    F: Flavor,
    I: IntoIterator<Item = ServerOption<F>>,
{
    let options: Vec<_> = options.into_iter().collect();
    ServerOption::new(move |record| {
        for option in &options {
            option.apply(record);
        }
    })
}

/// The identity option.
pub fn noop<F: Flavor>() -> ServerOption<F> {
    ServerOption::new(|_| {})
}

/// Sets the listen address, e.g. `":8080"`, `"127.0.0.1:0"` or a unix socket path.
pub fn with_listen<F: Flavor>(listen: impl Into<String>) -> ServerOption<F> {
    let listen = listen.into();
    ServerOption::new(move |o| o.listen = listen.clone())
}

/// Sets the network kind.
pub fn with_network<F: Flavor>(network: Network) -> ServerOption<F> {
    ServerOption::new(move |o| o.network = network)
}

/// Serves over TLS with the given certificate chain and key.
pub fn with_tls<F: Flavor>(material: TlsMaterial) -> ServerOption<F> {
    ServerOption::new(move |o| o.tls = Some(material.clone()))
}

/// Sets how long shutdown waits for in-flight work before forcing closure.
pub fn with_grace_period<F: Flavor>(grace_period: Duration) -> ServerOption<F> {
    ServerOption::new(move |o| o.grace_period = grace_period)
}

/// Sets the service name used in logs and metric labels.
pub fn with_service_name<F: Flavor>(name: impl Into<String>) -> ServerOption<F> {
    let name = name.into();
    ServerOption::new(move |o| o.service_name = name.clone())
}

/// Appends an attach callback, run once when the server is constructed.
pub fn with_attach<F, A>(attach: A) -> ServerOption<F>
where
    F: Flavor,
    A: Fn(&mut F::Registrar) -> Result<(), RegistrationConflict> + Send + Sync + 'static,
{
    let attach: AttachFn<F::Registrar> = Arc::new(attach);
    ServerOption::new(move |o| o.attach.push(Arc::clone(&attach)))
}

/// Appends a raw transport setting tweak.
pub fn with_transport_option<F, T>(tweak: T) -> ServerOption<F>
where
    F: Flavor,
    T: Fn(&mut F::Settings) + Send + Sync + 'static,
{
    let tweak: TransportFn<F::Settings> = Arc::new(tweak);
    ServerOption::new(move |o| o.transport.push(Arc::clone(&tweak)))
}

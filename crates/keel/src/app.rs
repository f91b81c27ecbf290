//! Process level wiring: the ops server and running a set of servers until
//! an OS signal arrives.

use anyhow::Context;
use futures_util::future::join_all;
use keel_config::{KeelConfig, OpsConfig};
use keel_core::{with_grace_period, with_listen, with_service_name};
use keel_middleware::BoxFuture;
use keel_server::http::{with_log_control, with_metrics, with_profiler, with_prober, HttpOption, HttpServer};
use keel_server::{LocalAddr, Prober, Server, ServerResult, ShutdownOutcome, ShutdownSignal, Transport};
use keel_telemetry::{init_logging, init_metrics, LogLevelHandle};
use std::future::Future;
use tracing::{info, warn};

/// Service name of the ops server.
pub const OPS_SERVICE_NAME: &str = "metrics/profiler";

/// Object safe view of a [`Server`] of any flavour.
trait Managed: Send + Sync {
    fn name(&self) -> &str;
    fn start(&self) -> BoxFuture<'_, ServerResult<LocalAddr>>;
    fn shutdown(&self) -> BoxFuture<'_, ShutdownOutcome>;
}

impl<T: Transport> Managed for Server<T> {
    fn name(&self) -> &str {
        Server::name(self)
    }

    fn start(&self) -> BoxFuture<'_, ServerResult<LocalAddr>> {
        Box::pin(Server::start(self))
    }

    fn shutdown(&self) -> BoxFuture<'_, ShutdownOutcome> {
        Box::pin(Server::shutdown(self))
    }
}

/// A set of servers sharing one prober, one log level and one shutdown.
///
/// ```no_run
/// use keel::App;
/// use keel_config::ConfigLoader;
///
/// # async fn run() -> anyhow::Result<()> {
/// let config = ConfigLoader::new().with_env_prefix("KEEL").load()?;
/// App::new(config).with_logging()?.run().await
/// # }
/// ```
pub struct App {
    config: KeelConfig,
    prober: Prober,
    log_level: LogLevelHandle,
    servers: Vec<Box<dyn Managed>>,
}

impl App {
    /// Creates an app with no servers. Logging is left untouched until
    /// [`with_logging`](Self::with_logging).
    #[must_use]
    pub fn new(config: KeelConfig) -> Self {
        let log_level = LogLevelHandle::detached(config.logging.level);
        Self {
            config,
            prober: Prober::new(),
            log_level,
            servers: Vec::new(),
        }
    }

    /// Installs the global subscriber described by the logging section.
    pub fn with_logging(mut self) -> anyhow::Result<Self> {
        self.log_level = init_logging(&self.config.logging.to_log_config())
            .context("failed to initialize logging")?;
        Ok(self)
    }

    /// Adds a server. Servers start in the order added and stop together.
    #[must_use]
    pub fn with_server<T: Transport>(mut self, server: Server<T>) -> Self {
        self.servers.push(Box::new(server));
        self
    }

    /// Returns the prober shared by every server of this app.
    #[must_use]
    pub fn prober(&self) -> &Prober {
        &self.prober
    }

    /// Returns the handle controlling the process log level.
    #[must_use]
    pub fn log_level(&self) -> &LogLevelHandle {
        &self.log_level
    }

    /// Returns the loaded configuration.
    #[must_use]
    pub fn config(&self) -> &KeelConfig {
        &self.config
    }

    /// Builds the ops server described by `config`, or `None` when disabled.
    ///
    /// The prober is always exposed. Metrics are on by default; diagnostics
    /// and log control only when enabled.
    pub fn ops_server(
        config: &OpsConfig,
        prober: &Prober,
        log_level: &LogLevelHandle,
    ) -> ServerResult<Option<HttpServer>> {
        if config.disable {
            return Ok(None);
        }

        let mut options: Vec<HttpOption> = vec![
            with_service_name(OPS_SERVICE_NAME),
            with_listen(config.addr.clone()),
            with_grace_period(config.grace_period()),
            with_prober(prober.clone()),
        ];
        if config.with_metrics {
            options.push(with_metrics(init_metrics()));
        }
        if config.with_pprof {
            options.push(with_profiler());
        }
        if config.with_log_control {
            options.push(with_log_control(log_level.clone()));
        }

        HttpServer::new(options).map(Some)
    }

    /// Runs every server until SIGINT or SIGTERM.
    pub async fn run(self) -> anyhow::Result<()> {
        let signal = ShutdownSignal::with_os_signals();
        self.run_until(signal.recv()).await
    }

    /// Runs every server until `signal` completes, then drains them together.
    ///
    /// If a server fails to start, the ones already started are shut down
    /// and the error is returned. Forced drains are logged, not returned.
    pub async fn run_until<F>(mut self, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()>,
    {
        if let Some(ops) = Self::ops_server(&self.config.ops, &self.prober, &self.log_level)
            .context("failed to build the ops server")?
        {
            self.servers.insert(0, Box::new(ops));
        }

        for (started, server) in self.servers.iter().enumerate() {
            if let Err(e) = server.start().await {
                shutdown_all(&self.servers[..started]).await;
                return Err(e).with_context(|| format!("failed to start {}", server.name()));
            }
        }

        self.prober.ready();
        info!(servers = self.servers.len(), "all servers started");

        signal.await;
        info!("shutdown requested");
        shutdown_all(&self.servers).await;
        Ok(())
    }
}

async fn shutdown_all(servers: &[Box<dyn Managed>]) {
    let outcomes = join_all(servers.iter().map(|server| server.shutdown())).await;
    for (server, outcome) in servers.iter().zip(outcomes) {
        if let ShutdownOutcome::Forced { abandoned } = outcome {
            warn!(server = %server.name(), abandoned, "server was stopped forcibly");
        }
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("servers", &self.servers.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

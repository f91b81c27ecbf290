//! The server lifecycle state machine.
//!
//! ```text
//! Constructed ──start──▶ Running ──shutdown──▶ Draining ──▶ Stopped (clean | forced)
//!      │
//!      └──start (bind fails)──▶ FailedToStart
//! ```
//!
//! Both server flavours run on this one implementation; the protocol only
//! enters through [`Transport`].

use crate::error::{ServerError, ServerResult};
use crate::listener::{BoxedIo, Listener, LocalAddr};
use crate::shutdown::{ConnectionToken, ConnectionTracker, ShutdownSignal};
use crate::transport::Transport;
use keel_core::{Endpoint, ServerOption, ServerOptions};
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept, so descriptor exhaustion does not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Built and validated, not yet listening.
    Constructed,
    /// Binding the listener.
    Starting,
    /// Accepting connections.
    Running,
    /// No longer accepting; waiting for in-flight work.
    Draining,
    /// Terminal. `forced` is set when the grace period ran out.
    Stopped {
        /// Whether open connections were closed forcibly.
        forced: bool,
    },
    /// Terminal. The listener could not be opened.
    FailedToStart,
}

impl ServerState {
    /// Returns `true` for states the server never leaves.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped { .. } | Self::FailedToStart)
    }
}

impl fmt::Display for ServerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Constructed => "constructed",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Stopped { forced: false } => "stopped",
            Self::Stopped { forced: true } => "stopped (forced)",
            Self::FailedToStart => "failed to start",
        })
    }
}

/// How a call to [`Server::shutdown`] ended.
///
/// Both `Clean` and `Forced` are successful shutdowns; callers log `Forced`
/// as a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Every in-flight request finished within the grace period.
    Clean,
    /// The grace period elapsed and open connections were closed.
    Forced {
        /// Connections still open when the deadline hit.
        abandoned: usize,
    },
    /// Another caller is already draining this server.
    InProgress,
}

impl ShutdownOutcome {
    /// Returns `true` if connections were closed forcibly.
    #[must_use]
    pub fn is_forced(self) -> bool {
        matches!(self, Self::Forced { .. })
    }
}

enum Phase {
    Constructed,
    Starting,
    Running(Running),
    Draining,
    Stopped(ShutdownOutcome),
    FailedToStart,
}

impl Phase {
    fn state(&self) -> ServerState {
        match self {
            Self::Constructed => ServerState::Constructed,
            Self::Starting => ServerState::Starting,
            Self::Running(_) => ServerState::Running,
            Self::Draining => ServerState::Draining,
            Self::Stopped(outcome) => ServerState::Stopped {
                forced: outcome.is_forced(),
            },
            Self::FailedToStart => ServerState::FailedToStart,
        }
    }
}

struct Running {
    signal: ShutdownSignal,
    tracker: ConnectionTracker,
    accept: JoinHandle<()>,
}

/// Phase plus its published state. Shared with the drain task so a drain
/// reaches `Stopped` even if the caller of `shutdown` goes away.
struct Lifecycle {
    phase: Mutex<Phase>,
    state: watch::Sender<ServerState>,
}

impl Lifecycle {
    fn enter(&self, phase: &mut Phase, next: Phase) {
        *phase = next;
        self.state.send_replace(phase.state());
    }
}

/// A server instance, generic over its protocol.
///
/// Share it behind an [`Arc`] to call [`shutdown`](Self::shutdown) from a
/// different task than the one that started it.
pub struct Server<T: Transport> {
    name: Arc<str>,
    endpoint: Endpoint,
    grace_period: Duration,
    tls: Option<TlsAcceptor>,
    transport: Arc<T>,
    lifecycle: Arc<Lifecycle>,
    // Serializes start and the Running -> Draining step.
    transition: tokio::sync::Mutex<()>,
    local_addr: OnceLock<LocalAddr>,
}

impl<T: Transport> Server<T> {
    /// Applies `options` to a fresh record and constructs a server from it.
    ///
    /// Fails with [`ServerError::Configuration`] if the record is invalid and
    /// with [`ServerError::RegistrationConflict`] if two attach callbacks
    /// register the same route or service.
    pub fn new<I>(options: I) -> ServerResult<Self>
    where
        I: IntoIterator<Item = ServerOption<T::Flavor>>,
    {
        Self::from_options(ServerOptions::from_options(options))
    }

    /// Constructs a server from an already assembled option record.
    pub fn from_options(options: ServerOptions<T::Flavor>) -> ServerResult<Self> {
        let endpoint = options.validate()?;
        let tls = options
            .tls()
            .map(|material| material.server_config(T::ALPN))
            .transpose()?
            .map(TlsAcceptor::from);
        let transport = T::build(&options)?;

        let name: Arc<str> = Arc::from(options.service_name());
        debug!(
            server = %name,
            protocol = T::PROTOCOL,
            listen = %endpoint,
            tls = tls.is_some(),
            "server constructed"
        );

        let (state, _) = watch::channel(ServerState::Constructed);
        Ok(Self {
            name,
            endpoint,
            grace_period: options.grace_period(),
            tls,
            transport: Arc::new(transport),
            lifecycle: Arc::new(Lifecycle {
                phase: Mutex::new(Phase::Constructed),
                state,
            }),
            transition: tokio::sync::Mutex::new(()),
            local_addr: OnceLock::new(),
        })
    }

    /// Returns the service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the configured endpoint.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Returns the shutdown grace period.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    /// Returns the protocol state built at construction.
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ServerState {
        *self.lifecycle.state.borrow()
    }

    /// Returns the bound address once the server has started.
    #[must_use]
    pub fn local_addr(&self) -> Option<&LocalAddr> {
        self.local_addr.get()
    }

    /// Opens the listener and starts accepting connections.
    ///
    /// Returns the bound address, which carries the real port when port 0
    /// was requested. A bind failure moves the server to
    /// [`ServerState::FailedToStart`]; starting twice is an
    /// [`ServerError::InvalidState`].
    pub async fn start(&self) -> ServerResult<LocalAddr> {
        let _transition = self.transition.lock().await;
        {
            let mut phase = self.lifecycle.phase.lock();
            if !matches!(*phase, Phase::Constructed) {
                return Err(ServerError::InvalidState {
                    action: "start",
                    state: phase.state(),
                });
            }
            self.lifecycle.enter(&mut phase, Phase::Starting);
        }

        let bound = match Listener::bind(&self.endpoint).await {
            Ok(listener) => listener.local_addr().map(|addr| (listener, addr)),
            Err(e) => Err(e),
        };
        let (listener, local_addr) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                error!(server = %self.name, addr = %self.endpoint, error = %source, "failed to bind");
                self.lifecycle
                    .enter(&mut self.lifecycle.phase.lock(), Phase::FailedToStart);
                return Err(ServerError::Bind {
                    address: self.endpoint.to_string(),
                    source,
                });
            }
        };

        let signal = ShutdownSignal::new();
        let tracker = ConnectionTracker::new();
        let accept = tokio::spawn(accept_loop(AcceptLoop {
            server: Arc::clone(&self.name),
            listener,
            tls: self.tls.clone(),
            transport: Arc::clone(&self.transport),
            signal: signal.clone(),
            tracker: tracker.clone(),
        }));

        let _ = self.local_addr.set(local_addr.clone());
        self.lifecycle.enter(
            &mut self.lifecycle.phase.lock(),
            Phase::Running(Running {
                signal,
                tracker,
                accept,
            }),
        );

        info!(
            server = %self.name,
            protocol = T::PROTOCOL,
            addr = %local_addr,
            tls = self.tls.is_some(),
            "server started"
        );
        Ok(local_addr)
    }

    /// Drains the server within its configured grace period.
    ///
    /// New connections are refused at once; open connections are told to
    /// finish their in-flight requests. If they do so before the grace period
    /// elapses the outcome is [`ShutdownOutcome::Clean`], otherwise they are
    /// closed and the outcome is [`ShutdownOutcome::Forced`]. A zero grace
    /// period closes open connections immediately.
    ///
    /// Repeated calls return at once: with the first call's outcome once the
    /// server has stopped, or [`ShutdownOutcome::InProgress`] while it drains.
    /// A server that never started moves straight to stopped.
    pub async fn shutdown(&self) -> ShutdownOutcome {
        self.drain(self.grace_period).await
    }

    /// Like [`shutdown`](Self::shutdown), but never waits longer than `deadline`.
    pub async fn shutdown_within(&self, deadline: Duration) -> ShutdownOutcome {
        self.drain(self.grace_period.min(deadline)).await
    }

    /// Completes once the server reaches a terminal state.
    pub async fn stopped(&self) -> ServerState {
        let mut receiver = self.lifecycle.state.subscribe();
        let terminal = receiver.wait_for(|state| state.is_terminal()).await.map(|s| *s);
        terminal.unwrap_or_else(|_| self.state())
    }

    /// Starts the server, waits for `signal`, then shuts it down.
    pub async fn run_until<F>(&self, signal: F) -> ServerResult<ShutdownOutcome>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        signal.await;
        Ok(self.shutdown().await)
    }

    async fn drain(&self, grace: Duration) -> ShutdownOutcome {
        let running = {
            let _transition = self.transition.lock().await;
            let lifecycle = &self.lifecycle;
            let mut phase = lifecycle.phase.lock();
            match std::mem::replace(&mut *phase, Phase::Draining) {
                Phase::Running(running) => {
                    lifecycle.enter(&mut phase, Phase::Draining);
                    running
                }
                previous @ (Phase::Draining | Phase::Starting) => {
                    *phase = previous;
                    return ShutdownOutcome::InProgress;
                }
                Phase::Stopped(outcome) => {
                    *phase = Phase::Stopped(outcome);
                    return outcome;
                }
                Phase::Constructed => {
                    lifecycle.enter(&mut phase, Phase::Stopped(ShutdownOutcome::Clean));
                    return ShutdownOutcome::Clean;
                }
                Phase::FailedToStart => {
                    *phase = Phase::FailedToStart;
                    return ShutdownOutcome::Clean;
                }
            }
        };

        info!(
            server = %self.name,
            grace_period = ?grace,
            connections = running.tracker.active_connections(),
            "draining server"
        );
        self.transport.on_drain();
        running.signal.trigger();

        // Dropping the handle detaches the task; the drain still completes.
        let drain = tokio::spawn(finish_drain(
            Arc::clone(&self.name),
            Arc::clone(&self.lifecycle),
            running,
            grace,
        ));
        match drain.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(server = %self.name, error = %e, "drain task failed");
                let outcome = ShutdownOutcome::Forced { abandoned: 0 };
                self.lifecycle
                    .enter(&mut self.lifecycle.phase.lock(), Phase::Stopped(outcome));
                outcome
            }
        }
    }
}

async fn finish_drain(
    server: Arc<str>,
    lifecycle: Arc<Lifecycle>,
    mut running: Running,
    grace: Duration,
) -> ShutdownOutcome {
    let idle = !grace.is_zero()
        && tokio::time::timeout(grace, running.tracker.wait_idle())
            .await
            .is_ok();

    let outcome = if idle {
        // Every connection is gone; the accept loop only has to reap them.
        let _ = (&mut running.accept).await;
        ShutdownOutcome::Clean
    } else {
        force(&server, &mut running).await
    };

    lifecycle.enter(&mut lifecycle.phase.lock(), Phase::Stopped(outcome));
    info!(server = %server, forced = outcome.is_forced(), "server stopped");
    outcome
}

async fn force(server: &str, running: &mut Running) -> ShutdownOutcome {
    let abandoned = running.tracker.active_connections();
    running.accept.abort();
    // Wait for the abort so the listener and every connection are gone.
    let _ = (&mut running.accept).await;

    if abandoned == 0 {
        return ShutdownOutcome::Clean;
    }

    warn!(
        server = %server,
        abandoned,
        "grace period elapsed, closed remaining connections"
    );
    metrics::counter!("keel_server_forced_shutdowns_total", "server" => server.to_string())
        .increment(1);
    ShutdownOutcome::Forced { abandoned }
}

impl<T: Transport> Drop for Server<T> {
    fn drop(&mut self) {
        if let Phase::Running(running) = &*self.lifecycle.phase.lock() {
            running.signal.trigger();
            running.accept.abort();
        }
    }
}

impl<T: Transport> fmt::Debug for Server<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.name)
            .field("protocol", &T::PROTOCOL)
            .field("endpoint", &self.endpoint)
            .field("grace_period", &self.grace_period)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

struct AcceptLoop<T> {
    server: Arc<str>,
    listener: Listener,
    tls: Option<TlsAcceptor>,
    transport: Arc<T>,
    signal: ShutdownSignal,
    tracker: ConnectionTracker,
}

async fn accept_loop<T: Transport>(ctx: AcceptLoop<T>) {
    let AcceptLoop {
        server,
        listener,
        tls,
        transport,
        signal,
        tracker,
    } = ctx;
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            () = signal.recv() => break,

            accepted = listener.accept() => match accepted {
                Ok((io, peer)) => {
                    debug!(server = %server, peer = ?peer, "accepted connection");
                    connections.spawn(serve_connection(Connection {
                        server: Arc::clone(&server),
                        transport: Arc::clone(&transport),
                        tls: tls.clone(),
                        io,
                        peer,
                        drain: signal.clone(),
                        _token: tracker.acquire(),
                    }));
                }
                Err(e) => {
                    warn!(server = %server, error = %e, "failed to accept connection");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },

            Some(joined) = connections.join_next(), if !connections.is_empty() => {
                log_join(&server, joined);
            }
        }
    }

    drop(listener);
    debug!(
        server = %server,
        connections = connections.len(),
        "stopped accepting connections"
    );

    while let Some(joined) = connections.join_next().await {
        log_join(&server, joined);
    }
}

fn log_join(server: &str, joined: Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!(server = %server, "connection task panicked");
        }
    }
}

struct Connection<T> {
    server: Arc<str>,
    transport: Arc<T>,
    tls: Option<TlsAcceptor>,
    io: BoxedIo,
    peer: Option<SocketAddr>,
    drain: ShutdownSignal,
    _token: ConnectionToken,
}

struct OpenConnection(metrics::Gauge);

impl Drop for OpenConnection {
    fn drop(&mut self) {
        self.0.decrement(1.0);
    }
}

async fn serve_connection<T: Transport>(conn: Connection<T>) {
    let gauge = metrics::gauge!("keel_server_open_connections", "server" => conn.server.to_string());
    gauge.increment(1.0);
    let _open = OpenConnection(gauge);

    let io: BoxedIo = match conn.tls {
        Some(acceptor) => {
            let handshake = tokio::select! {
                result = acceptor.accept(conn.io) => result,
                () = conn.drain.recv() => return,
            };
            match handshake {
                Ok(stream) => Box::new(stream),
                Err(e) => {
                    debug!(server = %conn.server, peer = ?conn.peer, error = %e, "TLS handshake failed");
                    return;
                }
            }
        }
        None => conn.io,
    };

    conn.transport.serve_connection(io, conn.peer, conn.drain).await;
    debug!(server = %conn.server, peer = ?conn.peer, "connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{
        with_attach, with_grace_period, with_listen, with_network, with_service_name,
        with_transport_option, Alpn, ConfigurationError, Flavor, Network, RegistrationConflict,
    };
    use keel_middleware::BoxFuture;
    use std::time::Instant;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpStream;

    struct Hold;

    #[derive(Default)]
    struct HoldSettings {
        ignore_drain: bool,
    }

    impl Flavor for Hold {
        type Interceptors = ();
        type Registrar = Vec<&'static str>;
        type Settings = HoldSettings;
    }

    /// Keeps each connection open until the peer closes it or, unless told
    /// otherwise, until the server drains.
    struct HoldTransport {
        ignore_drain: bool,
    }

    impl Transport for HoldTransport {
        type Flavor = Hold;
        const ALPN: Alpn = Alpn::Http1;
        const PROTOCOL: &'static str = "hold";

        fn build(options: &ServerOptions<Hold>) -> ServerResult<Self> {
            let mut services = Vec::new();
            options.attach_all(&mut services)?;
            Ok(Self {
                ignore_drain: options.transport_settings().ignore_drain,
            })
        }

        fn serve_connection(
            self: Arc<Self>,
            mut io: BoxedIo,
            _peer: Option<SocketAddr>,
            drain: ShutdownSignal,
        ) -> BoxFuture<'static, ()> {
            Box::pin(async move {
                let mut buf = [0u8; 16];
                if self.ignore_drain {
                    let _ = io.read(&mut buf).await;
                    return;
                }
                tokio::select! {
                    _ = io.read(&mut buf) => {}
                    () = drain.recv() => {}
                }
            })
        }
    }

    fn service(name: &'static str) -> ServerOption<Hold> {
        with_attach(move |services: &mut Vec<&'static str>| {
            if services.contains(&name) {
                return Err(RegistrationConflict::new("service", name));
            }
            services.push(name);
            Ok(())
        })
    }

    fn server(extra: Vec<ServerOption<Hold>>) -> Server<HoldTransport> {
        let mut options = vec![with_listen("127.0.0.1:0"), with_service_name("hold")];
        options.extend(extra);
        Server::new(options).unwrap()
    }

    async fn connect(server: &Server<HoldTransport>) -> TcpStream {
        let addr = server.local_addr().and_then(LocalAddr::as_tcp).unwrap();
        let stream = TcpStream::connect(addr).await.unwrap();
        // Give the accept loop a chance to register the connection.
        tokio::time::sleep(Duration::from_millis(50)).await;
        stream
    }

    #[test]
    fn test_construct_rejects_empty_listen() {
        let err = Server::<HoldTransport>::new([with_service_name("hold")]).unwrap_err();
        assert!(matches!(
            err,
            ServerError::Configuration(ConfigurationError::EmptyListen)
        ));
    }

    #[test]
    fn test_construct_rejects_udp() {
        let err = Server::<HoldTransport>::new([with_listen(":0"), with_network(Network::Udp)])
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::Configuration(ConfigurationError::UnsupportedNetwork(_))
        ));
    }

    #[test]
    fn test_construct_surfaces_registration_conflict() {
        let err = Server::<HoldTransport>::new([
            with_listen("127.0.0.1:0"),
            service("echo"),
            service("echo"),
        ])
        .unwrap_err();
        assert!(matches!(err, ServerError::RegistrationConflict(_)));
    }

    #[tokio::test]
    async fn test_start_and_clean_shutdown() {
        let server = server(vec![service("echo")]);
        assert_eq!(server.state(), ServerState::Constructed);

        let addr = server.start().await.unwrap();
        assert_eq!(server.state(), ServerState::Running);
        assert_ne!(addr.as_tcp().unwrap().port(), 0);
        assert_eq!(server.local_addr(), Some(&addr));

        assert_eq!(server.shutdown().await, ShutdownOutcome::Clean);
        assert_eq!(server.state(), ServerState::Stopped { forced: false });
    }

    #[tokio::test]
    async fn test_start_twice_is_invalid() {
        let server = server(Vec::new());
        server.start().await.unwrap();

        let err = server.start().await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::InvalidState {
                action: "start",
                state: ServerState::Running
            }
        ));
        server.shutdown().await;
    }

    #[tokio::test]
    async fn test_bind_failure_moves_to_failed_to_start() {
        let first = server(Vec::new());
        let addr = first.start().await.unwrap();

        let second = Server::<HoldTransport>::new([with_listen(addr.to_string())]).unwrap();
        let err = second.start().await.unwrap_err();
        assert!(err.is_bind());
        assert_eq!(second.state(), ServerState::FailedToStart);
        assert_eq!(second.stopped().await, ServerState::FailedToStart);

        first.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_before_start() {
        let server = server(Vec::new());
        assert_eq!(server.shutdown().await, ShutdownOutcome::Clean);
        assert_eq!(server.state(), ServerState::Stopped { forced: false });
        assert!(server.start().await.is_err());
    }

    #[tokio::test]
    async fn test_zero_grace_forces_open_connections() {
        let server = server(Vec::new());
        server.start().await.unwrap();
        let _client = connect(&server).await;

        let outcome = server.shutdown().await;
        assert_eq!(outcome, ShutdownOutcome::Forced { abandoned: 1 });
        assert_eq!(server.state(), ServerState::Stopped { forced: true });
    }

    #[tokio::test]
    async fn test_forced_drain_increments_counter() {
        let registry = keel_telemetry::init_metrics();
        let server = server(vec![with_service_name("forced-counter")]);
        server.start().await.unwrap();
        let _client = connect(&server).await;

        assert!(server.shutdown().await.is_forced());
        let rendered = registry.render();
        assert!(
            rendered.contains(r#"keel_server_forced_shutdowns_total{server="forced-counter"} 1"#),
            "{rendered}"
        );
    }

    #[tokio::test]
    async fn test_cancelled_shutdown_still_reaches_stopped() {
        let server = server(vec![
            with_grace_period(Duration::from_secs(5)),
            with_transport_option(|s: &mut HoldSettings| s.ignore_drain = true),
        ]);
        server.start().await.unwrap();
        let client = connect(&server).await;

        let cancelled = tokio::time::timeout(Duration::from_millis(50), server.shutdown()).await;
        assert!(cancelled.is_err());
        assert_eq!(server.state(), ServerState::Draining);
        assert_eq!(server.shutdown().await, ShutdownOutcome::InProgress);

        // The in-flight connection finishes on its own, well inside the grace period.
        drop(client);
        let state = tokio::time::timeout(Duration::from_secs(2), server.stopped())
            .await
            .unwrap();
        assert_eq!(state, ServerState::Stopped { forced: false });
        assert_eq!(server.shutdown().await, ShutdownOutcome::Clean);
    }

    #[tokio::test]
    async fn test_grace_period_drains_cooperative_connections() {
        let server = server(vec![with_grace_period(Duration::from_secs(5))]);
        server.start().await.unwrap();
        let _client = connect(&server).await;

        let started = Instant::now();
        assert_eq!(server.shutdown().await, ShutdownOutcome::Clean);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_grace_period_elapses() {
        let server = server(vec![
            with_grace_period(Duration::from_millis(100)),
            with_transport_option(|s: &mut HoldSettings| s.ignore_drain = true),
        ]);
        server.start().await.unwrap();
        let _client = connect(&server).await;

        let outcome = server.shutdown().await;
        assert!(outcome.is_forced());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent() {
        let server = server(Vec::new());
        server.start().await.unwrap();
        let _client = connect(&server).await;

        let first = server.shutdown().await;
        let second = server.shutdown().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_concurrent_shutdown_reports_in_progress() {
        let server = Arc::new(server(vec![
            with_grace_period(Duration::from_millis(300)),
            with_transport_option(|s: &mut HoldSettings| s.ignore_drain = true),
        ]));
        server.start().await.unwrap();
        let _client = connect(&server).await;

        let draining = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.shutdown().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(server.state(), ServerState::Draining);
        assert_eq!(server.shutdown().await, ShutdownOutcome::InProgress);
        assert!(draining.await.unwrap().is_forced());
        assert_eq!(server.stopped().await, ServerState::Stopped { forced: true });
    }

    #[tokio::test]
    async fn test_shutdown_within_caps_grace_period() {
        let server = server(vec![
            with_grace_period(Duration::from_secs(30)),
            with_transport_option(|s: &mut HoldSettings| s.ignore_drain = true),
        ]);
        server.start().await.unwrap();
        let _client = connect(&server).await;

        let started = Instant::now();
        let outcome = server.shutdown_within(Duration::from_millis(100)).await;
        assert!(outcome.is_forced());
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_draining_refuses_new_connections() {
        let server = server(Vec::new());
        let addr = server.start().await.unwrap().as_tcp().unwrap();
        server.shutdown().await;

        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_run_until_signal() {
        let server = server(Vec::new());
        let outcome = server
            .run_until(tokio::time::sleep(Duration::from_millis(20)))
            .await
            .unwrap();
        assert_eq!(outcome, ShutdownOutcome::Clean);
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ServerState::Stopped { forced: true }.to_string(), "stopped (forced)");
        assert_eq!(ServerState::FailedToStart.to_string(), "failed to start");
        assert!(ServerState::FailedToStart.is_terminal());
        assert!(!ServerState::Draining.is_terminal());
    }
}

//! The HTTP/1.1 server flavour.
//!
//! Routes are contributed through attach callbacks and wrapped in the
//! configured middleware chain:
//!
//! ```no_run
//! use http::{Method, StatusCode};
//! use keel_core::{with_grace_period, with_listen};
//! use keel_middleware::{RequestError, RequestIdInterceptor};
//! use keel_server::http::{text, with_middleware, with_route, HttpServer};
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), keel_server::ServerError> {
//! let server = HttpServer::new([
//!     with_listen(":8080"),
//!     with_grace_period(Duration::from_secs(10)),
//!     with_middleware(RequestIdInterceptor::new()),
//!     with_route(Method::GET, "/hello", |_req, _params| async {
//!         Ok::<_, RequestError>(text(StatusCode::OK, "hello"))
//!     }),
//! ])?;
//!
//! server.start().await?;
//! # Ok(())
//! # }
//! ```

mod ops;
mod router;

pub use ops::{with_log_control, with_metrics, with_profiler, with_prober, PROBE_TIMEOUT};
pub use router::{HttpHandler, Resolution, RouteParams, Router};

use crate::error::ServerResult;
use crate::health::Prober;
use crate::lifecycle::Server;
use crate::listener::BoxedIo;
use crate::shutdown::ShutdownSignal;
use crate::transport::Transport;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use keel_core::{
    with_attach, with_transport_option, Alpn, Flavor, RegistrationConflict, ServerOption,
    ServerOptions,
};
use keel_middleware::{
    BoxFuture, Chain, Interceptor, InterceptorContext, Request, RequestError, Response,
};
use serde::Serialize;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Default cap on a buffered request body.
pub const DEFAULT_MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

/// Marker for the HTTP option flavour.
#[derive(Debug, Clone, Copy, Default)]
pub struct Http;

impl Flavor for Http {
    type Interceptors = Chain<Request, Response>;
    type Registrar = HttpRegistrar;
    type Settings = HttpSettings;
}

/// An option for an [`HttpServer`].
pub type HttpOption = ServerOption<Http>;

/// A server speaking HTTP/1.1.
pub type HttpServer = Server<HttpTransport>;

/// Raw HTTP/1 connection settings, adjusted with [`with_http_settings`].
#[derive(Debug, Clone)]
pub struct HttpSettings {
    /// Whether connections are kept alive between requests.
    pub keep_alive: bool,
    /// Whether a half-closed connection may still be written to.
    pub half_close: bool,
    /// Maximum connection read buffer, hyper's default when unset.
    pub max_buf_size: Option<usize>,
    /// Timeout for reading request headers, none when unset.
    pub header_read_timeout: Option<Duration>,
    /// Requests with a larger body are rejected with 413.
    pub max_body_bytes: usize,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            keep_alive: true,
            half_close: false,
            max_buf_size: None,
            header_read_timeout: None,
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Target of HTTP attach callbacks.
#[derive(Debug, Default)]
pub struct HttpRegistrar {
    router: Router,
    prober: Option<Prober>,
}

impl HttpRegistrar {
    /// Registers a route. A second route with the same method and shape conflicts.
    pub fn route<H, Fut>(
        &mut self,
        method: Method,
        pattern: &str,
        handler: H,
    ) -> Result<(), RegistrationConflict>
    where
        H: Fn(Request, RouteParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, RequestError>> + Send + 'static,
    {
        self.router.add(method, pattern, handler)
    }

    /// Registers a `GET` route.
    pub fn get<H, Fut>(&mut self, pattern: &str, handler: H) -> Result<(), RegistrationConflict>
    where
        H: Fn(Request, RouteParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, RequestError>> + Send + 'static,
    {
        self.route(Method::GET, pattern, handler)
    }

    /// Registers a `PUT` route.
    pub fn put<H, Fut>(&mut self, pattern: &str, handler: H) -> Result<(), RegistrationConflict>
    where
        H: Fn(Request, RouteParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, RequestError>> + Send + 'static,
    {
        self.route(Method::PUT, pattern, handler)
    }

    /// Registers a `POST` route.
    pub fn post<H, Fut>(&mut self, pattern: &str, handler: H) -> Result<(), RegistrationConflict>
    where
        H: Fn(Request, RouteParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, RequestError>> + Send + 'static,
    {
        self.route(Method::POST, pattern, handler)
    }

    /// Sets the prober that is flipped to not-ready when the server drains.
    ///
    /// Only one prober can be attached to a server.
    pub fn set_prober(&mut self, prober: Prober) -> Result<(), RegistrationConflict> {
        if self.prober.is_some() {
            return Err(RegistrationConflict::new("prober", "readiness"));
        }
        self.prober = Some(prober);
        Ok(())
    }

    /// Returns the routing table built so far.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }
}

/// Appends a middleware. The first one appended runs outermost.
pub fn with_middleware<I>(interceptor: I) -> HttpOption
where
    I: Interceptor<Request, Response>,
{
    let interceptor: Arc<dyn Interceptor<Request, Response>> = Arc::new(interceptor);
    ServerOption::new(move |o: &mut ServerOptions<Http>| {
        o.interceptors_mut().push(Arc::clone(&interceptor));
    })
}

/// Registers a single route at construction.
pub fn with_route<H, Fut>(method: Method, pattern: impl Into<String>, handler: H) -> HttpOption
where
    H: Fn(Request, RouteParams) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, RequestError>> + Send + 'static,
{
    let pattern = pattern.into();
    let handler: HttpHandler = Arc::new(
        move |request, params| -> BoxFuture<'static, Result<Response, RequestError>> {
            Box::pin(handler(request, params))
        },
    );
    with_attach(move |registrar: &mut HttpRegistrar| {
        registrar
            .router
            .add_handler(method.clone(), &pattern, Arc::clone(&handler))
    })
}

/// Adjusts the raw HTTP/1 connection settings.
pub fn with_http_settings<T>(tweak: T) -> HttpOption
where
    T: Fn(&mut HttpSettings) + Send + Sync + 'static,
{
    with_transport_option(tweak)
}

/// Builds a response with a plain text body.
pub fn text(status: StatusCode, body: impl Into<String>) -> Response {
    respond(status, "text/plain; charset=utf-8", Bytes::from(body.into()))
}

/// Builds a response with a JSON body.
pub fn json<T: Serialize>(status: StatusCode, value: &T) -> Result<Response, RequestError> {
    let body = serde_json::to_vec(value).map_err(|e| RequestError::internal(e.to_string()))?;
    Ok(respond(status, "application/json", Bytes::from(body)))
}

fn respond(status: StatusCode, content_type: &'static str, body: Bytes) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

/// Request handling state of an [`HttpServer`].
#[derive(Debug)]
pub struct HttpTransport {
    service: String,
    router: Router,
    chain: Chain<Request, Response>,
    settings: HttpSettings,
    prober: Option<Prober>,
}

impl HttpTransport {
    /// Returns the routing table.
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Returns the middleware names in invocation order.
    #[must_use]
    pub fn middleware(&self) -> Vec<&'static str> {
        self.chain.names()
    }

    async fn handle(
        &self,
        request: hyper::Request<Incoming>,
        peer: Option<SocketAddr>,
    ) -> hyper::Response<Full<Bytes>> {
        let (parts, body) = request.into_parts();
        let body = match Limited::new(body, self.settings.max_body_bytes).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                let error = if e.downcast_ref::<LengthLimitError>().is_some() {
                    RequestError::from_status(StatusCode::PAYLOAD_TOO_LARGE, "request body too large")
                } else {
                    RequestError::bad_request(format!("failed to read request body: {e}"))
                };
                return error.into_response().map(Full::new);
            }
        };
        let request = Request::from_parts(parts, body);

        let mut ctx = InterceptorContext::new();
        ctx.set_service(&self.service);
        if let Some(peer) = peer {
            ctx.set_peer_addr(peer);
        }

        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let result = match self.router.resolve(&method, &path) {
            Resolution::Matched {
                pattern,
                params,
                handler,
            } => {
                ctx.set_operation(pattern);
                self.chain
                    .run(&mut ctx, request, move |_ctx, request| handler(request, params))
                    .await
            }
            Resolution::MethodNotAllowed => {
                self.chain
                    .run(&mut ctx, request, |_ctx, _request| {
                        Box::pin(async { Err::<Response, _>(RequestError::method_not_allowed("method not allowed")) })
                    })
                    .await
            }
            Resolution::NotFound => {
                self.chain
                    .run(&mut ctx, request, |_ctx, _request| {
                        Box::pin(async { Err::<Response, _>(RequestError::not_found("not found")) })
                    })
                    .await
            }
        };

        let response = result.unwrap_or_else(|error| {
            debug!(
                method = %method,
                path = %path,
                status = error.status().as_u16(),
                error = %error,
                "request failed"
            );
            error.into_response()
        });
        response.map(Full::new)
    }
}

impl Transport for HttpTransport {
    type Flavor = Http;
    const ALPN: Alpn = Alpn::Http1;
    const PROTOCOL: &'static str = "http";

    fn build(options: &ServerOptions<Http>) -> ServerResult<Self> {
        let mut registrar = HttpRegistrar::default();
        options.attach_all(&mut registrar)?;

        Ok(Self {
            service: options.service_name().to_string(),
            router: registrar.router,
            chain: options.interceptors().clone(),
            settings: options.transport_settings(),
            prober: registrar.prober,
        })
    }

    fn serve_connection(
        self: Arc<Self>,
        io: BoxedIo,
        peer: Option<SocketAddr>,
        drain: ShutdownSignal,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let mut builder = http1::Builder::new();
            builder
                .keep_alive(self.settings.keep_alive)
                .half_close(self.settings.half_close);
            if let Some(max) = self.settings.max_buf_size {
                builder.max_buf_size(max);
            }
            if let Some(timeout) = self.settings.header_read_timeout {
                builder
                    .timer(hyper_util::rt::TokioTimer::new())
                    .header_read_timeout(timeout);
            }

            let transport = Arc::clone(&self);
            let service = service_fn(move |request| {
                let transport = Arc::clone(&transport);
                async move { Ok::<_, Infallible>(transport.handle(request, peer).await) }
            });

            let conn = builder.serve_connection(TokioIo::new(io), service);
            tokio::pin!(conn);

            let result = tokio::select! {
                result = conn.as_mut() => result,
                () = drain.recv() => {
                    conn.as_mut().graceful_shutdown();
                    conn.await
                }
            };
            if let Err(e) = result {
                debug!(peer = ?peer, error = %e, "http connection error");
            }
        })
    }

    fn on_drain(&self) {
        if let Some(prober) = &self.prober {
            prober.not_ready("server is draining");
        }
    }
}

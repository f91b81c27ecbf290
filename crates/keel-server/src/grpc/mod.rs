//! The gRPC server flavour.
//!
//! Services are registered as raw `/package.Service/Method` handlers over
//! length-prefixed frames; message encoding is left to the handlers.
//!
//! ```no_run
//! use keel_core::with_listen;
//! use keel_middleware::{RequestError, UnaryResponse};
//! use keel_server::grpc::{with_service, with_tracing, GrpcServer, GrpcService};
//!
//! # async fn run() -> Result<(), keel_server::ServerError> {
//! let echo = GrpcService::new("demo.Echo").unary("Say", |request| async move {
//!     Ok::<_, RequestError>(UnaryResponse::new(request.message))
//! });
//!
//! let server = GrpcServer::new([with_listen(":9090"), with_tracing(), with_service(echo)])?;
//! server.start().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Failures are reported the gRPC way: an HTTP 200 response whose
//! `grpc-status` trailer (or header, for trailers-only responses) carries
//! the code.

pub mod codec;
mod service;

pub use service::{GrpcRegistrar, GrpcService, MethodHandler, StreamHandler, UnaryHandler};

use crate::error::ServerResult;
use crate::health::Prober;
use crate::lifecycle::Server;
use crate::listener::BoxedIo;
use crate::shutdown::ShutdownSignal;
use crate::transport::Transport;
use bytes::Bytes;
use codec::{decode_stream, decode_unary, encode, status_headers, DEFAULT_MAX_MESSAGE_BYTES, PREFIX_LEN};
use futures_util::StreamExt;
use http::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use http::{Method, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, LengthLimitError, Limited, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use keel_core::{
    combine, with_attach, with_transport_option, Alpn, Flavor, ServerOption, ServerOptions,
};
use keel_middleware::{
    BoxFuture, Chain, GrpcCode, Interceptor, InterceptorContext, MessageStream, RequestError,
    StreamRequest, StreamResponse, TracingInterceptor, UnaryRequest, UnaryResponse,
};
use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const GRPC_CONTENT_TYPE: &str = "application/grpc";

/// Response body of every gRPC reply.
pub type GrpcBody = UnsyncBoxBody<Bytes, Infallible>;

/// Marker for the gRPC option flavour.
#[derive(Debug, Clone, Copy, Default)]
pub struct Grpc;

impl Flavor for Grpc {
    type Interceptors = GrpcInterceptors;
    type Registrar = GrpcRegistrar;
    type Settings = GrpcSettings;
}

/// An option for a [`GrpcServer`].
pub type GrpcOption = ServerOption<Grpc>;

/// A server speaking gRPC over HTTP/2.
pub type GrpcServer = Server<GrpcTransport>;

/// The two interceptor chains of a gRPC server.
#[derive(Debug, Clone, Default)]
pub struct GrpcInterceptors {
    /// Interceptors around unary calls.
    pub unary: Chain<UnaryRequest, UnaryResponse>,
    /// Interceptors around streaming calls.
    pub stream: Chain<StreamRequest, StreamResponse>,
}

/// Raw HTTP/2 connection settings, adjusted with [`with_grpc_settings`].
///
/// `None` leaves hyper's default in place.
#[derive(Debug, Clone)]
pub struct GrpcSettings {
    /// Concurrent streams a client may open on one connection.
    pub max_concurrent_streams: Option<u32>,
    /// Initial HTTP/2 stream flow control window.
    pub initial_stream_window_size: Option<u32>,
    /// Initial HTTP/2 connection flow control window.
    pub initial_connection_window_size: Option<u32>,
    /// Largest frame payload the server accepts.
    pub max_frame_size: Option<u32>,
    /// Interval between HTTP/2 pings, disabled when unset.
    pub keep_alive_interval: Option<Duration>,
    /// How long to wait for a ping acknowledgement.
    pub keep_alive_timeout: Duration,
    /// Inbound messages larger than this fail with `RESOURCE_EXHAUSTED`.
    pub max_message_bytes: usize,
}

impl Default for GrpcSettings {
    fn default() -> Self {
        Self {
            max_concurrent_streams: None,
            initial_stream_window_size: None,
            initial_connection_window_size: None,
            max_frame_size: None,
            keep_alive_interval: None,
            keep_alive_timeout: Duration::from_secs(20),
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

/// Appends a unary interceptor. The first one appended runs outermost.
pub fn with_unary_interceptor<I>(interceptor: I) -> GrpcOption
where
    I: Interceptor<UnaryRequest, UnaryResponse>,
{
    let interceptor: Arc<dyn Interceptor<UnaryRequest, UnaryResponse>> = Arc::new(interceptor);
    ServerOption::new(move |o: &mut ServerOptions<Grpc>| {
        o.interceptors_mut().unary.push(Arc::clone(&interceptor));
    })
}

/// Appends a stream interceptor. The first one appended runs outermost.
pub fn with_stream_interceptor<I>(interceptor: I) -> GrpcOption
where
    I: Interceptor<StreamRequest, StreamResponse>,
{
    let interceptor: Arc<dyn Interceptor<StreamRequest, StreamResponse>> = Arc::new(interceptor);
    ServerOption::new(move |o: &mut ServerOptions<Grpc>| {
        o.interceptors_mut().stream.push(Arc::clone(&interceptor));
    })
}

/// Traces both unary and streaming calls.
pub fn with_tracing() -> GrpcOption {
    combine([
        with_unary_interceptor(TracingInterceptor::new()),
        with_stream_interceptor(TracingInterceptor::new()),
    ])
}

/// Registers a service at construction.
pub fn with_service(service: GrpcService) -> GrpcOption {
    with_attach(move |registrar: &mut GrpcRegistrar| registrar.add_service(service.clone()))
}

/// Flips `prober` to not-ready when the server starts draining.
///
/// gRPC servers expose no probe endpoint of their own; pair this with an
/// HTTP ops server serving the same prober.
pub fn with_grpc_prober(prober: Prober) -> GrpcOption {
    with_attach(move |registrar: &mut GrpcRegistrar| registrar.set_prober(prober.clone()))
}

/// Adjusts the raw HTTP/2 connection settings.
pub fn with_grpc_settings<T>(tweak: T) -> GrpcOption
where
    T: Fn(&mut GrpcSettings) + Send + Sync + 'static,
{
    with_transport_option(tweak)
}

fn grpc_response(metadata: HeaderMap, body: GrpcBody) -> hyper::Response<GrpcBody> {
    let mut response = hyper::Response::new(body);
    *response.headers_mut() = metadata;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(GRPC_CONTENT_TYPE));
    response
}

/// A trailers-only reply carrying `error`.
fn error_response(error: &RequestError) -> hyper::Response<GrpcBody> {
    let mut response = grpc_response(HeaderMap::new(), Empty::new().boxed_unsync());
    response
        .headers_mut()
        .extend(status_headers(error.grpc_code(), error.message()));
    response
}

fn unary_body(message: &[u8]) -> GrpcBody {
    let frames = [
        Ok::<_, Infallible>(Frame::data(encode(message))),
        Ok(Frame::trailers(status_headers(GrpcCode::Ok, ""))),
    ];
    StreamBody::new(futures_util::stream::iter(frames)).boxed_unsync()
}

/// Frames outbound messages, closing with a status trailer. An error ends
/// the stream with that error's status.
fn stream_body(messages: MessageStream) -> GrpcBody {
    let frames = futures_util::stream::unfold(Some(messages), |state| async move {
        let mut messages = state?;
        let frame = match messages.next().await {
            Some(Ok(message)) => return Some((Ok(Frame::data(encode(&message))), Some(messages))),
            Some(Err(e)) => Frame::trailers(status_headers(e.grpc_code(), e.message())),
            None => Frame::trailers(status_headers(GrpcCode::Ok, "")),
        };
        Some((Ok::<_, Infallible>(frame), None))
    });
    StreamBody::new(frames).boxed_unsync()
}

/// Request handling state of a [`GrpcServer`].
#[derive(Debug)]
pub struct GrpcTransport {
    service: String,
    methods: BTreeMap<String, MethodHandler>,
    services: Vec<String>,
    interceptors: GrpcInterceptors,
    settings: GrpcSettings,
    prober: Option<Prober>,
}

impl GrpcTransport {
    /// Returns the registered service names in registration order.
    #[must_use]
    pub fn services(&self) -> &[String] {
        &self.services
    }

    /// Returns every registered method path.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }

    /// Returns the unary and stream interceptor names in invocation order.
    #[must_use]
    pub fn interceptors(&self) -> (Vec<&'static str>, Vec<&'static str>) {
        (self.interceptors.unary.names(), self.interceptors.stream.names())
    }

    async fn handle(
        &self,
        request: hyper::Request<Incoming>,
        peer: Option<SocketAddr>,
    ) -> hyper::Response<GrpcBody> {
        let is_grpc = request
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with(GRPC_CONTENT_TYPE));
        if request.method() != Method::POST || !is_grpc {
            let mut response = hyper::Response::new(Empty::new().boxed_unsync());
            *response.status_mut() = StatusCode::UNSUPPORTED_MEDIA_TYPE;
            return response;
        }

        let method = request.uri().path().to_string();
        let Some(handler) = self.methods.get(&method).cloned() else {
            return error_response(&RequestError::from_grpc(
                GrpcCode::Unimplemented,
                format!("unknown method {method}"),
            ));
        };

        let mut ctx = InterceptorContext::new();
        ctx.set_service(&self.service);
        ctx.set_operation(&method);
        if let Some(peer) = peer {
            ctx.set_peer_addr(peer);
        }

        let (parts, body) = request.into_parts();
        let result = match handler {
            MethodHandler::Unary(handler) => {
                self.unary(&mut ctx, method.clone(), parts.headers, body, handler)
                    .await
            }
            MethodHandler::Streaming(handler) => {
                let request = StreamRequest {
                    method: method.clone(),
                    metadata: parts.headers,
                    messages: decode_stream(body, self.settings.max_message_bytes),
                };
                self.interceptors
                    .stream
                    .run(&mut ctx, request, move |_ctx, request| handler(request))
                    .await
                    .map(|response| grpc_response(response.metadata, stream_body(response.messages)))
            }
        };

        result.unwrap_or_else(|error| {
            debug!(
                method = %method,
                code = %error.grpc_code(),
                error = %error,
                "grpc call failed"
            );
            error_response(&error)
        })
    }

    async fn unary(
        &self,
        ctx: &mut InterceptorContext,
        method: String,
        metadata: HeaderMap,
        body: Incoming,
        handler: UnaryHandler,
    ) -> Result<hyper::Response<GrpcBody>, RequestError> {
        let max = self.settings.max_message_bytes;
        let body = match Limited::new(body, max.saturating_add(PREFIX_LEN)).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
                return Err(RequestError::from_grpc(
                    GrpcCode::ResourceExhausted,
                    format!("message exceeds the {max} byte limit"),
                ));
            }
            Err(e) => {
                return Err(RequestError::from_grpc(GrpcCode::Cancelled, e.to_string()));
            }
        };

        let request = UnaryRequest {
            method,
            metadata,
            message: decode_unary(&body, max)?,
        };
        let response = self
            .interceptors
            .unary
            .run(ctx, request, move |_ctx, request| handler(request))
            .await?;
        Ok(grpc_response(response.metadata, unary_body(&response.message)))
    }
}

impl Transport for GrpcTransport {
    type Flavor = Grpc;
    const ALPN: Alpn = Alpn::Http2;
    const PROTOCOL: &'static str = "grpc";

    fn build(options: &ServerOptions<Grpc>) -> ServerResult<Self> {
        let mut registrar = GrpcRegistrar::default();
        options.attach_all(&mut registrar)?;
        let (methods, services, prober) = registrar.into_parts();

        Ok(Self {
            service: options.service_name().to_string(),
            methods,
            services,
            interceptors: options.interceptors().clone(),
            settings: options.transport_settings(),
            prober,
        })
    }

    fn serve_connection(
        self: Arc<Self>,
        io: BoxedIo,
        peer: Option<SocketAddr>,
        drain: ShutdownSignal,
    ) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let settings = &self.settings;
            let mut builder = http2::Builder::new(TokioExecutor::new());
            builder
                .timer(TokioTimer::new())
                .max_concurrent_streams(settings.max_concurrent_streams)
                .initial_stream_window_size(settings.initial_stream_window_size)
                .initial_connection_window_size(settings.initial_connection_window_size)
                .max_frame_size(settings.max_frame_size)
                .keep_alive_interval(settings.keep_alive_interval)
                .keep_alive_timeout(settings.keep_alive_timeout);

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
                debug!(peer = ?peer, error = %e, "grpc connection error");
            }
        })
    }

    fn on_drain(&self) {
        if let Some(prober) = &self.prober {
            prober.not_ready("server is draining");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::with_listen;
    use keel_middleware::{from_fn, RequestIdInterceptor};

    fn echo() -> GrpcService {
        GrpcService::new("demo.Echo")
            .unary("Say", |request: UnaryRequest| async move {
                Ok::<_, RequestError>(UnaryResponse::new(request.message))
            })
            .streaming("Chat", |request: StreamRequest| async move {
                Ok::<_, RequestError>(StreamResponse::new(request.messages))
            })
    }

    fn build(options: Vec<GrpcOption>) -> ServerResult<GrpcTransport> {
        let mut all = vec![with_listen("127.0.0.1:0")];
        all.extend(options);
        GrpcTransport::build(&ServerOptions::<Grpc>::from_options(all))
    }

    #[test]
    fn test_with_tracing_adds_both_chains() {
        let transport = build(vec![with_tracing()]).unwrap();
        let (unary, stream) = transport.interceptors();
        assert_eq!(unary.len(), 1);
        assert_eq!(stream.len(), 1);
    }

    #[test]
    fn test_interceptor_order_is_preserved() {
        let transport = build(vec![
            with_unary_interceptor(RequestIdInterceptor::new()),
            with_unary_interceptor(from_fn::<UnaryRequest, UnaryResponse, _>(
                "audit",
                |ctx, request, next| Box::pin(next.run(ctx, request)),
            )),
        ])
        .unwrap();
        let (unary, stream) = transport.interceptors();
        assert_eq!(unary, vec!["request_id", "audit"]);
        assert!(stream.is_empty());
    }

    #[test]
    fn test_services_are_registered() {
        let transport = build(vec![with_service(echo())]).unwrap();
        assert_eq!(transport.services(), ["demo.Echo".to_string()]);
        assert_eq!(
            transport.methods().collect::<Vec<_>>(),
            vec!["/demo.Echo/Chat", "/demo.Echo/Say"]
        );
    }

    #[test]
    fn test_duplicate_service_fails_construction() {
        assert!(build(vec![with_service(echo()), with_service(echo())]).is_err());
    }

    #[test]
    fn test_settings_tweaks_apply_in_order() {
        let transport = build(vec![
            with_grpc_settings(|s| s.max_concurrent_streams = Some(10)),
            with_grpc_settings(|s| s.max_concurrent_streams = Some(20)),
        ])
        .unwrap();
        assert_eq!(transport.settings.max_concurrent_streams, Some(20));
        assert_eq!(transport.settings.max_message_bytes, DEFAULT_MAX_MESSAGE_BYTES);
    }

    #[test]
    fn test_drain_flips_readiness() {
        let prober = Prober::new();
        prober.ready();
        let transport = build(vec![with_grpc_prober(prober.clone())]).unwrap();

        transport.on_drain();
        assert!(!prober.check(crate::health::READINESS_PROBE).unwrap().healthy);
    }

    #[test]
    fn test_error_response_is_trailers_only() {
        let response = error_response(&RequestError::from_grpc(GrpcCode::NotFound, "missing"));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["grpc-status"], "5");
        assert_eq!(response.headers()["grpc-message"], "missing");
        assert_eq!(response.headers()[CONTENT_TYPE], GRPC_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_stream_body_ends_with_error_status() {
        let messages: MessageStream = Box::pin(futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"a")),
            Err(RequestError::from_grpc(GrpcCode::Aborted, "stop")),
            Ok(Bytes::from_static(b"never")),
        ]));

        let mut body = stream_body(messages);
        let first = body.frame().await.unwrap().unwrap();
        assert_eq!(first.into_data().unwrap(), encode(b"a"));

        let trailers = body.frame().await.unwrap().unwrap().into_trailers().unwrap();
        assert_eq!(trailers["grpc-status"], "10");
        assert!(body.frame().await.is_none());
    }
}

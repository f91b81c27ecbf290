//! Request and response types seen by interceptors.

use crate::error::RequestError;
use bytes::Bytes;
use futures_util::Stream;
use http::{HeaderMap, StatusCode};
use std::fmt;
use std::pin::Pin;

/// HTTP request with a fully buffered body.
pub type Request = http::Request<Bytes>;

/// HTTP response with a fully buffered body.
pub type Response = http::Response<Bytes>;

/// Stream of length-delimited gRPC messages.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<Bytes, RequestError>> + Send>>;

/// A unary gRPC call.
#[derive(Debug, Clone)]
pub struct UnaryRequest {
    /// Full method path, `/package.Service/Method`.
    pub method: String,
    /// Request metadata (HTTP/2 headers).
    pub metadata: HeaderMap,
    /// The single request message.
    pub message: Bytes,
}

/// The reply to a unary gRPC call.
#[derive(Debug, Clone, Default)]
pub struct UnaryResponse {
    /// Response metadata sent as headers.
    pub metadata: HeaderMap,
    /// The single response message.
    pub message: Bytes,
}

impl UnaryResponse {
    /// Creates a response carrying `message` and no metadata.
    #[must_use]
    pub fn new(message: impl Into<Bytes>) -> Self {
        Self {
            metadata: HeaderMap::new(),
            message: message.into(),
        }
    }
}

/// A streaming gRPC call.
pub struct StreamRequest {
    /// Full method path, `/package.Service/Method`.
    pub method: String,
    /// Request metadata (HTTP/2 headers).
    pub metadata: HeaderMap,
    /// Inbound messages.
    pub messages: MessageStream,
}

impl fmt::Debug for StreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamRequest")
            .field("method", &self.method)
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// The reply to a streaming gRPC call.
pub struct StreamResponse {
    /// Response metadata sent as headers.
    pub metadata: HeaderMap,
    /// Outbound messages.
    pub messages: MessageStream,
}

impl StreamResponse {
    /// Creates a response from an outbound message stream.
    pub fn new<S>(messages: S) -> Self
    where
        S: Stream<Item = Result<Bytes, RequestError>> + Send + 'static,
    {
        Self {
            metadata: HeaderMap::new(),
            messages: Box::pin(messages),
        }
    }
}

impl fmt::Debug for StreamResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamResponse")
            .field("metadata", &self.metadata)
            .finish_non_exhaustive()
    }
}

/// What interceptors can read from any request flavour.
pub trait RequestInfo: Send + 'static {
    /// Short name of the request flavour, used as a metric label.
    const KIND: &'static str;

    /// Path for HTTP requests, full method for gRPC calls.
    fn target(&self) -> &str;

    /// Request headers or metadata.
    fn headers(&self) -> &HeaderMap;
}

/// What interceptors can read from and add to any response flavour.
pub trait ResponseInfo: Send + 'static {
    /// HTTP status the response will be sent with.
    fn status(&self) -> StatusCode;

    /// Response headers or metadata.
    fn headers_mut(&mut self) -> &mut HeaderMap;
}

impl RequestInfo for Request {
    const KIND: &'static str = "http";

    fn target(&self) -> &str {
        self.uri().path()
    }

    fn headers(&self) -> &HeaderMap {
        self.headers()
    }
}

impl ResponseInfo for Response {
    fn status(&self) -> StatusCode {
        self.status()
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.headers_mut()
    }
}

impl RequestInfo for UnaryRequest {
    const KIND: &'static str = "grpc_unary";

    fn target(&self) -> &str {
        &self.method
    }

    fn headers(&self) -> &HeaderMap {
        &self.metadata
    }
}

impl ResponseInfo for UnaryResponse {
    fn status(&self) -> StatusCode {
        StatusCode::OK
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.metadata
    }
}

impl RequestInfo for StreamRequest {
    const KIND: &'static str = "grpc_stream";

    fn target(&self) -> &str {
        &self.method
    }

    fn headers(&self) -> &HeaderMap {
        &self.metadata
    }
}

impl ResponseInfo for StreamResponse {
    fn status(&self) -> StatusCode {
        StatusCode::OK
    }

    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.metadata
    }
}

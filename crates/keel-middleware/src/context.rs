//! Per-request interceptor state.
//!
//! An [`InterceptorContext`] is created by the server for every request (or
//! every gRPC call) and threaded through the whole chain, so the ids an
//! interceptor assigns are visible to the ones after it and to the handler.

use std::net::SocketAddr;
use uuid::Uuid;

/// State carried through an interceptor chain.
#[derive(Debug)]
pub struct InterceptorContext {
    request_id: String,

    trace_id: Option<String>,

    span_id: Option<String>,

    /// Route pattern or gRPC method the request was matched to.
    operation: Option<String>,

    service: Option<String>,

    peer_addr: Option<SocketAddr>,
}

impl InterceptorContext {
    /// Creates a context with a fresh UUID v7 request id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            request_id: Uuid::now_v7().to_string(),
            trace_id: None,
            span_id: None,
            operation: None,
            service: None,
            peer_addr: None,
        }
    }

    /// Returns the request id.
    #[must_use]
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Replaces the request id, e.g. with one propagated by the caller.
    pub fn set_request_id(&mut self, request_id: impl Into<String>) {
        self.request_id = request_id.into();
    }

    /// Returns the trace id, if tracing has run.
    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// Sets the trace id.
    pub fn set_trace_id(&mut self, trace_id: String) {
        self.trace_id = Some(trace_id);
    }

    /// Returns the span id, if tracing has run.
    #[must_use]
    pub fn span_id(&self) -> Option<&str> {
        self.span_id.as_deref()
    }

    /// Sets the span id.
    pub fn set_span_id(&mut self, span_id: String) {
        self.span_id = Some(span_id);
    }

    /// Returns the matched route pattern or gRPC method.
    #[must_use]
    pub fn operation(&self) -> Option<&str> {
        self.operation.as_deref()
    }

    /// Sets the matched operation.
    pub fn set_operation(&mut self, operation: impl Into<String>) {
        self.operation = Some(operation.into());
    }

    /// Returns the name of the server handling the request.
    #[must_use]
    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    /// Sets the name of the server handling the request.
    pub fn set_service(&mut self, service: impl Into<String>) {
        self.service = Some(service.into());
    }

    /// Returns the remote address for TCP connections.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Sets the remote address.
    pub fn set_peer_addr(&mut self, peer_addr: SocketAddr) {
        self.peer_addr = Some(peer_addr);
    }
}

impl Default for InterceptorContext {
    fn default() -> Self {
        Self::new()
    }
}

//! Trace context propagation.
//!
//! Supports the [W3C Trace Context](https://www.w3.org/TR/trace-context/)
//! `traceparent` header. Each request runs inside a `tracing` span carrying
//! the service, request kind, target, request id and trace ids, and the
//! response gets a `traceparent` header naming the span created here.

use crate::context::InterceptorContext;
use crate::error::RequestError;
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::types::{RequestInfo, ResponseInfo};
use http::{HeaderName, HeaderValue};
use tracing::Instrument;
use uuid::Uuid;

/// The W3C Trace Context header for trace propagation.
pub const TRACEPARENT_HEADER: &str = "traceparent";

const SAMPLED: u8 = 0x01;

/// Parsed `traceparent` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
    /// The 128-bit trace id as 32 lowercase hex characters.
    pub trace_id: String,
    /// The caller's span id, when propagated.
    pub parent_span_id: Option<String>,
    /// Trace flags.
    pub flags: u8,
}

impl TraceContext {
    /// Parses a `traceparent` value: `{version}-{trace-id}-{parent-id}-{flags}`.
    pub fn parse(value: &str) -> Option<Self> {
        let parts: Vec<&str> = value.trim().split('-').collect();
        if parts.len() != 4 || parts[0] != "00" {
            return None;
        }

        let is_hex = |s: &str, len: usize| s.len() == len && s.chars().all(|c| c.is_ascii_hexdigit());

        let (trace_id, parent_span_id, flags) = (parts[1], parts[2], parts[3]);
        if !is_hex(trace_id, 32) || !is_hex(parent_span_id, 16) || !is_hex(flags, 2) {
            return None;
        }
        // all-zero ids are invalid
        if trace_id.bytes().all(|b| b == b'0') || parent_span_id.bytes().all(|b| b == b'0') {
            return None;
        }

        Some(Self {
            trace_id: trace_id.to_ascii_lowercase(),
            parent_span_id: Some(parent_span_id.to_ascii_lowercase()),
            flags: u8::from_str_radix(flags, 16).ok()?,
        })
    }

    /// Starts a new trace.
    #[must_use]
    pub fn root() -> Self {
        Self {
            trace_id: Uuid::now_v7().simple().to_string(),
            parent_span_id: None,
            flags: SAMPLED,
        }
    }

    /// Formats a `traceparent` value for `span_id` within this trace.
    #[must_use]
    pub fn header_value(&self, span_id: &str) -> String {
        format!("00-{}-{}-{:02x}", self.trace_id, span_id, self.flags)
    }
}

/// Creates a span per request and propagates trace context.
#[derive(Debug, Clone, Default)]
pub struct TracingInterceptor;

impl TracingInterceptor {
    /// Creates the interceptor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// 64 bits taken from the random tail of a UUID v7.
    fn new_span_id() -> String {
        Uuid::now_v7().simple().to_string()[16..].to_string()
    }
}

impl<Req, Resp> Interceptor<Req, Resp> for TracingInterceptor
where
    Req: RequestInfo,
    Resp: ResponseInfo,
{
    fn name(&self) -> &'static str {
        "tracing"
    }

    fn intercept<'a>(
        &'a self,
        ctx: &'a mut InterceptorContext,
        request: Req,
        next: Next<'a, Req, Resp>,
    ) -> BoxFuture<'a, Result<Resp, RequestError>> {
        Box::pin(async move {
            let trace = request
                .headers()
                .get(TRACEPARENT_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(TraceContext::parse)
                .unwrap_or_else(TraceContext::root);
            let span_id = Self::new_span_id();

            ctx.set_trace_id(trace.trace_id.clone());
            ctx.set_span_id(span_id.clone());

            let span = tracing::info_span!(
                "request",
                service = ctx.service().unwrap_or("unknown"),
                kind = Req::KIND,
                target = request.target(),
                request_id = ctx.request_id(),
                trace_id = %trace.trace_id,
                span_id = %span_id,
                parent_span_id = trace.parent_span_id.as_deref().unwrap_or(""),
            );

            let result = next.run(ctx, request).instrument(span.clone()).await;

            let _entered = span.enter();
            match result {
                Ok(mut response) => {
                    tracing::debug!(status = response.status().as_u16(), "request completed");
                    if let Ok(value) = HeaderValue::from_str(&trace.header_value(&span_id)) {
                        response
                            .headers_mut()
                            .insert(HeaderName::from_static(TRACEPARENT_HEADER), value);
                    }
                    Ok(response)
                }
                Err(err) => {
                    tracing::debug!(status = err.status().as_u16(), error = %err, "request failed");
                    Err(err)
                }
            }
        })
    }
}

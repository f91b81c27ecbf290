//! Built-in interceptors.
//!
//! Each one is generic over the request flavour, so the same value can be
//! registered as HTTP middleware and as a gRPC unary or stream interceptor.

mod request_id;
mod telemetry;
mod trace;

pub use request_id::{RequestIdInterceptor, REQUEST_ID_HEADER};
pub use telemetry::{
    MetricsInterceptor, REQUESTS_IN_FLIGHT, REQUESTS_TOTAL, REQUEST_DURATION_SECONDS,
};
pub use trace::{TraceContext, TracingInterceptor, TRACEPARENT_HEADER};

//! # Keel Middleware
//!
//! Ordered interceptor chains for Keel servers.
//!
//! An [`Interceptor`] wraps request processing: it receives the request, a
//! mutable [`InterceptorContext`] and the [`Next`] step of the chain, and
//! decides whether and how to continue. A [`Chain`] invokes interceptors in
//! registration order, so the first interceptor registered is the outermost.
//!
//! ```text
//! request → first → second → … → handler
//!                                   ↓
//! result  ← first ← second ← … ←────┘
//! ```
//!
//! Returning `Err(RequestError)` from an interceptor short-circuits the rest
//! of the chain. The error is scoped to that one request.
//!
//! The same trait serves every flavour: HTTP middleware is an
//! `Interceptor<Request, Response>`, gRPC unary interceptors are
//! `Interceptor<UnaryRequest, UnaryResponse>` and gRPC stream interceptors are
//! `Interceptor<StreamRequest, StreamResponse>`.
//!
//! ## Built-in interceptors
//!
//! | Interceptor | Purpose |
//! |-------------|---------|
//! | [`RequestIdInterceptor`] | Generate or propagate `x-request-id` (UUID v7) |
//! | [`TracingInterceptor`] | W3C `traceparent` propagation and a span per request |
//! | [`MetricsInterceptor`] | Request counter, latency histogram and in-flight gauge |

#![doc(html_root_url = "https://docs.rs/keel-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod context;
pub mod error;
pub mod interceptor;
pub mod interceptors;
pub mod types;

pub use context::InterceptorContext;
pub use error::{GrpcCode, RequestError};
pub use interceptor::{from_fn, BoxFuture, Chain, FnInterceptor, Interceptor, Next};
pub use interceptors::{MetricsInterceptor, RequestIdInterceptor, TracingInterceptor};
pub use types::{
    MessageStream, Request, RequestInfo, Response, ResponseInfo, StreamRequest, StreamResponse,
    UnaryRequest, UnaryResponse,
};

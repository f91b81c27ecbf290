//! Request metrics.
//!
//! Records, through the `metrics` facade, for every request:
//!
//! - `keel_requests_total` - counter by service, kind, operation and status
//! - `keel_request_duration_seconds` - latency histogram by service, kind and operation
//! - `keel_requests_in_flight` - gauge of requests currently being processed
//!
//! The operation label is the matched route pattern or gRPC method set by the
//! server, which keeps label cardinality bounded.

use crate::context::InterceptorContext;
use crate::error::RequestError;
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::types::{RequestInfo, ResponseInfo};
use std::time::Instant;

/// Counter of handled requests.
pub const REQUESTS_TOTAL: &str = "keel_requests_total";

/// Histogram of request latency in seconds.
pub const REQUEST_DURATION_SECONDS: &str = "keel_request_duration_seconds";

/// Gauge of requests currently in flight.
pub const REQUESTS_IN_FLIGHT: &str = "keel_requests_in_flight";

const UNMATCHED: &str = "unmatched";

/// Emits request metrics.
#[derive(Debug, Clone, Default)]
pub struct MetricsInterceptor;

impl MetricsInterceptor {
    /// Creates the interceptor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Decrements the in-flight gauge when the request finishes or is dropped.
struct InFlightGuard {
    service: String,
    kind: &'static str,
}

impl InFlightGuard {
    fn new(service: String, kind: &'static str) -> Self {
        metrics::gauge!(REQUESTS_IN_FLIGHT, "service" => service.clone(), "kind" => kind).increment(1.0);
        Self { service, kind }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        metrics::gauge!(REQUESTS_IN_FLIGHT, "service" => self.service.clone(), "kind" => self.kind)
            .decrement(1.0);
    }
}

impl<Req, Resp> Interceptor<Req, Resp> for MetricsInterceptor
where
    Req: RequestInfo,
    Resp: ResponseInfo,
{
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn intercept<'a>(
        &'a self,
        ctx: &'a mut InterceptorContext,
        request: Req,
        next: Next<'a, Req, Resp>,
    ) -> BoxFuture<'a, Result<Resp, RequestError>> {
        Box::pin(async move {
            let service = ctx.service().unwrap_or("unknown").to_string();
            let operation = ctx.operation().unwrap_or(UNMATCHED).to_string();
            let kind = Req::KIND;

            let _in_flight = InFlightGuard::new(service.clone(), kind);
            let started = Instant::now();

            let result = next.run(ctx, request).await;

            let status = match &result {
                Ok(response) => response.status(),
                Err(err) => err.status(),
            };
            metrics::counter!(
                REQUESTS_TOTAL,
                "service" => service.clone(),
                "kind" => kind,
                "operation" => operation.clone(),
                "status" => status.as_u16().to_string(),
            )
            .increment(1);
            metrics::histogram!(
                REQUEST_DURATION_SECONDS,
                "service" => service,
                "kind" => kind,
                "operation" => operation,
            )
            .record(started.elapsed().as_secs_f64());

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::Chain;
    use crate::types::{Request, Response};
    use bytes::Bytes;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use std::sync::Arc;

    fn run_requests(statuses: &[u16]) -> String {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();
            runtime.block_on(async {
                let chain: Chain<Request, Response> =
                    Chain::new().with(Arc::new(MetricsInterceptor::new()));
                for status in statuses {
                    let status = *status;
                    let mut ctx = InterceptorContext::new();
                    ctx.set_service("orders");
                    ctx.set_operation("GET /orders/{id}");
                    let request = http::Request::builder()
                        .uri("/orders/7")
                        .body(Bytes::new())
                        .unwrap();
                    let _ = chain
                        .run(&mut ctx, request, move |_ctx, _req| {
                            Box::pin(async move {
                                if status >= 400 {
                                    Err(RequestError::from_status(
                                        http::StatusCode::from_u16(status).unwrap(),
                                        "failed",
                                    ))
                                } else {
                                    Ok(Response::new(Bytes::new()))
                                }
                            })
                        })
                        .await;
                }
            });
        });

        handle.render()
    }

    #[test]
    fn test_counts_requests_by_status() {
        let rendered = run_requests(&[200, 200, 404]);

        let ok_line = rendered
            .lines()
            .find(|l| l.starts_with(REQUESTS_TOTAL) && l.contains("status=\"200\""))
            .unwrap();
        assert!(ok_line.ends_with(" 2"), "{ok_line}");
        assert!(ok_line.contains("operation=\"GET /orders/{id}\""));
        assert!(ok_line.contains("service=\"orders\""));

        let not_found = rendered
            .lines()
            .find(|l| l.starts_with(REQUESTS_TOTAL) && l.contains("status=\"404\""))
            .unwrap();
        assert!(not_found.ends_with(" 1"), "{not_found}");
    }

    #[test]
    fn test_records_latency_and_settles_in_flight() {
        let rendered = run_requests(&[200]);

        assert!(rendered.contains(REQUEST_DURATION_SECONDS));
        let in_flight = rendered
            .lines()
            .find(|l| l.starts_with(REQUESTS_IN_FLIGHT))
            .unwrap();
        assert!(in_flight.ends_with(" 0"), "{in_flight}");
    }
}

//! Request id propagation.
//!
//! Every request gets a UUID v7 id, stored in the [`InterceptorContext`] and
//! echoed back in the `x-request-id` response header. When the interceptor
//! trusts its callers, a valid incoming `x-request-id` is kept instead.

use crate::context::InterceptorContext;
use crate::error::RequestError;
use crate::interceptor::{BoxFuture, Interceptor, Next};
use crate::types::{RequestInfo, ResponseInfo};
use http::{HeaderName, HeaderValue};
use uuid::Uuid;

/// The header name for request id propagation.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Generates or propagates request ids.
#[derive(Debug, Clone, Default)]
pub struct RequestIdInterceptor {
    /// Keep a valid incoming `x-request-id` instead of generating one.
    trust_incoming: bool,
}

impl RequestIdInterceptor {
    /// Always generates a fresh id.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps valid incoming ids. Use for internal service-to-service traffic.
    #[must_use]
    pub fn trust_incoming() -> Self {
        Self {
            trust_incoming: true,
        }
    }

    fn extract<Req: RequestInfo>(&self, request: &Req) -> Option<String> {
        if !self.trust_incoming {
            return None;
        }

        request
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(|id| id.to_string())
    }
}

impl<Req, Resp> Interceptor<Req, Resp> for RequestIdInterceptor
where
    Req: RequestInfo,
    Resp: ResponseInfo,
{
    fn name(&self) -> &'static str {
        "request_id"
    }

    fn intercept<'a>(
        &'a self,
        ctx: &'a mut InterceptorContext,
        request: Req,
        next: Next<'a, Req, Resp>,
    ) -> BoxFuture<'a, Result<Resp, RequestError>> {
        Box::pin(async move {
            if let Some(id) = self.extract(&request) {
                ctx.set_request_id(id);
            }
            let header_value = HeaderValue::from_str(ctx.request_id()).ok();

            let mut response = next.run(ctx, request).await?;

            if let Some(value) = header_value {
                response
                    .headers_mut()
                    .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interceptor::Chain;
    use crate::types::{Request, Response, UnaryRequest, UnaryResponse};
    use bytes::Bytes;
    use std::sync::Arc;

    fn ok_handler(
        ctx: &mut InterceptorContext,
        _req: Request,
    ) -> BoxFuture<'static, Result<Response, RequestError>> {
        let seen = ctx.request_id().to_string();
        Box::pin(async move { Ok(Response::new(Bytes::from(seen))) })
    }

    fn request_with_id(id: &str) -> Request {
        http::Request::builder()
            .uri("/orders")
            .header(REQUEST_ID_HEADER, id)
            .body(Bytes::new())
            .unwrap()
    }

    #[tokio::test]
    async fn test_generates_id_and_echoes_header() {
        let chain: Chain<Request, Response> =
            Chain::new().with(Arc::new(RequestIdInterceptor::new()));
        let mut ctx = InterceptorContext::new();

        let response = chain
            .run(&mut ctx, request_with_id("not-trusted"), ok_handler)
            .await
            .unwrap();

        let header = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
        assert!(Uuid::parse_str(header).is_ok());
        assert_eq!(response.body().as_ref(), header.as_bytes());
    }

    #[tokio::test]
    async fn test_trusted_id_is_kept() {
        let incoming = Uuid::now_v7().to_string();
        let chain: Chain<Request, Response> =
            Chain::new().with(Arc::new(RequestIdInterceptor::trust_incoming()));
        let mut ctx = InterceptorContext::new();

        let response = chain
            .run(&mut ctx, request_with_id(&incoming), ok_handler)
            .await
            .unwrap();

        assert_eq!(response.headers()[REQUEST_ID_HEADER], incoming.as_str());
        assert_eq!(ctx.request_id(), incoming);
    }

    #[tokio::test]
    async fn test_invalid_trusted_id_is_replaced() {
        let chain: Chain<Request, Response> =
            Chain::new().with(Arc::new(RequestIdInterceptor::trust_incoming()));
        let mut ctx = InterceptorContext::new();
        let original = ctx.request_id().to_string();

        chain
            .run(&mut ctx, request_with_id("definitely-not-a-uuid"), ok_handler)
            .await
            .unwrap();

        assert_eq!(ctx.request_id(), original);
    }

    #[tokio::test]
    async fn test_grpc_metadata() {
        let chain: Chain<UnaryRequest, UnaryResponse> =
            Chain::new().with(Arc::new(RequestIdInterceptor::new()));
        let mut ctx = InterceptorContext::new();
        let request = UnaryRequest {
            method: "/demo.Echo/Say".to_string(),
            metadata: http::HeaderMap::new(),
            message: Bytes::from_static(b"hi"),
        };

        let response = chain
            .run(&mut ctx, request, |_ctx, req| {
                Box::pin(async move { Ok(UnaryResponse::new(req.message)) })
            })
            .await
            .unwrap();

        assert_eq!(response.metadata[REQUEST_ID_HEADER], ctx.request_id());
        assert_eq!(response.message, Bytes::from_static(b"hi"));
    }
}

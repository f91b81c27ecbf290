//! gRPC service registration.

use crate::health::Prober;
use keel_core::RegistrationConflict;
use keel_middleware::{
    BoxFuture, RequestError, StreamRequest, StreamResponse, UnaryRequest, UnaryResponse,
};
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// Handler of a unary method.
pub type UnaryHandler =
    Arc<dyn Fn(UnaryRequest) -> BoxFuture<'static, Result<UnaryResponse, RequestError>> + Send + Sync>;

/// Handler of a streaming method.
pub type StreamHandler = Arc<
    dyn Fn(StreamRequest) -> BoxFuture<'static, Result<StreamResponse, RequestError>> + Send + Sync,
>;

/// A registered method.
#[derive(Clone)]
pub enum MethodHandler {
    /// One request message, one response message.
    Unary(UnaryHandler),
    /// A stream of request messages and a stream of response messages.
    Streaming(StreamHandler),
}

impl fmt::Debug for MethodHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unary(_) => "Unary",
            Self::Streaming(_) => "Streaming",
        })
    }
}

/// A named gRPC service and its methods.
///
/// ```
/// use keel_middleware::{RequestError, UnaryResponse};
/// use keel_server::grpc::GrpcService;
///
/// let echo = GrpcService::new("demo.Echo").unary("Say", |request| async move {
///     Ok::<_, RequestError>(UnaryResponse::new(request.message))
/// });
/// assert_eq!(echo.name(), "demo.Echo");
/// ```
#[derive(Debug, Clone)]
pub struct GrpcService {
    name: String,
    methods: Vec<(String, MethodHandler)>,
}

impl GrpcService {
    /// Starts a service with the fully qualified name `package.Service`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: Vec::new(),
        }
    }

    /// Returns the fully qualified service name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a unary method.
    pub fn unary<H, Fut>(mut self, method: impl Into<String>, handler: H) -> Self
    where
        H: Fn(UnaryRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<UnaryResponse, RequestError>> + Send + 'static,
    {
        let handler: UnaryHandler = Arc::new(
            move |request| -> BoxFuture<'static, Result<UnaryResponse, RequestError>> {
                Box::pin(handler(request))
            },
        );
        self.methods.push((method.into(), MethodHandler::Unary(handler)));
        self
    }

    /// Adds a streaming method.
    pub fn streaming<H, Fut>(mut self, method: impl Into<String>, handler: H) -> Self
    where
        H: Fn(StreamRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StreamResponse, RequestError>> + Send + 'static,
    {
        let handler: StreamHandler = Arc::new(
            move |request| -> BoxFuture<'static, Result<StreamResponse, RequestError>> {
                Box::pin(handler(request))
            },
        );
        self.methods
            .push((method.into(), MethodHandler::Streaming(handler)));
        self
    }
}

/// Target of gRPC attach callbacks.
#[derive(Debug, Default)]
pub struct GrpcRegistrar {
    methods: BTreeMap<String, MethodHandler>,
    services: Vec<String>,
    prober: Option<Prober>,
}

impl GrpcRegistrar {
    /// Registers every method of `service`.
    ///
    /// Fails if a service of the same name, or a method path, is already
    /// registered. Nothing is registered on failure.
    pub fn add_service(&mut self, service: GrpcService) -> Result<(), RegistrationConflict> {
        if self.services.contains(&service.name) {
            return Err(RegistrationConflict::new("service", service.name));
        }

        let mut paths = Vec::with_capacity(service.methods.len());
        for (method, _) in &service.methods {
            let path = format!("/{}/{}", service.name, method);
            if self.methods.contains_key(&path) || paths.contains(&path) {
                return Err(RegistrationConflict::new("method", path));
            }
            paths.push(path);
        }

        for (path, (_, handler)) in paths.into_iter().zip(service.methods) {
            self.methods.insert(path, handler);
        }
        self.services.push(service.name);
        Ok(())
    }

    /// Sets the prober that is flipped to not-ready when the server drains.
    pub fn set_prober(&mut self, prober: Prober) -> Result<(), RegistrationConflict> {
        if self.prober.is_some() {
            return Err(RegistrationConflict::new("prober", "readiness"));
        }
        self.prober = Some(prober);
        Ok(())
    }

    /// Returns the registered service names in registration order.
    #[must_use]
    pub fn services(&self) -> &[String] {
        &self.services
    }

    pub(crate) fn into_parts(self) -> (BTreeMap<String, MethodHandler>, Vec<String>, Option<Prober>) {
        (self.methods, self.services, self.prober)
    }
}

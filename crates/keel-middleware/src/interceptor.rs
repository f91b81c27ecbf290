//! The interceptor trait and chain.
//!
//! # Example
//!
//! ```
//! use keel_middleware::{BoxFuture, Interceptor, InterceptorContext, Next, Request, RequestError, Response};
//!
//! struct RequireAuth;
//!
//! impl Interceptor<Request, Response> for RequireAuth {
//!     fn name(&self) -> &'static str {
//!         "require_auth"
//!     }
//!
//!     fn intercept<'a>(
//!         &'a self,
//!         ctx: &'a mut InterceptorContext,
//!         request: Request,
//!         next: Next<'a, Request, Response>,
//!     ) -> BoxFuture<'a, Result<Response, RequestError>> {
//!         Box::pin(async move {
//!             if !request.headers().contains_key("authorization") {
//!                 return Err(RequestError::unauthorized("missing credentials"));
//!             }
//!             next.run(ctx, request).await
//!         })
//!     }
//! }
//! ```

use crate::context::InterceptorContext;
use crate::error::RequestError;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

/// A boxed future that is `Send`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Terminal step of a chain.
type Terminal<'a, Req, Resp> = Box<
    dyn FnOnce(&mut InterceptorContext, Req) -> BoxFuture<'static, Result<Resp, RequestError>>
        + Send
        + 'a,
>;

/// A request-processing wrapper.
///
/// Implementations must be safe to call concurrently; one instance serves
/// every request of the server it is attached to.
pub trait Interceptor<Req, Resp>: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Processes `request`, usually by calling `next.run(ctx, request)`.
    ///
    /// Returning an error without calling `next` short-circuits the chain.
    fn intercept<'a>(
        &'a self,
        ctx: &'a mut InterceptorContext,
        request: Req,
        next: Next<'a, Req, Resp>,
    ) -> BoxFuture<'a, Result<Resp, RequestError>>;
}

/// The remainder of a chain.
pub struct Next<'a, Req, Resp> {
    inner: NextInner<'a, Req, Resp>,
}

enum NextInner<'a, Req, Resp> {
    Chain {
        interceptor: &'a dyn Interceptor<Req, Resp>,
        next: Box<Next<'a, Req, Resp>>,
    },
    Handler(Terminal<'a, Req, Resp>),
}

impl<'a, Req, Resp> Next<'a, Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub(crate) fn chain(interceptor: &'a dyn Interceptor<Req, Resp>, next: Self) -> Self {
        Self {
            inner: NextInner::Chain {
                interceptor,
                next: Box::new(next),
            },
        }
    }

    /// Creates a terminal step that calls `handler`.
    pub fn handler<H>(handler: H) -> Self
    where
        H: FnOnce(&mut InterceptorContext, Req) -> BoxFuture<'static, Result<Resp, RequestError>>
            + Send
            + 'a,
    {
        Self {
            inner: NextInner::Handler(Box::new(handler)),
        }
    }

    /// Runs the rest of the chain.
    pub async fn run(self, ctx: &mut InterceptorContext, request: Req) -> Result<Resp, RequestError> {
        match self.inner {
            NextInner::Chain { interceptor, next } => {
                interceptor.intercept(ctx, request, *next).await
            }
            NextInner::Handler(handler) => handler(ctx, request).await,
        }
    }
}

/// An ordered list of interceptors.
///
/// The first interceptor pushed is the outermost at request time.
pub struct Chain<Req, Resp> {
    interceptors: Vec<Arc<dyn Interceptor<Req, Resp>>>,
}

impl<Req, Resp> Chain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self {
            interceptors: Vec::new(),
        }
    }

    /// Appends an interceptor.
    pub fn push(&mut self, interceptor: Arc<dyn Interceptor<Req, Resp>>) {
        self.interceptors.push(interceptor);
    }

    /// Appends an interceptor, builder style.
    #[must_use]
    pub fn with(mut self, interceptor: Arc<dyn Interceptor<Req, Resp>>) -> Self {
        self.push(interceptor);
        self
    }

    /// Returns the number of interceptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    /// Returns true when no interceptor is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Returns interceptor names in invocation order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    /// Runs `request` through every interceptor and then `handler`.
    pub async fn run<H>(
        &self,
        ctx: &mut InterceptorContext,
        request: Req,
        handler: H,
    ) -> Result<Resp, RequestError>
    where
        H: FnOnce(&mut InterceptorContext, Req) -> BoxFuture<'static, Result<Resp, RequestError>>
            + Send
            + 'static,
    {
        let mut next = Next::handler(handler);
        for interceptor in self.interceptors.iter().rev() {
            next = Next::chain(interceptor.as_ref(), next);
        }
        next.run(ctx, request).await
    }
}

impl<Req, Resp> Default for Chain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Resp> Clone for Chain<Req, Resp> {
    fn clone(&self) -> Self {
        Self {
            interceptors: self.interceptors.clone(),
        }
    }
}

impl<Req, Resp> fmt::Debug for Chain<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.interceptors.iter().map(|i| i.name()))
            .finish()
    }
}

/// Interceptor built from a closure, see [`from_fn`].
pub struct FnInterceptor<Req, Resp, F> {
    name: &'static str,
    func: F,
    _marker: PhantomData<fn(Req) -> Resp>,
}

/// Builds an interceptor from a closure.
///
/// ```
/// use keel_middleware::{from_fn, Interceptor, Request, RequestError, Response};
/// use std::sync::Arc;
///
/// let deny: Arc<dyn Interceptor<Request, Response>> =
///     Arc::new(from_fn::<Request, Response, _>("deny", |_ctx, _req, _next| {
///         Box::pin(async { Err(RequestError::forbidden("maintenance")) })
///     }));
/// assert_eq!(deny.name(), "deny");
/// ```
pub fn from_fn<Req, Resp, F>(name: &'static str, func: F) -> FnInterceptor<Req, Resp, F>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    F: for<'a> Fn(
            &'a mut InterceptorContext,
            Req,
            Next<'a, Req, Resp>,
        ) -> BoxFuture<'a, Result<Resp, RequestError>>
        + Send
        + Sync
        + 'static,
{
    FnInterceptor {
        name,
        func,
        _marker: PhantomData,
    }
}

impl<Req, Resp, F> Interceptor<Req, Resp> for FnInterceptor<Req, Resp, F>
where
    Req: Send + 'static,
    Resp: Send + 'static,
    F: for<'a> Fn(
            &'a mut InterceptorContext,
            Req,
            Next<'a, Req, Resp>,
        ) -> BoxFuture<'a, Result<Resp, RequestError>>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn intercept<'a>(
        &'a self,
        ctx: &'a mut InterceptorContext,
        request: Req,
        next: Next<'a, Req, Resp>,
    ) -> BoxFuture<'a, Result<Resp, RequestError>> {
        (self.func)(ctx, request, next)
    }
}

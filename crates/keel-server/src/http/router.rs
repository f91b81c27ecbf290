//! Method and path routing for the HTTP flavour.
//!
//! Patterns are `/`-separated segments where `{name}` captures one segment:
//!
//! ```
//! use http::Method;
//! use keel_server::http::{Resolution, Router};
//!
//! let mut router = Router::new();
//! router
//!     .add(Method::GET, "/users/{id}", |_req, params| async move {
//!         let id = params.get("id").unwrap_or_default();
//!         Ok::<_, keel_middleware::RequestError>(keel_server::http::text(http::StatusCode::OK, id))
//!     })
//!     .unwrap();
//!
//! match router.resolve(&Method::GET, "/users/42") {
//!     Resolution::Matched { pattern, params, .. } => {
//!         assert_eq!(pattern, "/users/{id}");
//!         assert_eq!(params.get("id"), Some("42"));
//!     }
//!     _ => unreachable!(),
//! }
//! ```
//!
//! Two routes with the same method and the same shape (parameter names
//! aside) conflict; the second registration fails instead of shadowing the
//! first.

use http::Method;
use keel_core::RegistrationConflict;
use keel_middleware::{BoxFuture, Request, RequestError, Response};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A route handler.
pub type HttpHandler =
    Arc<dyn Fn(Request, RouteParams) -> BoxFuture<'static, Result<Response, RequestError>> + Send + Sync>;

/// Path parameters captured by a match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams(HashMap<String, String>);

impl RouteParams {
    /// Returns the value captured for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Returns the number of captured parameters.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Result of looking up a request.
pub enum Resolution<'a> {
    /// A route matched.
    Matched {
        /// The registered pattern, used as the operation name.
        pattern: &'a str,
        /// Captured path parameters.
        params: RouteParams,
        /// The route's handler.
        handler: HttpHandler,
    },
    /// The path matched, but only for other methods.
    MethodNotAllowed,
    /// Nothing matched the path.
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Literal(String),
    Param(String),
}

impl PathSegment {
    fn same_shape(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Literal(a), Self::Literal(b)) => a == b,
            (Self::Param(_), Self::Param(_)) => true,
            _ => false,
        }
    }
}

struct Route {
    method: Method,
    segments: Vec<PathSegment>,
    pattern: String,
    handler: HttpHandler,
}

impl Route {
    fn parse_segments(pattern: &str) -> Vec<PathSegment> {
        pattern
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some(name) => PathSegment::Param(name.to_string()),
                None => PathSegment::Literal(s.to_string()),
            })
            .collect()
    }

    fn same_shape(&self, segments: &[PathSegment]) -> bool {
        self.segments.len() == segments.len()
            && self
                .segments
                .iter()
                .zip(segments)
                .all(|(a, b)| a.same_shape(b))
    }

    fn capture(&self, path: &[&str]) -> Option<RouteParams> {
        if path.len() != self.segments.len() {
            return None;
        }

        let mut params = RouteParams::default();
        for (segment, value) in self.segments.iter().zip(path) {
            match segment {
                PathSegment::Literal(literal) if literal == value => {}
                PathSegment::Literal(_) => return None,
                PathSegment::Param(name) => {
                    params.0.insert(name.clone(), (*value).to_string());
                }
            }
        }
        Some(params)
    }
}

/// Method and path based request router.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `method` requests matching `pattern`.
    pub fn add<H, Fut>(
        &mut self,
        method: Method,
        pattern: &str,
        handler: H,
    ) -> Result<(), RegistrationConflict>
    where
        H: Fn(Request, RouteParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Response, RequestError>> + Send + 'static,
    {
        let handler: HttpHandler = Arc::new(
            move |request, params| -> BoxFuture<'static, Result<Response, RequestError>> {
                Box::pin(handler(request, params))
            },
        );
        self.add_handler(method, pattern, handler)
    }

    /// Registers an already boxed handler.
    pub fn add_handler(
        &mut self,
        method: Method,
        pattern: &str,
        handler: HttpHandler,
    ) -> Result<(), RegistrationConflict> {
        let segments = Route::parse_segments(pattern);
        if self
            .routes
            .iter()
            .any(|route| route.method == method && route.same_shape(&segments))
        {
            return Err(RegistrationConflict::new("route", format!("{method} {pattern}")));
        }

        self.routes.push(Route {
            method,
            segments,
            pattern: pattern.to_string(),
            handler,
        });
        Ok(())
    }

    /// Finds the route for a request. Routes are tried in registration order.
    #[must_use]
    pub fn resolve(&self, method: &Method, path: &str) -> Resolution<'_> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut path_known = false;

        for route in &self.routes {
            if let Some(params) = route.capture(&segments) {
                if route.method == *method {
                    return Resolution::Matched {
                        pattern: &route.pattern,
                        params,
                        handler: Arc::clone(&route.handler),
                    };
                }
                path_known = true;
            }
        }

        if path_known {
            Resolution::MethodNotAllowed
        } else {
            Resolution::NotFound
        }
    }

    /// Returns the number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if no route is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Lists `(method, pattern)` pairs in registration order.
    pub fn routes(&self) -> impl Iterator<Item = (&Method, &str)> {
        self.routes.iter().map(|r| (&r.method, r.pattern.as_str()))
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.routes().map(|(method, pattern)| format!("{method} {pattern}")))
            .finish()
    }
}

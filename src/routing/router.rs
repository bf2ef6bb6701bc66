//! Route registration and dispatch.
//!
//! # Responsibilities
//! - Collect routes per HTTP method at startup
//! - Scope prefixes and middleware through groups
//! - Freeze into an immutable [`Dispatcher`] that serves requests
//!
//! # Design Decisions
//! - Registration errors surface at startup as `RegistrationError`
//! - Global middleware wraps the whole dispatch, NotFound included
//! - Group middleware is baked into each handler at registration time
//! - Recovery is installed by the dispatcher as the outermost layer and
//!   cannot be reordered by callers

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    http::{Method, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
};
use tower::ServiceExt;
use tower_http::services::ServeDir;

use crate::http::middleware::recovery::recovery;
use crate::routing::handler::{compose, handler, BoxResponseFuture, Handler, Middleware, PathParams};
use crate::routing::tree::{Node, RegistrationError, WILDCARD_PARAM};

/// A successful route lookup.
pub struct RouteMatch {
    pub handler: Handler,
    pub params: PathParams,
}

impl std::fmt::Debug for RouteMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteMatch").field("params", &self.params).finish()
    }
}

/// Mutable route table used during startup.
pub struct Router {
    trees: HashMap<Method, Node>,
    middleware: Vec<Middleware>,
    not_found: Handler,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Self {
            trees: HashMap::new(),
            middleware: Vec::new(),
            not_found: handler(|_req| async { StatusCode::NOT_FOUND }),
        }
    }

    /// Add global middleware. Earlier calls wrap later ones.
    pub fn use_middleware(&mut self, middleware: Middleware) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    /// Replace the handler for unmatched requests.
    pub fn not_found(&mut self, handler: Handler) -> &mut Self {
        self.not_found = handler;
        self
    }

    /// Register `handler` for `method` at `pattern`.
    pub fn handle(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Handler,
    ) -> Result<(), RegistrationError> {
        let root = self.trees.entry(method.clone()).or_default();
        root.insert(method.as_str(), pattern, handler)?;
        tracing::debug!(method = %method, pattern = %pattern, "Route registered");
        Ok(())
    }

    pub fn get(&mut self, pattern: &str, handler: Handler) -> Result<(), RegistrationError> {
        self.handle(Method::GET, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: Handler) -> Result<(), RegistrationError> {
        self.handle(Method::POST, pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: Handler) -> Result<(), RegistrationError> {
        self.handle(Method::PUT, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: Handler) -> Result<(), RegistrationError> {
        self.handle(Method::DELETE, pattern, handler)
    }

    /// Serve files from `directory` under `prefix`.
    pub fn static_files(&mut self, prefix: &str, directory: &str) -> Result<(), RegistrationError> {
        let pattern = join_paths(prefix, "*");
        self.get(&pattern, static_handler(directory))
    }

    /// Open a group rooted at `prefix`.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group {
            router: self,
            prefix: join_paths("/", prefix),
            middleware: Vec::new(),
        }
    }

    /// Look up the handler for a request line.
    pub fn dispatch(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        lookup(&self.trees, method, path)
    }

    /// Number of registered routes across all methods.
    pub fn route_count(&self) -> usize {
        self.trees.values().map(Node::route_count).sum()
    }

    /// Freeze the table into a request-serving dispatcher.
    pub fn into_dispatcher(self) -> Dispatcher {
        let trees = Arc::new(self.trees);
        let not_found = self.not_found;

        let routed: Handler = {
            let trees = trees.clone();
            Arc::new(move |mut req: Request<Body>| -> BoxResponseFuture {
                match lookup(&trees, req.method(), req.uri().path()) {
                    Some(found) => {
                        req.extensions_mut().insert(found.params);
                        (found.handler)(req)
                    }
                    None => not_found(req),
                }
            })
        };

        let pipeline = recovery()(compose(&self.middleware, routed));
        Dispatcher {
            trees,
            pipeline,
        }
    }
}

fn lookup(trees: &HashMap<Method, Node>, method: &Method, path: &str) -> Option<RouteMatch> {
    let matched = trees.get(method)?.find(path)?;
    Some(RouteMatch {
        handler: matched.handler,
        params: matched.params.into_iter().collect(),
    })
}

/// A prefix + middleware scope over a [`Router`].
pub struct Group<'r> {
    router: &'r mut Router,
    prefix: String,
    middleware: Vec<Middleware>,
}

impl Group<'_> {
    /// Add middleware applied to every route registered through this group
    /// (and its subgroups) from now on.
    pub fn use_middleware(&mut self, middleware: Middleware) -> &mut Self {
        self.middleware.push(middleware);
        self
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn handle(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Handler,
    ) -> Result<(), RegistrationError> {
        if !pattern.starts_with('/') {
            return Err(RegistrationError::MissingLeadingSlash(pattern.to_string()));
        }
        let full = join_paths(&self.prefix, pattern);
        self.router
            .handle(method, &full, compose(&self.middleware, handler))
    }

    pub fn get(&mut self, pattern: &str, handler: Handler) -> Result<(), RegistrationError> {
        self.handle(Method::GET, pattern, handler)
    }

    pub fn post(&mut self, pattern: &str, handler: Handler) -> Result<(), RegistrationError> {
        self.handle(Method::POST, pattern, handler)
    }

    pub fn put(&mut self, pattern: &str, handler: Handler) -> Result<(), RegistrationError> {
        self.handle(Method::PUT, pattern, handler)
    }

    pub fn delete(&mut self, pattern: &str, handler: Handler) -> Result<(), RegistrationError> {
        self.handle(Method::DELETE, pattern, handler)
    }

    /// Open a nested group inheriting this group's prefix and middleware.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group {
            prefix: join_paths(&self.prefix, prefix),
            middleware: self.middleware.clone(),
            router: &mut *self.router,
        }
    }
}

/// Join two path fragments, collapsing duplicate slashes. The result always
/// starts with `/` and never ends with one (except the root itself).
pub fn join_paths(prefix: &str, path: &str) -> String {
    let joined: Vec<&str> = prefix
        .split('/')
        .chain(path.split('/'))
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", joined.join("/"))
}

fn static_handler(directory: &str) -> Handler {
    let service = ServeDir::new(directory);
    Arc::new(move |req: Request<Body>| -> BoxResponseFuture {
        let service = service.clone();
        Box::pin(async move {
            let rest = req
                .extensions()
                .get::<PathParams>()
                .and_then(|p| p.get(WILDCARD_PARAM))
                .unwrap_or_default()
                .to_string();

            let (mut parts, body) = req.into_parts();
            let target = match parts.uri.query() {
                Some(q) => format!("/{rest}?{q}"),
                None => format!("/{rest}"),
            };
            parts.uri = match target.parse::<Uri>() {
                Ok(uri) => uri,
                Err(_) => return StatusCode::BAD_REQUEST.into_response(),
            };

            match service.oneshot(Request::from_parts(parts, body)).await {
                Ok(res) => res.map(Body::new),
                Err(never) => match never {},
            }
        })
    })
}

/// Immutable, cheaply cloneable request dispatcher.
///
/// Implements `tower::Service` so it can be mounted directly into an axum
/// server.
#[derive(Clone)]
pub struct Dispatcher {
    trees: Arc<HashMap<Method, Node>>,
    pipeline: Handler,
}

impl Dispatcher {
    /// Look up a route without running the pipeline.
    pub fn dispatch(&self, method: &Method, path: &str) -> Option<RouteMatch> {
        lookup(&self.trees, method, path)
    }

    /// Run a request through the full pipeline.
    pub fn call(&self, req: Request<Body>) -> BoxResponseFuture {
        (self.pipeline)(req)
    }
}

impl tower::Service<Request<Body>> for Dispatcher {
    type Response = Response;
    type Error = Infallible;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Response, Infallible>> + Send + 'static>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let fut = (self.pipeline)(req);
        Box::pin(async move { Ok(fut.await) })
    }
}

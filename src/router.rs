//! Route registration.
//!
//! One segment trie per HTTP method, created on first use. Build the router
//! once at startup, then [`resolve`](Router::resolve) it (or hand it to
//! [`Server::serve`](crate::Server::serve), which does that for you). After
//! resolution the tries are frozen behind the [`Dispatcher`].

use std::collections::HashMap;
use std::sync::Arc;

use http::Method;
use tracing::debug;

use crate::context::Context;
use crate::dispatch::Dispatcher;
use crate::error::RouteError;
use crate::handler::{Handler, Middleware};
use crate::template::Renderer;
use crate::tree::Node;

/// The application router.
///
/// Every builder method returns `self` so registrations chain naturally, and
/// panics on an invalid or conflicting route: a bad route table is a bug,
/// and the process should not start serving with one. Use
/// [`add_route`](Router::add_route) to get the [`RouteError`] instead.
pub struct Router {
    trees: HashMap<Method, Node>,
    middleware: Vec<Middleware>,
    renderer: Option<Arc<dyn Renderer>>,
}

impl Router {
    pub fn new() -> Self {
        Self { trees: HashMap::new(), middleware: Vec::new(), renderer: None }
    }

    /// Register a handler for a method + pattern pair.
    ///
    /// Patterns are `/`-separated segments: `users` matches literally,
    /// `:id` captures one segment, `:id(^[0-9]+$)` captures one segment that
    /// matches the regex, and `*` matches one segment (or, as the last
    /// segment, everything that remains).
    ///
    /// ```rust
    /// # use sprig::{Method, Router};
    /// Router::new()
    ///     .on(Method::DELETE, "/users/:id", |_ctx| {})
    ///     .on(Method::GET,    "/users/:id", |_ctx| {})
    ///     .on(Method::POST,   "/users",     |_ctx| {});
    /// ```
    pub fn on<F>(self, method: Method, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.route(method, pattern, handler, [])
    }

    pub fn get<F>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.on(Method::GET, pattern, handler)
    }

    pub fn post<F>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.on(Method::POST, pattern, handler)
    }

    pub fn delete<F>(self, pattern: &str, handler: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        self.on(Method::DELETE, pattern, handler)
    }

    /// Register a handler with route-level middleware, first element
    /// outermost.
    pub fn route<F>(
        mut self,
        method: Method,
        pattern: &str,
        handler: F,
        middleware: impl IntoIterator<Item = Middleware>,
    ) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        let middleware = middleware.into_iter().collect();
        self.add_route(method, pattern, Handler::new(handler), middleware)
            .unwrap_or_else(|e| panic!("{e}"));
        self
    }

    /// Middleware applied to every request, outside any route middleware.
    pub fn use_middleware(mut self, middleware: impl IntoIterator<Item = Middleware>) -> Self {
        self.middleware.extend(middleware);
        self
    }

    /// Attach middleware to `pattern` without touching its handler.
    ///
    /// The middleware runs for requests ending at `pattern`, and for
    /// requests to routes below it or beside it that the pattern also
    /// covers (`/a/*` covers `/a/b`).
    pub fn use_route_middleware(
        mut self,
        method: Method,
        pattern: &str,
        middleware: impl IntoIterator<Item = Middleware>,
    ) -> Self {
        let middleware = middleware.into_iter().collect();
        self.add_middleware(method, pattern, middleware)
            .unwrap_or_else(|e| panic!("{e}"));
        self
    }

    /// The renderer [`Context::render`] uses.
    pub fn renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Some(Arc::new(renderer));
        self
    }

    // ── Fallible registration ────────────────────────────────────────────────

    pub fn add_route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Handler,
        middleware: Vec<Middleware>,
    ) -> Result<(), RouteError> {
        self.tree(&method).insert(&method, pattern, Some(handler), middleware)?;
        debug!(%method, route = pattern, "route registered");
        Ok(())
    }

    pub fn add_middleware(
        &mut self,
        method: Method,
        pattern: &str,
        middleware: Vec<Middleware>,
    ) -> Result<(), RouteError> {
        let count = middleware.len();
        self.tree(&method).insert(&method, pattern, None, middleware)?;
        debug!(%method, route = pattern, count, "route middleware registered");
        Ok(())
    }

    fn tree(&mut self, method: &Method) -> &mut Node {
        self.trees.entry(method.clone()).or_insert_with(Node::root)
    }

    // ── Resolution ───────────────────────────────────────────────────────────

    /// Closes registration: caches every node's middleware chain and freezes
    /// the tries.
    pub fn resolve(mut self) -> Dispatcher {
        for (method, root) in &mut self.trees {
            let nodes = root.resolve_middleware();
            debug!(%method, nodes, "middleware resolved");
        }
        Dispatcher::new(self.trees, self.middleware, self.renderer)
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;

    #[test]
    fn conflicting_route_is_an_error() {
        let mut router = Router::new();
        router.add_route(Method::GET, "/a/:id", Handler::new(|_| {}), Vec::new()).unwrap();
        let err = router
            .add_route(Method::GET, "/a/*", Handler::new(|_| {}), Vec::new())
            .unwrap_err();
        assert!(matches!(err, RouteError::Conflict { .. }));
        assert!(err.to_string().contains(":id"), "{err}");
    }

    #[test]
    fn methods_have_separate_trees() {
        let mut router = Router::new();
        router.add_route(Method::GET, "/a/:id", Handler::new(|_| {}), Vec::new()).unwrap();
        // Same position, different method: no conflict.
        router.add_route(Method::POST, "/a/*", Handler::new(|_| {}), Vec::new()).unwrap();
        router.add_route(Method::POST, "/a/b", Handler::new(|_| {}), Vec::new()).unwrap();
        router.add_route(Method::DELETE, "/a/b", Handler::new(|_| {}), Vec::new()).unwrap();
        assert_eq!(router.trees.len(), 3);
    }

    #[test]
    fn duplicate_names_method() {
        let mut router = Router::new();
        router.add_route(Method::POST, "/a/b", Handler::new(|_| {}), Vec::new()).unwrap();
        let err = router
            .add_route(Method::POST, "/a/b", Handler::new(|_| {}), Vec::new())
            .unwrap_err();
        assert_eq!(err.to_string(), "duplicate route `POST /a/b`");
    }

    #[test]
    #[should_panic(expected = "must start with `/`")]
    fn builder_panics_on_bad_pattern() {
        let _ = Router::new().get("login", |_| {});
    }

    #[test]
    #[should_panic(expected = "duplicate route")]
    fn builder_panics_on_duplicate() {
        let _ = Router::new().get("/a", |_| {}).get("/a", |_| {});
    }

    #[test]
    fn middleware_only_registration_needs_no_handler() {
        let dispatcher = Router::new()
            .use_route_middleware(Method::GET, "/quiet", [Middleware::new(|next| next)])
            .resolve();

        let res = dispatcher.dispatch(http::Request::get("/quiet").body(bytes::Bytes::new()).unwrap());
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}

//! Request dispatch: route lookup and the per-request handler chain.
//!
//! ```text
//! flush( global_1( global_2( … serve( route_1( route_2( … handler ))))))
//! ```
//!
//! The outer part (flush step + global middleware + serve) does not depend on
//! the request and is composed once in [`Dispatcher::new`]. The inner part
//! (route middleware + handler) is composed per request from the chain cached
//! on the matched node.
//!
//! The flush step is outermost, so the buffered status and payload reach the
//! sink exactly once, after every middleware (recovery included) has had its
//! chance to rewrite them.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use tracing::debug;

use crate::context::Context;
use crate::handler::{Handler, Middleware};
use crate::template::Renderer;
use crate::tree::{Match, Node};

/// The frozen route table plus the composed global chain.
///
/// Obtained from [`Router::resolve`](crate::Router::resolve). Immutable and
/// shared across connection tasks without locking.
pub struct Dispatcher {
    routes: Arc<Routes>,
    chain: Handler,
    renderer: Option<Arc<dyn Renderer>>,
}

/// A successful route lookup.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    route: &'a str,
    has_handler: bool,
    params: Option<HashMap<String, String>>,
}

impl RouteMatch<'_> {
    /// The pattern registered on the matched node; empty for a structural
    /// node.
    pub fn route(&self) -> &str {
        self.route
    }

    /// `false` when the path exists in the trie only as a prefix of other
    /// routes; such a match is served as 404.
    pub fn has_handler(&self) -> bool {
        self.has_handler
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.as_ref()?.get(name).map(String::as_str)
    }
}

struct Routes {
    trees: HashMap<Method, Node>,
}

impl Routes {
    fn find(&self, method: &Method, path: &str) -> Option<Match<'_>> {
        self.trees.get(method)?.find(path)
    }

    /// Looks up the route, records the match on `ctx` and runs the handler
    /// inside its resolved middleware. Unmatched → buffered 404.
    fn serve(&self, ctx: &mut Context) {
        let matched = self
            .find(ctx.method(), ctx.path())
            .and_then(|m| Some((m.node.handler.clone()?, m)));
        let Some((handler, Match { node, params })) = matched else {
            debug!(method = %ctx.method(), path = ctx.path(), "no route");
            ctx.set_response(StatusCode::NOT_FOUND, Vec::new());
            return;
        };

        ctx.set_match(params, node.route.clone());
        handler.wrap(&node.resolved).call(ctx);
    }
}

impl Dispatcher {
    pub(crate) fn new(
        trees: HashMap<Method, Node>,
        middleware: Vec<Middleware>,
        renderer: Option<Arc<dyn Renderer>>,
    ) -> Self {
        let routes = Arc::new(Routes { trees });

        let serve = {
            let routes = Arc::clone(&routes);
            Handler::new(move |ctx| routes.serve(ctx))
        };
        let chain = flush_after(serve.wrap(&middleware));

        Self { routes, chain, renderer }
    }

    /// Looks up `path` in the `method` tree without running anything.
    pub fn find_route(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        self.routes.find(method, path).map(|m| RouteMatch {
            route: &m.node.route,
            has_handler: m.node.handler.is_some(),
            params: m.params,
        })
    }

    /// Runs the full chain, flush included, against an existing context.
    pub fn handle(&self, ctx: &mut Context) {
        self.chain.call(ctx);
    }

    /// Handles one request end to end.
    pub fn dispatch(&self, request: http::Request<Bytes>) -> http::Response<Bytes> {
        let mut ctx = Context::new(request).with_renderer(self.renderer.clone());
        self.handle(&mut ctx);
        ctx.into_response()
    }
}

/// The outermost step: run everything, then write the buffer to the sink.
fn flush_after(inner: Handler) -> Handler {
    Handler::new(move |ctx| {
        inner.call(ctx);
        ctx.flush();
    })
}

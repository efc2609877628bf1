//! Per-request tracing and access log.
//!
//! Opens an `info` span named `request` around the rest of the chain, with
//! the method and path as fields, and once the chain returns emits one access
//! record carrying the matched route, the buffered status and the latency.
//! Because the route is only known after routing, register this globally.
//!
//! ```rust
//! use sprig::Router;
//! use sprig::middleware::trace::Trace;
//!
//! let app = Router::new()
//!     .use_middleware([Trace::new().build()])
//!     .get("/healthz", |ctx| ctx.set_body("ok"));
//! # let _ = app;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::Method;
use tracing::{info, info_span};

use crate::handler::{Handler, Middleware};

/// One completed request.
#[derive(Clone, Debug)]
pub struct AccessLog {
    pub host: Option<String>,
    pub peer: Option<SocketAddr>,
    pub method: Method,
    pub path: String,
    /// The matched pattern; empty when nothing matched.
    pub route: String,
    /// The buffered status; 0 when nobody set one.
    pub status: u16,
    pub latency: Duration,
}

type LogFn = Arc<dyn Fn(&AccessLog) + Send + Sync>;

/// Builder for the trace middleware.
pub struct Trace {
    log: LogFn,
}

impl Trace {
    /// Access records go to `tracing` at info level.
    pub fn new() -> Self {
        Self {
            log: Arc::new(|entry: &AccessLog| {
                info!(
                    method = %entry.method,
                    path = %entry.path,
                    route = %entry.route,
                    status = entry.status,
                    latency_us = entry.latency.as_micros() as u64,
                    "request completed"
                );
            }),
        }
    }

    /// Sends access records somewhere other than the default log line.
    pub fn log_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&AccessLog) + Send + Sync + 'static,
    {
        self.log = Arc::new(f);
        self
    }

    pub fn build(self) -> Middleware {
        let log = self.log;
        Middleware::new(move |next| {
            let log = Arc::clone(&log);
            Handler::new(move |ctx| {
                let span = info_span!("request", method = %ctx.method(), path = ctx.path());
                let _entered = span.enter();
                let start = Instant::now();

                next.call(ctx);

                log(&AccessLog {
                    host: ctx.header("host").map(str::to_owned),
                    peer: ctx.remote_addr(),
                    method: ctx.method().clone(),
                    path: ctx.path().to_owned(),
                    route: ctx.matched_route().to_owned(),
                    status: ctx.status().map_or(0, |s| s.as_u16()),
                    latency: start.elapsed(),
                });
            })
        })
    }
}

impl Default for Trace {
    fn default() -> Self {
        Self::new()
    }
}

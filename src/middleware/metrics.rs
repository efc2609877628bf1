//! Request latency metrics.
//!
//! Records one histogram sample per request, in seconds, labelled with the
//! matched route pattern, the method and the final status. Requests that
//! matched no route are labelled `route="unknown"`, which keeps the label
//! set bounded no matter what paths clients send.
//!
//! Samples go to whatever [`metrics`] recorder is installed; with
//! `metrics-exporter-prometheus` they become a Prometheus summary.
//! Register it globally, like [`trace`](super::trace), so it sees 404s.
//!
//! ```rust
//! use sprig::Router;
//! use sprig::middleware::metrics::Metrics;
//!
//! let app = Router::new()
//!     .use_middleware([Metrics::new().namespace("shop").build()])
//!     .get("/healthz", |ctx| ctx.set_body("ok"));
//! # let _ = app;
//! ```

use std::sync::Arc;
use std::time::Instant;

use http::StatusCode;
use metrics::{Unit, describe_histogram, histogram};

use crate::handler::{Handler, Middleware};

/// Route label for requests that matched nothing.
pub const UNKNOWN_ROUTE: &str = "unknown";

/// Builder for the metrics middleware.
pub struct Metrics {
    namespace: Option<String>,
    subsystem: Option<String>,
    name: String,
    help: String,
}

impl Metrics {
    /// `http_request_duration_seconds`, no namespace.
    pub fn new() -> Self {
        Self {
            namespace: None,
            subsystem: None,
            name: "http_request_duration_seconds".to_owned(),
            help: "HTTP request latency by route, method and status.".to_owned(),
        }
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn subsystem(mut self, subsystem: impl Into<String>) -> Self {
        self.subsystem = Some(subsystem.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn help(mut self, help: impl Into<String>) -> Self {
        self.help = help.into();
        self
    }

    /// `namespace_subsystem_name`, skipping the parts that are unset.
    pub fn metric_name(&self) -> String {
        [self.namespace.as_deref(), self.subsystem.as_deref(), Some(self.name.as_str())]
            .into_iter()
            .flatten()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("_")
    }

    pub fn build(self) -> Middleware {
        let name: Arc<str> = Arc::from(self.metric_name());
        describe_histogram!(name.to_string(), Unit::Seconds, self.help);

        Middleware::new(move |next| {
            let name = Arc::clone(&name);
            Handler::new(move |ctx| {
                let start = Instant::now();
                next.call(ctx);
                let elapsed = start.elapsed().as_secs_f64();

                let route = match ctx.matched_route() {
                    "" => UNKNOWN_ROUTE.to_owned(),
                    route => route.to_owned(),
                };
                // The flush turns a missing status into 200.
                let status = ctx.status().unwrap_or(StatusCode::OK);
                histogram!(
                    name.to_string(),
                    "route" => route,
                    "method" => ctx.method().to_string(),
                    "status" => status.as_str().to_owned()
                )
                .record(elapsed);
            })
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

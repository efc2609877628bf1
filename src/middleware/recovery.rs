//! Panic recovery.
//!
//! A panic anywhere inside the wrapped chain is caught, logged, and replaced
//! by a buffered status and a safe message. This works because the response
//! is flushed only after the whole chain has returned.
//!
//! ```rust
//! use sprig::Router;
//! use sprig::middleware::recovery::Recovery;
//!
//! let app = Router::new()
//!     .use_middleware([Recovery::new().message("something went wrong").build()])
//!     .get("/boom", |_ctx| panic!("boom"));
//! # let _ = app;
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use http::StatusCode;
use tracing::error;

use crate::context::Context;
use crate::handler::{Handler, Middleware};

type LogFn = Arc<dyn Fn(&Context, &str) + Send + Sync>;

/// Builder for the recovery middleware.
pub struct Recovery {
    status: StatusCode,
    message: Arc<str>,
    log: LogFn,
}

impl Recovery {
    /// `500 Internal Server Error` with a generic message, logged through
    /// `tracing` at error level.
    pub fn new() -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: Arc::from("internal server error"),
            log: Arc::new(|ctx: &Context, reason: &str| {
                error!(
                    method = %ctx.method(),
                    path = ctx.path(),
                    route = ctx.matched_route(),
                    panic = reason,
                    "handler panicked"
                );
            }),
        }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    /// The body sent instead of whatever the handler had buffered.
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Arc::from(message.into());
        self
    }

    /// Replaces the default log line. Called after the response is buffered.
    pub fn log_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, &str) + Send + Sync + 'static,
    {
        self.log = Arc::new(f);
        self
    }

    pub fn build(self) -> Middleware {
        let Self { status, message, log } = self;
        Middleware::new(move |next| {
            let message = Arc::clone(&message);
            let log = Arc::clone(&log);
            Handler::new(move |ctx| {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| next.call(ctx)));
                if let Err(payload) = outcome {
                    ctx.set_response(status, message.as_bytes());
                    log(ctx, &panic_reason(payload.as_ref()));
                }
            })
        })
    }
}

impl Default for Recovery {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use bytes::Bytes;

    use super::*;
    use crate::Router;

    fn get(path: &str) -> http::Request<Bytes> {
        http::Request::get(path).body(Bytes::new()).unwrap()
    }

    #[test]
    fn panic_becomes_buffered_500() {
        let d = Router::new()
            .use_middleware([Recovery::new().message("oops").build()])
            .get("/boom", |ctx| {
                ctx.set_response(StatusCode::OK, "half written");
                panic!("boom");
            })
            .resolve();

        let res = d.dispatch(get("/boom"));
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(res.body().as_ref(), b"oops");
    }

    #[test]
    fn custom_status_and_log() {
        let logged = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&logged);
        let d = Router::new()
            .use_middleware([Recovery::new()
                .status(StatusCode::SERVICE_UNAVAILABLE)
                .log_fn(move |ctx, reason| {
                    sink.lock().unwrap().push(format!("{} {reason}", ctx.matched_route()));
                })
                .build()])
            .get("/users/:id", |ctx| {
                let id = ctx.path_value("id").unwrap().to_owned();
                panic!("no user {id}");
            })
            .resolve();

        let res = d.dispatch(get("/users/9"));
        assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(*logged.lock().unwrap(), ["/users/:id no user 9"]);
    }

    #[test]
    fn no_panic_passes_through() {
        let d = Router::new()
            .use_middleware([Recovery::new().build()])
            .get("/ok", |ctx| ctx.set_response(StatusCode::OK, "fine"))
            .resolve();

        let res = d.dispatch(get("/ok"));
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.body().as_ref(), b"fine");
    }

    #[test]
    fn reason_from_payload() {
        assert_eq!(panic_reason(&"static"), "static");
        assert_eq!(panic_reason(&String::from("owned")), "owned");
        assert_eq!(panic_reason(&42_u8), "non-string panic payload");
    }
}

//! Handlers, middleware and onion composition.
//!
//! # How handlers are stored
//!
//! The trie needs to hold handlers of *different* closure types in the same
//! node type, so every handler is erased behind one trait object and shared
//! through an `Arc`:
//!
//! ```text
//! |ctx: &mut Context| { … }                   ← user writes this
//!        ↓ router.get("/", handler)
//! Handler::new(handler)                       ← Arc<dyn Fn(&mut Context)>
//!        ↓ stored on the terminal trie node
//! handler.wrap(&resolved).call(ctx)           ← at request time
//! ```
//!
//! # Middleware
//!
//! A [`Middleware`] turns the *next* handler into a replacement handler. It
//! decides whether, when and how many times to call `next`, and may inspect
//! or mutate the [`Context`] before and after:
//!
//! ```rust
//! use sprig::{Handler, Middleware};
//!
//! let timing = Middleware::new(|next| {
//!     Handler::new(move |ctx| {
//!         let start = std::time::Instant::now();
//!         next.call(ctx);
//!         tracing::debug!(elapsed = ?start.elapsed(), "handled");
//!     })
//! });
//! # let _ = timing;
//! ```
//!
//! Composition is a reversed fold: for `[a, b, c]` around `h` the result is
//! `a(b(c(h)))`, so `a`'s pre-logic runs first and its post-logic runs last.

use std::fmt;
use std::sync::Arc;

use crate::context::Context;

// ── Handler ───────────────────────────────────────────────────────────────────

/// A type-erased request handler, cheap to clone.
///
/// Handlers write their result into the [`Context`] buffer; nothing reaches
/// the client until the dispatcher flushes after the whole chain returns.
#[derive(Clone)]
pub struct Handler(Arc<dyn Fn(&mut Context) + Send + Sync + 'static>);

impl Handler {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut Context) + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Runs the handler against `ctx`.
    pub fn call(&self, ctx: &mut Context) {
        (self.0)(ctx)
    }

    /// Wraps `self` in `middleware`, first element outermost.
    pub fn wrap(self, middleware: &[Middleware]) -> Handler {
        middleware.iter().rev().fold(self, |next, m| m.apply(next))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Handler(..)")
    }
}

// ── Middleware ────────────────────────────────────────────────────────────────

/// A transform from "next handler" to "replacement handler".
#[derive(Clone)]
pub struct Middleware(Arc<dyn Fn(Handler) -> Handler + Send + Sync + 'static>);

impl Middleware {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(Handler) -> Handler + Send + Sync + 'static,
    {
        Self(Arc::new(f))
    }

    /// Wraps `next`, returning the handler that should run in its place.
    pub fn apply(&self, next: Handler) -> Handler {
        (self.0)(next)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Middleware(..)")
    }
}

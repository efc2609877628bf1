//! Built-in middleware.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns. Register it globally with
//! [`Router::use_middleware`](crate::Router::use_middleware), per route with
//! [`Router::route`](crate::Router::route), or after the fact with
//! [`Router::use_route_middleware`](crate::Router::use_route_middleware).
//!
//! - [`trace`]: per-request span and one access record per request
//! - [`metrics`]: latency histogram by route, method and status
//! - [`recovery`]: turns a handler panic into a buffered 500
//!
//! Sessions plug in the same way, through
//! [`session::Manager::middleware`](crate::session::Manager::middleware).
//!
//! Put [`recovery`] first so it wraps everything else.

pub mod metrics;
pub mod recovery;
pub mod trace;

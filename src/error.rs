//! Error types.
//!
//! Three families, one per lifecycle phase:
//!
//! - [`RouteError`]: registration. A malformed pattern or a conflicting
//!   route is a programmer error; the builder methods on
//!   [`Router`](crate::Router) panic with it so the process never starts
//!   serving an inconsistent trie.
//! - [`ContextError`]: request time. Returned by the
//!   [`Context`](crate::Context) accessors; the handler decides what status
//!   the client sees.
//! - [`Error`]: infrastructure, binding to a port or accepting a connection.

use http::Method;
use thiserror::Error;

use crate::template::RenderError;

/// The error type returned by sprig's server operations.
///
/// Application-level failures (404, 422, etc.) are expressed as buffered
/// statuses on the [`Context`](crate::Context), not as `Error`s.
#[derive(Debug, Error)]
#[error("io: {0}")]
pub struct Error(#[from] std::io::Error);

/// A route registration failure.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid route `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: &'static str },

    #[error("invalid route `{pattern}`: bad regex in segment `{segment}`: {source}")]
    InvalidRegex {
        pattern: String,
        segment: String,
        #[source]
        source: regex::Error,
    },

    #[error(
        "route conflict in `{pattern}`: `{new}` cannot share a position with `{existing}` \
         registered by `{existing_route}`"
    )]
    Conflict { pattern: String, new: String, existing: String, existing_route: String },

    #[error("duplicate route `{method} {pattern}`")]
    Duplicate { method: Method, pattern: String },
}

/// A request-time accessor failure.
#[derive(Debug, Error)]
pub enum ContextError {
    #[error("key `{0}` not found")]
    NotFound(String),

    #[error("value `{value}` for key `{key}` is invalid: {reason}")]
    InvalidValue { key: String, value: String, reason: String },

    #[error("no renderer configured")]
    NoRenderer,

    #[error("render: {0}")]
    Render(#[from] RenderError),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid header value: {0}")]
    InvalidHeader(#[from] http::header::InvalidHeaderValue),
}

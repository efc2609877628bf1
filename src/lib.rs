//! # sprig
//!
//! A small HTTP router built on a per-method segment trie, with onion-style
//! middleware and a buffered request context.
//!
//! ## The model
//!
//! - **Routing**: one trie per HTTP method. Each path segment is a static
//!   word, a named parameter (`:id`), a regex-constrained parameter
//!   (`:id(^[0-9]+$)`) or a wildcard (`*`). Static children always win over
//!   the single dynamic child of a node, and lookup never backtracks.
//! - **Middleware**: global middleware wraps every request, 404s included.
//!   Route middleware is attached to a pattern and resolved once, at startup,
//!   into a cached chain on every route the pattern covers.
//! - **Context**: handlers and middleware share one [`Context`] per request.
//!   Status and body are buffered and written to the response exactly once,
//!   after the whole chain has returned.
//!
//! What sprig leaves to the proxy in front of it:
//!
//! - **TLS termination**
//! - **Body-size limits and rate limiting**
//! - **Slow-client protection**
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use sprig::middleware::{recovery::Recovery, trace::Trace};
//! use sprig::{Context, Router, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Router::new()
//!         .use_middleware([Recovery::new().build(), Trace::new().build()])
//!         .get("/users/:id", get_user)
//!         .get("/files/*", |ctx| ctx.set_body("a file"));
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//!
//! fn get_user(ctx: &mut Context) {
//!     match ctx.path_value_as::<u64>("id") {
//!         Ok(id) => ctx.set_response(StatusCode::OK, format!(r#"{{"id":{id}}}"#)),
//!         Err(e) => ctx.set_response(StatusCode::BAD_REQUEST, e.to_string()),
//!     }
//! }
//! ```

mod context;
mod dispatch;
mod error;
mod handler;
mod response;
mod router;
mod server;
mod tree;

pub mod middleware;
pub mod session;
pub mod template;

pub use context::Context;
pub use cookie::{self, Cookie, SameSite};
pub use dispatch::{Dispatcher, RouteMatch};
pub use error::{ContextError, Error, RouteError};
pub use handler::{Handler, Middleware};
pub use http::{Method, StatusCode};
pub use response::ResponseWriter;
pub use router::Router;
pub use server::Server;
pub use template::{MiniJinjaRenderer, RenderError, Renderer};

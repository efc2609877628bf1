//! HTTP server and graceful shutdown.
//!
//! [`Server::serve`] freezes the [`Router`] into a [`Dispatcher`], then
//! accepts connections until the shutdown future resolves (SIGTERM or Ctrl-C
//! unless [`Server::with_shutdown`] says otherwise). Each request body is
//! read in full before the handler chain runs, and the chain itself runs on
//! tokio's blocking pool, since handlers and middleware are plain
//! synchronous functions.
//!
//! On shutdown the server stops accepting, lets every in-flight connection
//! finish, and only then returns. Behind Kubernetes, keep
//! `terminationGracePeriodSeconds` above your slowest request.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::router::Router;

type Shutdown = Pin<Box<dyn Future<Output = ()> + Send>>;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
    shutdown: Option<Shutdown>,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use sprig::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self { addr, shutdown: None }
    }

    /// Stops accepting when `signal` resolves instead of on SIGTERM/Ctrl-C.
    pub fn with_shutdown<F>(mut self, signal: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.shutdown = Some(Box::pin(signal));
        self
    }

    /// Resolves `router`, binds, and serves until shutdown.
    ///
    /// Route middleware is resolved before the listener is bound, so no
    /// request ever sees a half-built route table.
    ///
    /// Every request occupies one thread of tokio's blocking pool for as long
    /// as its handler chain runs (512 threads by default). Requests beyond
    /// that queue until a thread frees up, so long-blocking handlers cap
    /// throughput; size the pool with
    /// `tokio::runtime::Builder::max_blocking_threads` if that matters.
    ///
    /// Returns only after a full graceful shutdown.
    pub async fn serve(self, router: Router) -> Result<(), Error> {
        let dispatcher = Arc::new(router.resolve());
        let listener = TcpListener::bind(self.addr).await?;
        let shutdown: Shutdown = match self.shutdown {
            Some(signal) => signal,
            None => Box::pin(shutdown_signal()),
        };

        info!(addr = %self.addr, "sprig listening");
        run(listener, dispatcher, shutdown).await;
        info!("sprig stopped");
        Ok(())
    }
}

/// The accept loop. Returns once `shutdown` has fired and every connection
/// task has finished.
async fn run(listener: TcpListener, dispatcher: Arc<Dispatcher>, mut shutdown: Shutdown) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            // Shutdown first: a signal stops accepting even with a backlog of
            // queued connections.
            biased;

            () = &mut shutdown => {
                info!(in_flight = connections.len(), "shutdown signal received, draining connections");
                break;
            }

            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(serve_connection(stream, peer, Arc::clone(&dispatcher)));
                }
                Err(e) => error!("accept error: {e}"),
            },

            // Reap finished tasks so the set stays bounded.
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    while connections.join_next().await.is_some() {}
}

/// Serves every request on one connection, HTTP/1.1 or HTTP/2.
async fn serve_connection(stream: TcpStream, peer: SocketAddr, dispatcher: Arc<Dispatcher>) {
    debug!(%peer, "connection accepted");
    let svc = service_fn(move |req| dispatch(Arc::clone(&dispatcher), req, peer));

    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), svc)
        .await
    {
        error!(%peer, "connection error: {e}");
    }
}

// ── Request dispatch ──────────────────────────────────────────────────────────

/// Core hot path: buffers the body, runs the handler chain, returns the
/// flushed response.
///
/// The error type is [`Infallible`]: every failure becomes a status code
/// here, so hyper never sees an error.
async fn dispatch(
    dispatcher: Arc<Dispatcher>,
    req: hyper::Request<Incoming>,
    peer: SocketAddr,
) -> Result<http::Response<Full<Bytes>>, Infallible> {
    let (mut parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(%peer, "failed to read request body: {e}");
            return Ok(bare(StatusCode::BAD_REQUEST));
        }
    };
    parts.extensions.insert(peer);
    let request = http::Request::from_parts(parts, body);

    let response = match tokio::task::spawn_blocking(move || dispatcher.dispatch(request)).await {
        Ok(response) => response.map(Full::new),
        // Only reachable when a panic escapes every middleware.
        Err(e) => {
            error!(%peer, "request task failed: {e}");
            bare(StatusCode::INTERNAL_SERVER_ERROR)
        }
    };
    Ok(response)
}

fn bare(status: StatusCode) -> http::Response<Full<Bytes>> {
    let mut res = http::Response::new(Full::new(Bytes::new()));
    *res.status_mut() = status;
    res
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first SIGTERM (Unix only) or Ctrl-C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}

//! Sessions.
//!
//! Three collaborators, each behind a trait so storage and transport can be
//! swapped independently:
//!
//! - a [`Store`] creates, finds, refreshes and removes [`Session`]s by id;
//! - a [`Propagator`] carries the id between client and server;
//! - the [`Manager`] ties the two together for a request.
//!
//! [`MemoryStore`] and [`CookiePropagator`] are the bundled implementations.
//!
//! ```rust
//! use std::time::Duration;
//!
//! use sprig::session::{CookiePropagator, Manager, MemoryStore};
//! use sprig::{Router, StatusCode};
//!
//! let sessions = Manager::new(
//!     MemoryStore::new(Duration::from_secs(30 * 60)),
//!     CookiePropagator::new("sessid"),
//! );
//! let app = Router::new()
//!     .use_middleware([sessions.middleware()])
//!     .get("/me", |ctx| {
//!         let Some(sessions) = Manager::from_context(ctx) else { return };
//!         match sessions.get_session(ctx).and_then(|s| s.get("user")) {
//!             Ok(user) => ctx.set_body(user),
//!             Err(_) => ctx.set_status(StatusCode::UNAUTHORIZED),
//!         }
//!     });
//! # let _ = app;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cookie::Cookie;
use dashmap::DashMap;
use thiserror::Error;

use crate::context::Context;
use crate::error::ContextError;
use crate::handler::{Handler, Middleware};

/// A session failure.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session `{0}` not found")]
    NotFound(String),

    #[error("session key `{0}` not found")]
    KeyNotFound(String),

    #[error("request carries no session id")]
    NoSessionId,

    #[error(transparent)]
    Context(#[from] ContextError),
}

/// One user's server-side state.
pub trait Session: Send + Sync {
    fn id(&self) -> &str;
    fn get(&self, key: &str) -> Result<String, SessionError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SessionError>;
}

/// Session storage.
pub trait Store: Send + Sync {
    /// Creates an empty session under `id`, replacing any previous one.
    fn generate(&self, id: &str) -> Result<Arc<dyn Session>, SessionError>;
    fn get(&self, id: &str) -> Result<Arc<dyn Session>, SessionError>;
    /// Pushes the expiry of `id` back by a full lifetime.
    fn refresh(&self, id: &str) -> Result<(), SessionError>;
    fn remove(&self, id: &str) -> Result<(), SessionError>;
}

/// Moves the session id between client and server.
pub trait Propagator: Send + Sync {
    fn inject(&self, id: &str, ctx: &mut Context) -> Result<(), SessionError>;
    fn extract(&self, ctx: &Context) -> Result<String, SessionError>;
    /// Tells the client to forget the id.
    fn remove(&self, ctx: &mut Context) -> Result<(), SessionError>;
}

// ── Manager ───────────────────────────────────────────────────────────────────

/// The session of the current request, cached on the context.
#[derive(Clone)]
struct Current(Arc<dyn Session>);

/// Glue between a [`Store`] and a [`Propagator`]. Cheap to clone.
#[derive(Clone)]
pub struct Manager {
    store: Arc<dyn Store>,
    propagator: Arc<dyn Propagator>,
}

impl Manager {
    pub fn new(store: impl Store + 'static, propagator: impl Propagator + 'static) -> Self {
        Self { store: Arc::new(store), propagator: Arc::new(propagator) }
    }

    /// Makes this manager available to everything inside the middleware
    /// through [`Manager::from_context`].
    pub fn middleware(&self) -> Middleware {
        let manager = self.clone();
        Middleware::new(move |next| {
            let manager = manager.clone();
            Handler::new(move |ctx| {
                ctx.insert_user_value(manager.clone());
                next.call(ctx);
            })
        })
    }

    pub fn from_context(ctx: &Context) -> Option<Manager> {
        ctx.user_value::<Manager>().cloned()
    }

    /// Starts a session under `id` and hands the id to the client.
    pub fn init_session(&self, ctx: &mut Context, id: &str) -> Result<Arc<dyn Session>, SessionError> {
        let session = self.store.generate(id)?;
        self.propagator.inject(id, ctx)?;
        ctx.insert_user_value(Current(Arc::clone(&session)));
        Ok(session)
    }

    /// The session the request belongs to. Looked up once per request.
    pub fn get_session(&self, ctx: &mut Context) -> Result<Arc<dyn Session>, SessionError> {
        if let Some(Current(session)) = ctx.user_value::<Current>() {
            return Ok(Arc::clone(session));
        }
        let id = self.propagator.extract(ctx)?;
        let session = self.store.get(&id)?;
        ctx.insert_user_value(Current(Arc::clone(&session)));
        Ok(session)
    }

    pub fn refresh_session(&self, ctx: &mut Context) -> Result<(), SessionError> {
        let session = self.get_session(ctx)?;
        self.store.refresh(session.id())
    }

    /// Deletes the session server-side and clears it on the client.
    pub fn remove_session(&self, ctx: &mut Context) -> Result<(), SessionError> {
        let session = self.get_session(ctx)?;
        self.store.remove(session.id())?;
        self.propagator.remove(ctx)?;
        ctx.take_user_value::<Current>();
        Ok(())
    }
}

impl fmt::Debug for Manager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Manager(..)")
    }
}

// ── Memory store ──────────────────────────────────────────────────────────────

struct Entry {
    session: Arc<MemorySession>,
    expires: Instant,
}

/// An in-process [`Store`]. Sessions expire `ttl` after their last
/// generate or refresh; expired entries are dropped when next looked up, or
/// in bulk by [`purge_expired`](MemoryStore::purge_expired).
pub struct MemoryStore {
    sessions: DashMap<String, Entry>,
    ttl: Duration,
}

impl MemoryStore {
    pub fn new(ttl: Duration) -> Self {
        Self { sessions: DashMap::new(), ttl }
    }

    /// Drops every expired session. Returns how many remain.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        self.sessions.retain(|_, e| e.expires > now);
        self.sessions.len()
    }
}

impl Store for MemoryStore {
    fn generate(&self, id: &str) -> Result<Arc<dyn Session>, SessionError> {
        let session = Arc::new(MemorySession { id: id.to_owned(), values: DashMap::new() });
        let entry = Entry { session: Arc::clone(&session), expires: Instant::now() + self.ttl };
        self.sessions.insert(id.to_owned(), entry);
        Ok(session as Arc<dyn Session>)
    }

    fn get(&self, id: &str) -> Result<Arc<dyn Session>, SessionError> {
        let now = Instant::now();
        let live = self
            .sessions
            .get(id)
            .map(|e| (e.expires > now).then(|| Arc::clone(&e.session)));
        match live {
            Some(Some(session)) => Ok(session as Arc<dyn Session>),
            Some(None) => {
                self.sessions.remove_if(id, |_, e| e.expires <= now);
                Err(SessionError::NotFound(id.to_owned()))
            }
            None => Err(SessionError::NotFound(id.to_owned())),
        }
    }

    fn refresh(&self, id: &str) -> Result<(), SessionError> {
        let now = Instant::now();
        match self.sessions.get_mut(id) {
            Some(mut e) if e.expires > now => {
                e.expires = now + self.ttl;
                Ok(())
            }
            _ => Err(SessionError::NotFound(id.to_owned())),
        }
    }

    fn remove(&self, id: &str) -> Result<(), SessionError> {
        self.sessions.remove(id);
        Ok(())
    }
}

struct MemorySession {
    id: String,
    values: DashMap<String, String>,
}

impl Session for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    fn get(&self, key: &str) -> Result<String, SessionError> {
        self.values
            .get(key)
            .map(|v| v.value().clone())
            .ok_or_else(|| SessionError::KeyNotFound(key.to_owned()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SessionError> {
        self.values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

// ── Cookie propagator ─────────────────────────────────────────────────────────

type CookieOption = Arc<dyn Fn(&mut Cookie<'static>) + Send + Sync>;

/// Carries the session id in a cookie. By default the cookie is
/// `Path=/; HttpOnly`; adjust it with
/// [`cookie_option`](CookiePropagator::cookie_option).
pub struct CookiePropagator {
    name: String,
    option: CookieOption,
}

impl CookiePropagator {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), option: Arc::new(|_: &mut Cookie<'static>| {}) }
    }

    /// Runs on every outgoing session cookie, removal cookies included.
    pub fn cookie_option<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Cookie<'static>) + Send + Sync + 'static,
    {
        self.option = Arc::new(f);
        self
    }

    fn cookie(&self, value: String) -> Cookie<'static> {
        let mut cookie = Cookie::new(self.name.clone(), value);
        cookie.set_path("/");
        cookie.set_http_only(true);
        (self.option)(&mut cookie);
        cookie
    }
}

impl Propagator for CookiePropagator {
    fn inject(&self, id: &str, ctx: &mut Context) -> Result<(), SessionError> {
        ctx.set_cookie(self.cookie(id.to_owned()))?;
        Ok(())
    }

    fn extract(&self, ctx: &Context) -> Result<String, SessionError> {
        ctx.cookie(&self.name)
            .map(|c| c.value().to_owned())
            .ok_or(SessionError::NoSessionId)
    }

    fn remove(&self, ctx: &mut Context) -> Result<(), SessionError> {
        let mut cookie = self.cookie(String::new());
        cookie.make_removal();
        ctx.set_cookie(cookie)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use cookie::SameSite;
    use http::StatusCode;
    use http::header::{COOKIE, SET_COOKIE};

    use super::*;
    use crate::Router;

    #[test]
    fn memory_store_lifecycle() {
        let store = MemoryStore::new(Duration::from_secs(60));
        let s = store.generate("abc").unwrap();
        s.set("user", "alice").unwrap();

        let again = store.get("abc").unwrap();
        assert_eq!(again.id(), "abc");
        assert_eq!(again.get("user").unwrap(), "alice");
        assert!(matches!(again.get("role"), Err(SessionError::KeyNotFound(_))));

        store.refresh("abc").unwrap();
        store.remove("abc").unwrap();
        assert!(matches!(store.get("abc"), Err(SessionError::NotFound(_))));
        assert!(store.refresh("abc").is_err());
    }

    #[test]
    fn expired_sessions_are_gone() {
        let store = MemoryStore::new(Duration::ZERO);
        store.generate("a").unwrap();
        store.generate("b").unwrap();

        assert!(matches!(store.get("a"), Err(SessionError::NotFound(_))));
        assert!(store.refresh("b").is_err());
        assert_eq!(store.purge_expired(), 0);
    }

    #[test]
    fn login_read_logout_round_trip() {
        let sessions = Manager::new(
            MemoryStore::new(Duration::from_secs(60)),
            CookiePropagator::new("sessid").cookie_option(|c| c.set_same_site(SameSite::Strict)),
        );
        let d = Router::new()
            .use_middleware([sessions.middleware()])
            .post("/login", |ctx| {
                let m = Manager::from_context(ctx).unwrap();
                let s = m.init_session(ctx, "id-1").unwrap();
                s.set("user", "alice").unwrap();
            })
            .get("/me", |ctx| {
                let m = Manager::from_context(ctx).unwrap();
                match m.get_session(ctx).and_then(|s| s.get("user")) {
                    Ok(user) => ctx.set_body(user),
                    Err(_) => ctx.set_status(StatusCode::UNAUTHORIZED),
                }
            })
            .post("/logout", |ctx| {
                let m = Manager::from_context(ctx).unwrap();
                m.remove_session(ctx).unwrap();
            })
            .resolve();
        let with_cookie = |method: http::Method, path: &str, cookie: &str| {
            let mut req = http::Request::new(Bytes::new());
            *req.method_mut() = method;
            *req.uri_mut() = path.parse().unwrap();
            if !cookie.is_empty() {
                req.headers_mut().insert(COOKIE, cookie.parse().unwrap());
            }
            d.dispatch(req)
        };

        let res = with_cookie(http::Method::POST, "/login", "");
        let set = res.headers()[SET_COOKIE].to_str().unwrap().to_owned();
        assert!(set.starts_with("sessid=id-1;"), "{set}");
        assert!(set.contains("HttpOnly") && set.contains("SameSite=Strict"), "{set}");

        let res = with_cookie(http::Method::GET, "/me", "sessid=id-1");
        assert_eq!(res.body().as_ref(), b"alice");

        assert_eq!(
            with_cookie(http::Method::GET, "/me", "").status(),
            StatusCode::UNAUTHORIZED
        );

        let res = with_cookie(http::Method::POST, "/logout", "sessid=id-1");
        let cleared = res.headers()[SET_COOKIE].to_str().unwrap();
        assert!(cleared.starts_with("sessid=;"), "{cleared}");
        assert!(cleared.contains("Max-Age=0"), "{cleared}");

        assert_eq!(
            with_cookie(http::Method::GET, "/me", "sessid=id-1").status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn session_is_cached_per_request() {
        let store = MemoryStore::new(Duration::from_secs(60));
        store.generate("x").unwrap();
        let m = Manager::new(store, CookiePropagator::new("sid"));

        let req = http::Request::builder()
            .header(COOKIE, "sid=x")
            .body(Bytes::new())
            .unwrap();
        let mut ctx = Context::new(req);
        let first = m.get_session(&mut ctx).unwrap();
        m.store.remove("x").unwrap();
        // Still served from the context, not the store.
        let second = m.get_session(&mut ctx).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }
}

//! The response sink.
//!
//! Handlers normally never touch [`ResponseWriter`] directly: they buffer a
//! status and payload on the [`Context`](crate::Context) and the dispatcher
//! flushes it once the whole chain has returned. Writing to the sink
//! directly bypasses the buffer, so middleware will not see those bytes.

use bytes::{Bytes, BytesMut};
use cookie::Cookie;
use http::header::{HeaderMap, HeaderValue, SET_COOKIE};
use http::StatusCode;
use tracing::warn;

// ── ResponseWriter ────────────────────────────────────────────────────────────

/// Accumulates the outgoing status, headers and body for one request.
#[derive(Debug, Default)]
pub struct ResponseWriter {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
    /// `write_head` and `write` calls, including ignored ones.
    #[cfg(test)]
    calls: (usize, usize),
}

impl ResponseWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the status line. Only the first call takes effect.
    pub fn write_head(&mut self, status: StatusCode) {
        #[cfg(test)]
        {
            self.calls.0 += 1;
        }
        match self.status {
            None => self.status = Some(status),
            Some(written) => warn!(%written, ignored = %status, "status already written"),
        }
    }

    /// Appends to the body. Implies `200 OK` if no status was written yet.
    pub fn write(&mut self, chunk: &[u8]) {
        #[cfg(test)]
        {
            self.calls.1 += 1;
        }
        if self.status.is_none() {
            self.status = Some(StatusCode::OK);
        }
        self.body.extend_from_slice(chunk);
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Converts into an `http` response. An untouched writer is `200 OK`.
    pub fn into_response(self) -> http::Response<Bytes> {
        let mut res = http::Response::new(self.body.freeze());
        *res.status_mut() = self.status.unwrap_or(StatusCode::OK);
        *res.headers_mut() = self.headers;
        res
    }

    #[cfg(test)]
    pub(crate) fn calls(&self) -> (usize, usize) {
        self.calls
    }

    /// Adds one `Set-Cookie` header. Name and value are percent-encoded, so
    /// a value cannot smuggle in attributes of its own.
    pub(crate) fn append_cookie(&mut self, cookie: &Cookie<'_>) -> Result<(), http::header::InvalidHeaderValue> {
        let value = HeaderValue::from_str(&cookie.encoded().to_string())?;
        self.headers.append(SET_COOKIE, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use cookie::SameSite;

    use super::*;

    #[test]
    fn first_status_wins() {
        let mut w = ResponseWriter::new();
        w.write_head(StatusCode::NOT_FOUND);
        w.write_head(StatusCode::OK);
        w.write(b"gone");

        let res = w.into_response();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
        assert_eq!(res.body().as_ref(), b"gone");
    }

    #[test]
    fn write_without_head_is_ok() {
        let mut w = ResponseWriter::new();
        w.write(b"a");
        w.write(b"b");
        assert_eq!(w.status(), Some(StatusCode::OK));
        assert_eq!(w.body(), b"ab");
    }

    #[test]
    fn cookie_attributes() {
        let mut w = ResponseWriter::new();
        let c = Cookie::build(("id", "42"))
            .path("/")
            .domain("example.com")
            .secure(true)
            .http_only(true)
            .same_site(SameSite::Lax)
            .build();
        w.append_cookie(&c).unwrap();

        let header = w.headers()[SET_COOKIE].to_str().unwrap();
        assert!(header.starts_with("id=42;"), "{header}");
        for attr in ["Path=/", "Domain=example.com", "Secure", "HttpOnly", "SameSite=Lax"] {
            assert!(header.contains(attr), "{attr} missing from {header}");
        }
    }

    #[test]
    fn cookies_are_appended_not_replaced() {
        let mut w = ResponseWriter::new();
        w.append_cookie(&Cookie::new("a", "1")).unwrap();
        w.append_cookie(&Cookie::new("b", "2")).unwrap();
        assert_eq!(w.headers().get_all(SET_COOKIE).iter().count(), 2);
    }

    #[test]
    fn cookie_value_cannot_add_attributes() {
        let mut w = ResponseWriter::new();
        w.append_cookie(&Cookie::new("session", "abc; Domain=evil.com\n")).unwrap();

        let header = w.headers()[SET_COOKIE].to_str().unwrap();
        assert!(header.starts_with("session=abc%3B"), "{header}");
        assert!(!header.contains("Domain="), "{header}");
    }
}

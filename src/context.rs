//! Per-request state.
//!
//! A [`Context`] is created for every inbound request, handed by `&mut` down
//! the whole middleware chain, and dropped once the response is flushed.
//! Nothing written to it reaches the client until the chain returns, so
//! outer middleware can still rewrite the status or payload after an inner
//! handler has run.

use std::cell::OnceCell;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use cookie::Cookie;
use http::header::{CONTENT_TYPE, COOKIE, LOCATION};
use http::{Extensions, HeaderValue, Method, Request, StatusCode};
use serde::Serialize;
use url::form_urlencoded;

use crate::error::ContextError;
use crate::response::ResponseWriter;
use crate::template::Renderer;

/// Parsed `key=value` pairs; the first occurrence of a key wins.
type Values = HashMap<String, String>;

pub struct Context {
    request: Request<Bytes>,
    response: ResponseWriter,

    status: Option<StatusCode>,
    body: Vec<u8>,

    params: Option<HashMap<String, String>>,
    matched_route: String,

    query: OnceCell<Values>,
    form: OnceCell<Values>,

    renderer: Option<Arc<dyn Renderer>>,
    user_values: Extensions,
}

impl Context {
    pub fn new(request: Request<Bytes>) -> Self {
        Self {
            request,
            response: ResponseWriter::new(),
            status: None,
            body: Vec::new(),
            params: None,
            matched_route: String::new(),
            query: OnceCell::new(),
            form: OnceCell::new(),
            renderer: None,
            user_values: Extensions::new(),
        }
    }

    pub(crate) fn with_renderer(mut self, renderer: Option<Arc<dyn Renderer>>) -> Self {
        self.renderer = renderer;
        self
    }

    // ── Request ───────────────────────────────────────────────────────────────

    pub fn request(&self) -> &Request<Bytes> {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request<Bytes> {
        &mut self.request
    }

    pub fn method(&self) -> &Method {
        self.request.method()
    }

    pub fn path(&self) -> &str {
        self.request.uri().path()
    }

    /// Case-insensitive header lookup. Non-UTF-8 values are skipped.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.headers().get(name)?.to_str().ok()
    }

    /// A request cookie by name, percent-decoded. Looks through every
    /// `Cookie` header; the first match wins and unparsable pairs are skipped.
    pub fn cookie(&self, name: &str) -> Option<Cookie<'static>> {
        self.request
            .headers()
            .get_all(COOKIE)
            .iter()
            .filter_map(|h| h.to_str().ok())
            .flat_map(Cookie::split_parse_encoded)
            .filter_map(Result::ok)
            .find(|c| c.name() == name)
            .map(Cookie::into_owned)
    }

    pub fn request_body(&self) -> &Bytes {
        self.request.body()
    }

    /// The peer address, when the request came through [`Server`](crate::Server).
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.request.extensions().get::<SocketAddr>().copied()
    }

    /// The pattern that matched, e.g. `/users/:id`. Empty until routing ran
    /// or when nothing matched.
    pub fn matched_route(&self) -> &str {
        &self.matched_route
    }

    pub(crate) fn set_match(&mut self, params: Option<HashMap<String, String>>, route: String) {
        self.params = params;
        self.matched_route = route;
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    /// A captured path parameter.
    ///
    /// For `/users/:id`, `ctx.path_value("id")` on `/users/42` is `Ok("42")`.
    pub fn path_value(&self, key: &str) -> Result<&str, ContextError> {
        self.params
            .as_ref()
            .and_then(|p| p.get(key))
            .map(String::as_str)
            .ok_or_else(|| ContextError::NotFound(key.to_owned()))
    }

    pub fn path_value_as<T>(&self, key: &str) -> Result<T, ContextError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        parse_value(key, self.path_value(key)?)
    }

    /// A query-string parameter, percent-decoded. The query string is parsed
    /// once, on first use; repeated keys keep their first value.
    pub fn query_value(&self, key: &str) -> Result<&str, ContextError> {
        self.query
            .get_or_init(|| parse_pairs(self.request.uri().query().unwrap_or("").as_bytes()))
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ContextError::NotFound(key.to_owned()))
    }

    pub fn query_value_as<T>(&self, key: &str) -> Result<T, ContextError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        parse_value(key, self.query_value(key)?)
    }

    /// A form field. Fields of a `application/x-www-form-urlencoded` body
    /// take precedence over query parameters of the same name.
    pub fn form_value(&self, key: &str) -> Result<&str, ContextError> {
        let form = self.form.get_or_init(|| {
            let mut values = if self.is_form_body() {
                parse_pairs(self.request.body())
            } else {
                Values::new()
            };
            if let Some(query) = self.request.uri().query() {
                for (k, v) in parse_pairs(query.as_bytes()) {
                    values.entry(k).or_insert(v);
                }
            }
            values
        });
        form.get(key)
            .map(String::as_str)
            .ok_or_else(|| ContextError::NotFound(key.to_owned()))
    }

    fn is_form_body(&self) -> bool {
        self.header(CONTENT_TYPE.as_str())
            .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
    }

    /// Deserializes the request body as JSON.
    pub fn bind_json<T: serde::de::DeserializeOwned>(&self) -> Result<T, ContextError> {
        Ok(serde_json::from_slice(self.request.body())?)
    }

    // ── Buffered response ─────────────────────────────────────────────────────

    /// The buffered status; `None` until someone sets it.
    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = body.into();
    }

    pub fn set_response(&mut self, status: StatusCode, body: impl Into<Vec<u8>>) {
        self.status = Some(status);
        self.body = body.into();
    }

    /// Buffers `value` as a JSON payload with `status`.
    pub fn write_json<T: Serialize>(&mut self, status: StatusCode, value: &T) -> Result<(), ContextError> {
        let bytes = serde_json::to_vec(value)?;
        self.response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.set_response(status, bytes);
        Ok(())
    }

    /// Direct access to the sink, for headers. Bytes written here bypass the
    /// buffer and are invisible to middleware.
    pub fn response_mut(&mut self) -> &mut ResponseWriter {
        &mut self.response
    }

    /// Appends a `Set-Cookie` header. Name and value are percent-encoded.
    pub fn set_cookie(&mut self, cookie: Cookie<'static>) -> Result<(), ContextError> {
        Ok(self.response.append_cookie(&cookie)?)
    }

    /// `302 Found` to `target`.
    pub fn redirect(&mut self, target: &str) -> Result<(), ContextError> {
        let location = HeaderValue::from_str(target)?;
        self.response.headers_mut().insert(LOCATION, location);
        self.set_response(StatusCode::FOUND, Vec::new());
        Ok(())
    }

    /// Renders `template` with `data` through the configured renderer.
    ///
    /// On success the payload is the rendered page with `200 OK`; on any
    /// failure the status is `500` and the error is returned to the caller.
    pub fn render<T: Serialize>(&mut self, template: &str, data: &T) -> Result<(), ContextError> {
        let rendered = self.try_render(template, data);
        match rendered {
            Ok(page) => {
                self.response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
                self.set_response(StatusCode::OK, page);
                Ok(())
            }
            Err(e) => {
                self.set_status(StatusCode::INTERNAL_SERVER_ERROR);
                Err(e)
            }
        }
    }

    fn try_render<T: Serialize>(&self, template: &str, data: &T) -> Result<Vec<u8>, ContextError> {
        let renderer = self.renderer.as_ref().ok_or(ContextError::NoRenderer)?;
        let data = serde_json::to_value(data)?;
        Ok(renderer.render(template, &data)?)
    }

    // ── User values ───────────────────────────────────────────────────────────

    /// Stores a value for later middleware or the handler, keyed by its type.
    /// Returns the previous value of the same type, if any.
    pub fn insert_user_value<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.user_values.insert(value)
    }

    pub fn user_value<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.user_values.get::<T>()
    }

    pub fn take_user_value<T: Send + Sync + 'static>(&mut self) -> Option<T> {
        self.user_values.remove::<T>()
    }

    // ── Flush ─────────────────────────────────────────────────────────────────

    /// Writes the buffered status and payload to the sink.
    pub(crate) fn flush(&mut self) {
        if let Some(status) = self.status {
            self.response.write_head(status);
        }
        let body = std::mem::take(&mut self.body);
        self.response.write(&body);
    }

    pub(crate) fn into_response(self) -> http::Response<Bytes> {
        self.response.into_response()
    }
}

fn parse_pairs(input: &[u8]) -> Values {
    let mut values = Values::new();
    for (k, v) in form_urlencoded::parse(input) {
        values.entry(k.into_owned()).or_insert_with(|| v.into_owned());
    }
    values
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ContextError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ContextError::InvalidValue {
        key: key.to_owned(),
        value: raw.to_owned(),
        reason: e.to_string(),
    })
}

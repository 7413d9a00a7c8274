//! HTTP/1.1 responses.
//!
//! [`Response`] is the value every handler returns. [`Responder`] is the
//! "response" service that controllers and middleware reach through their
//! context: it knows the application URL and therefore owns redirects.

use bytes::{BufMut, BytesMut};
use thiserror::Error;

use super::{Headers, StatusCode};

/// Default content type for `send`, matching what server-rendered pages need.
const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use sprig::http::{Response, StatusCode};
///
/// let response = Response::send("<h1>hi</h1>", 200);
/// assert_eq!(response.status(), StatusCode::OK);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Type: text/html; charset=utf-8\r\n"));
/// assert!(text.contains("Content-Length: 11\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Vec<u8>,
    keep_alive: bool,
}

impl Response {
    /// Creates a response with the given status and an empty body.
    pub fn new(status: impl Into<StatusCode>) -> Self {
        Self {
            status: status.into(),
            headers: Headers::new(),
            body: Vec::new(),
            keep_alive: true,
        }
    }

    /// An HTML response carrying `body` with `status`.
    pub fn send(body: impl Into<String>, status: impl Into<StatusCode>) -> Self {
        Self::new(status)
            .header("Content-Type", HTML_CONTENT_TYPE)
            .body(body)
    }

    #[must_use]
    pub fn with_status(mut self, status: impl Into<StatusCode>) -> Self {
        self.status = status.into();
        self
    }

    /// Replaces the header `name` with `value`.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// In-place variant of [`header`](Self::header), for post-processing a
    /// response that has already been built.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    pub fn remove_header(&mut self, name: &str) -> bool {
        self.headers.remove(name)
    }

    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into().into_bytes();
        self
    }

    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_bytes(&self) -> &[u8] {
        &self.body
    }

    /// The body as text; invalid UTF-8 is replaced.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Serializes the response using HTTP/1.1 wire format.
    ///
    /// A `text/plain` content type is added for non-empty bodies that have
    /// none; `Content-Length` and `Connection` are always written.
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();

        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers.set("Content-Type", "text/plain; charset=utf-8");
        }
        self.headers.set(
            "Connection",
            if self.keep_alive { "keep-alive" } else { "close" },
        );
        self.headers
            .set("Content-Length", content_length.to_string());

        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 64 + content_length);
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        buf.put(self.headers.to_string().as_bytes());
        buf.put(&b"\r\n"[..]);
        buf.put(self.body.as_slice());
        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::OK)
    }
}

/// Reasons a redirect target is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RedirectError {
    #[error("external redirect not allowed: {0}")]
    External(String),

    #[error("redirect path must not contain '//': {0}")]
    DoubleSlash(String),
}

/// The response service handed to controllers and middleware.
///
/// Redirects are always resolved against the configured application URL;
/// absolute targets are refused so a handler can never be tricked into an
/// open redirect.
#[derive(Debug, Clone)]
pub struct Responder {
    app_url: String,
}

impl Responder {
    pub fn new(app_url: impl Into<String>) -> Self {
        Self {
            app_url: app_url.into(),
        }
    }

    /// Same as [`Response::send`].
    pub fn send(&self, body: impl Into<String>, status: impl Into<StatusCode>) -> Response {
        Response::send(body, status)
    }

    /// A redirect to `path` under the application URL, with an empty body.
    ///
    /// # Errors
    ///
    /// - [`RedirectError::External`] for `http://` or `https://` targets.
    /// - [`RedirectError::DoubleSlash`] for targets containing `//`.
    pub fn redirect(
        &self,
        path: &str,
        status: impl Into<StatusCode>,
    ) -> Result<Response, RedirectError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Err(RedirectError::External(path.to_owned()));
        }
        if path.contains("//") {
            return Err(RedirectError::DoubleSlash(path.to_owned()));
        }

        let location = format!(
            "{}/{}",
            self.app_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        tracing::debug!(%location, "redirecting");
        Ok(Response::new(status).header("Location", location))
    }
}

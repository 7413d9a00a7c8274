//! HTTP/1.1 request parsing using the [`httparse`] crate.
//!
//! Query-string and form values are exposed already normalised: percent-decoded,
//! UTF-8 validated, trimmed, and with empty values reported as absent. Handlers
//! never see the raw text.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::Bytes;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// Longest user agent string handed to application code.
const MAX_USER_AGENT: usize = 255;

/// A fully parsed HTTP/1.1 request.
///
/// # Examples
///
/// ```
/// use sprig::http::Request;
///
/// let raw = b"GET /users?name=%20Ana%20&page= HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.path(), "/users");
/// assert_eq!(request.query("name"), Some("Ana"));
/// assert_eq!(request.query("page"), None);
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
    query: HashMap<String, String>,
    form: HashMap<String, String>,
    peer: Option<SocketAddr>,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body begins
    /// in `buf`. When a `Content-Length` header is present only that many body
    /// bytes are kept.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: more data is needed to complete the request headers.
    /// - [`RequestError::Parse`]: the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`]: a required field (method, path, version) is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = match raw_req.method {
            Some(m) => match m.parse() {
                Ok(method) => method,
                Err(never) => match never {},
            },
            None => return Err(RequestError::MissingField { field: "method" }),
        };

        let target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        let (path, query_string) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (target, None),
        };
        let path = if path.is_empty() { "/" } else { path };

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.append(header.name, value);
            }
        }

        // Without Content-Length there is no body; what follows is the next request.
        let available = &buf[body_offset..];
        let body_len = header_map
            .get("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok())
            .map_or(0, |len| len.min(available.len()));
        let body = Bytes::copy_from_slice(&available[..body_len]);

        let query = query_string.map(parse_urlencoded).unwrap_or_default();
        let form = if is_form(&header_map) {
            std::str::from_utf8(&body)
                .map(parse_urlencoded)
                .unwrap_or_default()
        } else {
            HashMap::new()
        };

        Ok((
            Self {
                method,
                path: path.to_owned(),
                version,
                headers: header_map,
                body,
                query,
                form,
                peer: None,
            },
            body_offset,
        ))
    }

    /// Records the address of the connection the request arrived on.
    pub fn with_peer(mut self, peer: SocketAddr) -> Self {
        self.peer = Some(peer);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Normalised query-string value for `key`.
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// Normalised form-body value for `key`.
    ///
    /// Only `application/x-www-form-urlencoded` bodies are decoded.
    pub fn input(&self, key: &str) -> Option<&str> {
        self.form.get(key).map(String::as_str)
    }

    /// Every normalised form value, for handing to the validator in one go.
    pub fn inputs(&self) -> &HashMap<String, String> {
        &self.form
    }

    /// The `User-Agent` header, capped at 255 characters, or `"Unknown"`.
    pub fn user_agent(&self) -> String {
        match self.headers.get("user-agent").and_then(normalize) {
            Some(agent) => agent.chars().take(MAX_USER_AGENT).collect(),
            None => "Unknown".to_owned(),
        }
    }

    /// HTTP/1.1 defaults to keep-alive; HTTP/1.0 needs it asked for.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }

    /// Best guess at the client address.
    ///
    /// Tries `Client-IP`, then `X-Forwarded-For`, then the connection peer.
    /// Only the first comma-separated entry of a header counts and it must
    /// parse as an IP address. Falls back to `0.0.0.0`.
    pub fn ip(&self) -> IpAddr {
        ["client-ip", "x-forwarded-for"]
            .iter()
            .filter_map(|name| self.headers.get(name))
            .find_map(first_ip)
            .or_else(|| self.peer.map(|peer| peer.ip()))
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

fn first_ip(value: &str) -> Option<IpAddr> {
    value.split(',').next()?.trim().parse().ok()
}

fn is_form(headers: &Headers) -> bool {
    headers.get("content-type").is_some_and(|ct| {
        ct.trim()
            .to_ascii_lowercase()
            .starts_with("application/x-www-form-urlencoded")
    })
}

/// Decodes `key=value&...`, dropping pairs whose key or value normalise to nothing.
fn parse_urlencoded(input: &str) -> HashMap<String, String> {
    input
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            Some((normalize(key)?, normalize(value)?))
        })
        .collect()
}

// Percent-decode, reject invalid UTF-8, trim, and map empty to absent.
fn normalize(raw: &str) -> Option<String> {
    let spaced = raw.replace('+', " ");
    let decoded = urlencoding::decode(&spaced).ok()?;
    let trimmed = decoded.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

//! Security response headers applied to everything the app sends.

use crate::http::Response;

const CONTENT_SECURITY_POLICY: &[&str] = &[
    "default-src 'self'",
    "base-uri 'self'",
    "form-action 'self'",
    "frame-ancestors 'none'",
    "object-src 'none'",
    "img-src 'self'",
    "font-src 'self'",
    "style-src 'self'",
    "script-src 'self'",
    "connect-src 'self'",
    "media-src 'self'",
    "worker-src 'self'",
    "manifest-src 'self'",
    "upgrade-insecure-requests",
];

/// Header name/value pairs set on every response.
#[derive(Debug, Clone)]
pub struct SecureHeaders {
    headers: Vec<(&'static str, String)>,
}

impl Default for SecureHeaders {
    fn default() -> Self {
        Self {
            headers: vec![
                ("X-Content-Type-Options", "nosniff".to_owned()),
                ("X-Frame-Options", "DENY".to_owned()),
                ("Referrer-Policy", "strict-origin-when-cross-origin".to_owned()),
                (
                    "Strict-Transport-Security",
                    "max-age=31536000; includeSubDomains; preload".to_owned(),
                ),
                ("Content-Security-Policy", CONTENT_SECURITY_POLICY.join("; ")),
            ],
        }
    }
}

impl SecureHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces one header's value, or adds the header.
    #[must_use]
    pub fn with(mut self, name: &'static str, value: impl Into<String>) -> Self {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(existing, _)| existing.eq_ignore_ascii_case(name))
        {
            Some(entry) => entry.1 = value,
            None => self.headers.push((name, value)),
        }
        self
    }

    /// Sets every header on `response`, overriding values a handler chose.
    /// `X-Powered-By` is always removed.
    pub fn apply(&self, response: &mut Response) {
        response.remove_header("X-Powered-By");
        for (name, value) in &self.headers {
            response.set_header(*name, value.as_str());
        }
    }
}

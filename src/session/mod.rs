//! Request-scoped session state: key/value pairs, a one-shot flash message,
//! and the CSRF token.
//!
//! Nothing here outlives the request's container. Persisting a session
//! between requests (cookies, a store) is left to the application.

use std::cell::RefCell;
use std::collections::HashMap;

use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

const CSRF_BYTES: usize = 32;

/// A message shown once on the next rendered page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Flash {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Default)]
pub struct Session {
    values: RefCell<HashMap<String, Value>>,
    flash: RefCell<Option<Flash>>,
    csrf: RefCell<Option<String>>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.values.borrow_mut().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.values.borrow().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.values.borrow_mut().remove(key)
    }

    /// Drops every value, the flash message and the CSRF token.
    pub fn clear(&self) {
        self.values.borrow_mut().clear();
        self.flash.borrow_mut().take();
        self.csrf.borrow_mut().take();
    }

    /// Replaces the pending flash message.
    pub fn set_flash(&self, kind: impl Into<String>, message: impl Into<String>) {
        let flash = Flash {
            kind: kind.into(),
            message: message.into(),
        };
        debug!(kind = %flash.kind, "flash set");
        *self.flash.borrow_mut() = Some(flash);
    }

    /// Several messages joined into one flash, one per line.
    pub fn set_flash_lines<I, S>(&self, kind: impl Into<String>, lines: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let message = lines
            .into_iter()
            .map(|line| line.as_ref().to_owned())
            .collect::<Vec<_>>()
            .join("\n");
        self.set_flash(kind, message);
    }

    /// Returns the pending flash message and forgets it.
    pub fn take_flash(&self) -> Option<Flash> {
        self.flash.borrow_mut().take()
    }

    /// The session's CSRF token: 32 random bytes, hex encoded. Generated on
    /// first use and stable afterwards.
    pub fn csrf_token(&self) -> String {
        self.csrf
            .borrow_mut()
            .get_or_insert_with(|| {
                let bytes: [u8; CSRF_BYTES] = rand::rng().random();
                hex::encode(bytes)
            })
            .clone()
    }

    /// Compares `token` with the stored token in constant time. `false` when
    /// no token was ever issued.
    pub fn validate_csrf(&self, token: &str) -> bool {
        let stored = self.csrf.borrow();
        let Some(stored) = stored.as_deref() else {
            warn!("csrf check without an issued token");
            return false;
        };
        constant_time_eq(stored.as_bytes(), token.as_bytes())
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

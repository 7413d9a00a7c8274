//! Middleware: checks that run before a route's action and may answer in
//! its place.
//!
//! A middleware is an ordinary service: it is built by its provider (usually
//! from a [`MiddlewareContext`]) and registered with the router under a name.
//! Routes list the names they want, and the router runs them in that order.
//!
//! There is no "next" continuation. A middleware either lets the request
//! through with [`Flow::Continue`] or ends it with [`Flow::Halt`] and the
//! response to send, typically a redirect.
//!
//! ```
//! use std::rc::Rc;
//! use sprig::Error;
//! use sprig::context::MiddlewareContext;
//! use sprig::middleware::{Flow, Middleware};
//!
//! struct Authenticated {
//!     cx: Rc<MiddlewareContext>,
//! }
//!
//! impl Middleware for Authenticated {
//!     fn handle(&self) -> Result<Flow, Error> {
//!         if self.cx.session().get("user_id").is_some() {
//!             return Ok(Flow::Continue);
//!         }
//!         Ok(Flow::Halt(self.cx.response().redirect("/login", 302)?))
//!     }
//! }
//! ```

use std::rc::Rc;

use tracing::info;

use crate::Error;
use crate::context::MiddlewareContext;
use crate::http::Response;

/// What the router does after a middleware returns.
#[derive(Debug)]
pub enum Flow {
    /// Run the next middleware, or the action if this was the last one.
    Continue,
    /// Stop here and send this response.
    Halt(Response),
}

pub trait Middleware: 'static {
    fn handle(&self) -> Result<Flow, Error>;
}

/// Logs the method, path and user agent of every request it sees.
pub struct RequestLogger {
    cx: Rc<MiddlewareContext>,
}

impl RequestLogger {
    pub fn new(cx: Rc<MiddlewareContext>) -> Self {
        Self { cx }
    }
}

impl Middleware for RequestLogger {
    fn handle(&self) -> Result<Flow, Error> {
        let request = self.cx.request();
        info!(
            method = %request.method(),
            path = request.path(),
            ip = %request.ip(),
            user_agent = %request.user_agent(),
            "request"
        );
        Ok(Flow::Continue)
    }
}

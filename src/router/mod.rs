//! Request routing: map `METHOD /path` to a controller action behind a
//! middleware chain.
//!
//! Routes are kept per HTTP method and matched in registration order; the
//! first pattern that matches the whole path wins. Patterns are literal text
//! plus the `{id}` placeholder:
//!
//! | Pattern            | Matches         | Captured     | Falls through      |
//! |--------------------|-----------------|--------------|--------------------|
//! | `/users`           | `/users`        | *(none)*     | `/users/`          |
//! | `/users/{id}`      | `/users/42`     | `["42"]`     | `/users/007`, `/users/abc` |
//! | `/a/{id}/b/{id}`   | `/a/1/b/20`     | `["1", "20"]`| `/a/1/b/0`         |
//!
//! Handlers are referenced by `"Controller@method"` strings. Each reference is
//! bound to a function once, with [`Router::action`], and routes look their
//! action up when they are registered, so a typo fails at startup instead of
//! on the first request.
//!
//! ```
//! use std::sync::Arc;
//! use sprig::container::{Container, Providers};
//! use sprig::http::{Request, Response};
//! use sprig::router::Router;
//!
//! struct UserController;
//!
//! impl UserController {
//!     fn show(&self, params: &[String]) -> Result<Response, sprig::Error> {
//!         Ok(Response::send(format!("user {}", params[0]), 200))
//!     }
//! }
//!
//! let mut providers = Providers::new();
//! providers.register(|_| Ok(UserController));
//!
//! let mut router = Router::new();
//! router.action("UserController@show", UserController::show)?;
//! router.get("/users/{id}", "UserController@show", &[])?;
//!
//! let (request, _) = Request::parse(b"GET /users/42 HTTP/1.1\r\n\r\n").unwrap();
//! let container = Container::new(Arc::new(providers));
//! let response = router.dispatch(&container, &request)?;
//! assert_eq!(response.body_text(), "user 42");
//! # Ok::<(), sprig::Error>(())
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;
use thiserror::Error;
use tracing::{debug, trace};

use crate::container::Container;
use crate::http::{Method, Request, Response, StatusCode};
use crate::middleware::{Flow, Middleware};
use crate::Error;

const ID_PLACEHOLDER: &str = "{id}";
const ID_PATTERN: &str = "([1-9][0-9]*)";

pub const METHOD_NOT_ALLOWED_BODY: &str = "HTTP method not supported";
pub const NOT_FOUND_BODY: &str = "Page not found";

/// Errors raised while building the route table or dispatching through it.
#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("handler reference must look like `Controller@method`: {0:?}")]
    MalformedHandler(String),

    #[error("no action registered for handler {0:?}")]
    UnknownHandler(String),

    #[error("no middleware registered under {0:?}")]
    UnknownMiddleware(String),

    #[error("invalid route pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// A bound `Controller@method`: resolves the controller and calls the method
/// with the captured path parameters, in pattern order.
type Action = Arc<dyn Fn(&Container, &[String]) -> Result<Response, Error> + Send + Sync>;

/// A registered middleware: resolves the instance and runs it.
type MiddlewareRunner = Arc<dyn Fn(&Container) -> Result<Flow, Error> + Send + Sync>;

// Compiled, fully anchored form of a route pattern.
#[derive(Debug, Clone)]
struct Pattern {
    source: String,
    regex: Regex,
}

impl Pattern {
    fn parse(pattern: &str) -> Result<Self, RoutingError> {
        let body = pattern
            .split(ID_PLACEHOLDER)
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(ID_PATTERN);
        let regex = Regex::new(&format!("^{body}$")).map_err(|source| {
            RoutingError::InvalidPattern {
                pattern: pattern.to_owned(),
                source,
            }
        })?;
        Ok(Self {
            source: pattern.to_owned(),
            regex,
        })
    }

    // Captured `{id}` segments in order, or `None` when the path does not match.
    fn matches(&self, path: &str) -> Option<Vec<String>> {
        let captures = self.regex.captures(path)?;
        Some(
            captures
                .iter()
                .skip(1)
                .flatten()
                .map(|m| m.as_str().to_owned())
                .collect(),
        )
    }
}

struct Route {
    pattern: Pattern,
    handler: String,
    action: Action,
    middleware: Vec<String>,
}

/// The startup-built route table. Read-only once requests are flowing.
#[derive(Default)]
pub struct Router {
    actions: HashMap<String, Action>,
    middleware: HashMap<String, MiddlewareRunner>,
    routes: HashMap<Method, Vec<Route>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `handler` (`"Controller@method"`) to a method of the controller
    /// type `C`. The controller is resolved from the request's container each
    /// time the action runs.
    ///
    /// # Errors
    ///
    /// [`RoutingError::MalformedHandler`] when `handler` is not two non-empty
    /// names joined by a single `@`.
    pub fn action<C, F>(&mut self, handler: &str, method: F) -> Result<&mut Self, RoutingError>
    where
        C: 'static,
        F: Fn(&C, &[String]) -> Result<Response, Error> + Send + Sync + 'static,
    {
        parse_handler(handler)?;
        let action: Action = Arc::new(
            move |container: &Container, params: &[String]| -> Result<Response, Error> {
                let controller = container.resolve::<C>()?;
                method(&controller, params)
            },
        );
        self.actions.insert(handler.to_owned(), action);
        Ok(self)
    }

    /// Makes middleware type `M` available to routes under `name`.
    pub fn middleware<M: Middleware>(&mut self, name: &str) -> &mut Self {
        let runner: MiddlewareRunner =
            Arc::new(|container: &Container| -> Result<Flow, Error> {
                container.resolve::<M>()?.handle()
            });
        self.middleware.insert(name.to_owned(), runner);
        self
    }

    /// Registers a route after every route already registered for `method`.
    ///
    /// Empty middleware names are ignored.
    ///
    /// # Errors
    ///
    /// - [`RoutingError::MalformedHandler`] when `handler` is not `Controller@method`.
    /// - [`RoutingError::UnknownHandler`] when no [`Router::action`] was bound to it.
    /// - [`RoutingError::UnknownMiddleware`] for a middleware name that was never registered.
    pub fn route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: &str,
        middleware: &[&str],
    ) -> Result<&mut Self, RoutingError> {
        parse_handler(handler)?;
        let action = self
            .actions
            .get(handler)
            .cloned()
            .ok_or_else(|| RoutingError::UnknownHandler(handler.to_owned()))?;

        let middleware = middleware
            .iter()
            .filter(|name| !name.is_empty())
            .map(|name| {
                if self.middleware.contains_key(*name) {
                    Ok((*name).to_owned())
                } else {
                    Err(RoutingError::UnknownMiddleware((*name).to_owned()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        let pattern = Pattern::parse(pattern)?;
        debug!(%method, pattern = %pattern.source, handler, "route registered");
        self.routes.entry(method).or_default().push(Route {
            pattern,
            handler: handler.to_owned(),
            action,
            middleware,
        });
        Ok(self)
    }

    pub fn get(
        &mut self,
        pattern: &str,
        handler: &str,
        middleware: &[&str],
    ) -> Result<&mut Self, RoutingError> {
        self.route(Method::Get, pattern, handler, middleware)
    }

    pub fn post(
        &mut self,
        pattern: &str,
        handler: &str,
        middleware: &[&str],
    ) -> Result<&mut Self, RoutingError> {
        self.route(Method::Post, pattern, handler, middleware)
    }

    /// Number of registered routes across all methods.
    pub fn len(&self) -> usize {
        self.routes.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Routes `request` and produces its response.
    ///
    /// A method with no routes at all answers `405`; a path no route matches
    /// answers `404`. Both carry fixed plain-text bodies. Otherwise the matched
    /// route's middleware runs in order, and the first one to halt supplies the
    /// response; if none does, the action runs with the captured parameters.
    ///
    /// # Errors
    ///
    /// Anything a middleware, controller, or the container fails with.
    pub fn dispatch(&self, container: &Container, request: &Request) -> Result<Response, Error> {
        let method = request.method();
        let path = request.path();

        trace!(%method, "method lookup");
        let Some(routes) = self.routes.get(method).filter(|routes| !routes.is_empty()) else {
            debug!(%method, "method not allowed");
            return Ok(Response::send(
                METHOD_NOT_ALLOWED_BODY,
                StatusCode::METHOD_NOT_ALLOWED,
            ));
        };

        for route in routes {
            trace!(pattern = %route.pattern.source, path, "pattern match");
            let Some(params) = route.pattern.matches(path) else {
                continue;
            };

            for name in &route.middleware {
                trace!(middleware = %name, "middleware chain");
                let runner = self
                    .middleware
                    .get(name)
                    .ok_or_else(|| RoutingError::UnknownMiddleware(name.clone()))?;
                if let Flow::Halt(response) = runner(container)? {
                    debug!(middleware = %name, status = %response.status(), "request halted");
                    return Ok(response);
                }
            }

            debug!(handler = %route.handler, ?params, "handler invoke");
            return (route.action)(container, &params);
        }

        debug!(path, "no route matched");
        Ok(Response::send(NOT_FOUND_BODY, StatusCode::NOT_FOUND))
    }
}

// `Controller@method` with both halves non-empty and exactly one `@`.
fn parse_handler(handler: &str) -> Result<(&str, &str), RoutingError> {
    match handler.split_once('@') {
        Some((controller, method))
            if !controller.is_empty() && !method.is_empty() && !method.contains('@') =>
        {
            Ok((controller, method))
        }
        _ => Err(RoutingError::MalformedHandler(handler.to_owned())),
    }
}

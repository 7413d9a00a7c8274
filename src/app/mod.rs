//! The application boundary: one container per request, dispatch, and the
//! last line of error handling.
//!
//! ```
//! use sprig::app::App;
//! use sprig::config::Config;
//! use sprig::http::{Request, StatusCode};
//!
//! let app = App::builder(Config::default()).build();
//! let (request, _) = Request::parse(b"GET / HTTP/1.1\r\n\r\n").unwrap();
//! let response = app.handle(request);
//!
//! // nothing is routed yet
//! assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
//! assert_eq!(response.headers().get("X-Frame-Options"), Some("DENY"));
//! ```

use std::sync::Arc;

use tracing::{debug, error};

use crate::config::Config;
use crate::container::{Container, Providers};
use crate::context::{ControllerContext, MiddlewareContext};
use crate::database::SqliteDatabase;
use crate::http::{Request, Responder, Response, StatusCode};
use crate::middleware::RequestLogger;
use crate::router::Router;
use crate::security::SecureHeaders;
use crate::session::Session;
use crate::validator::Validator;
use crate::view::View;

pub const INTERNAL_ERROR_BODY: &str = "Internal server error";

/// Name the built-in [`RequestLogger`] is registered under.
pub const REQUEST_LOGGER: &str = "RequestLogger";

/// Assembles the provider table and the route table before the app starts.
///
/// [`App::builder`] pre-registers the framework services: [`Config`],
/// [`Responder`], [`Session`], [`Validator`], [`View`], [`SqliteDatabase`],
/// both contexts, and the [`RequestLogger`] middleware. Registering one of
/// these again replaces it.
pub struct AppBuilder {
    config: Config,
    providers: Providers,
    router: Router,
    secure_headers: SecureHeaders,
}

impl AppBuilder {
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn providers(&mut self) -> &mut Providers {
        &mut self.providers
    }

    pub fn router(&mut self) -> &mut Router {
        &mut self.router
    }

    #[must_use]
    pub fn secure_headers(mut self, headers: SecureHeaders) -> Self {
        self.secure_headers = headers;
        self
    }

    pub fn build(self) -> App {
        debug!(
            services = self.providers.len(),
            routes = self.router.len(),
            "app built"
        );
        App {
            providers: Arc::new(self.providers),
            router: Arc::new(self.router),
            config: Arc::new(self.config),
            secure_headers: self.secure_headers,
        }
    }
}

/// A built application. Immutable and shared by every request.
pub struct App {
    providers: Arc<Providers>,
    router: Arc<Router>,
    config: Arc<Config>,
    secure_headers: SecureHeaders,
}

impl App {
    pub fn builder(config: Config) -> AppBuilder {
        let mut providers = Providers::new();
        register_framework_services(&mut providers, &config);

        let mut router = Router::new();
        router.middleware::<RequestLogger>(REQUEST_LOGGER);

        AppBuilder {
            config,
            providers,
            router,
            secure_headers: SecureHeaders::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Handles one request in a fresh container.
    ///
    /// Errors from routing, middleware or controllers are logged and become a
    /// `500` with a fixed body. Security headers are set on every response.
    pub fn handle(&self, request: Request) -> Response {
        let keep_alive = request.is_keep_alive();
        let container = Container::new(Arc::clone(&self.providers));
        let request = container.instance(request);

        let mut response = match self.router.dispatch(&container, &request) {
            Ok(response) => response,
            Err(err) => {
                error!(
                    method = %request.method(),
                    path = request.path(),
                    error = %err,
                    "request failed"
                );
                Response::send(INTERNAL_ERROR_BODY, StatusCode::INTERNAL_SERVER_ERROR)
            }
        };
        self.secure_headers.apply(&mut response);
        response.keep_alive(keep_alive)
    }
}

fn register_framework_services(providers: &mut Providers, config: &Config) {
    let view = View::from_config(config);
    let app_url = config.app_url.clone();
    let database = config.database.clone();
    let config = config.clone();

    providers
        .register(move |_| Ok(config.clone()))
        .register(move |_| Ok(Responder::new(app_url.as_str())))
        .register(|_| Ok(Session::new()))
        .register(|_| Ok(Validator::new()))
        .register(move |_| Ok(view.clone()))
        .register(move |_| Ok(SqliteDatabase::open(database.as_str())))
        .register(ControllerContext::from_container)
        .register(MiddlewareContext::from_container)
        .register(|c| Ok(RequestLogger::new(c.resolve()?)));
}

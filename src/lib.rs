//! # sprig
//!
//! A small substrate for server-rendered web applications: a service
//! container with cycle detection, a router with an ordered middleware chain,
//! and a query builder that never interpolates values into SQL.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::rc::Rc;
//! use serde_json::json;
//! use sprig::app::App;
//! use sprig::config::Config;
//! use sprig::context::ControllerContext;
//! use sprig::http::Response;
//! use sprig::server::Server;
//! use sprig::Error;
//!
//! struct HomeController {
//!     cx: Rc<ControllerContext>,
//! }
//!
//! impl HomeController {
//!     fn index(&self, _params: &[String]) -> Result<Response, Error> {
//!         Ok(self.cx.render("home", json!({"title": "Welcome"}))?)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env();
//!     let bind = config.bind.to_string();
//!
//!     let mut app = App::builder(config);
//!     app.providers().register(|c| Ok(HomeController { cx: c.resolve()? }));
//!     app.router()
//!         .action("HomeController@index", HomeController::index)?
//!         .get("/", "HomeController@index", &[])?;
//!
//!     Server::bind(bind).await?.serve(app.build()).await?;
//!     Ok(())
//! }
//! ```

pub mod app;
pub mod config;
pub mod container;
pub mod context;
pub mod database;
mod error;
pub mod http;
pub mod middleware;
pub mod model;
pub mod router;
pub mod security;
pub mod server;
pub mod session;
pub mod validator;
pub mod view;

pub use app::App;
pub use container::{Container, ContainerError, Providers};
pub use error::Error;
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use model::{Entity, Query, Schema};
pub use router::{Router, RoutingError};
pub use server::{Server, ServerError};

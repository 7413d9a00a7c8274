//! A small user directory: list with pagination, show, create, delete.
//!
//! ```bash
//! RUST_LOG=sprig=debug cargo run --example users
//! ```
//!
//! Views are read from `demos/views` unless `SPRIG_VIEWS` says otherwise.
//! Each request opens its own connection, so `SPRIG_DATABASE=:memory:` would
//! start every request with an empty database; use a file.

use std::fs;
use std::path::Path;
use std::rc::Rc;

use serde_json::{Map, Value, json};
use sprig::app::{App, REQUEST_LOGGER};
use sprig::config::Config;
use sprig::context::{ControllerContext, MiddlewareContext};
use sprig::database::{Bindings, Database, SqliteDatabase};
use sprig::http::{Method, Response, StatusCode};
use sprig::middleware::{Flow, Middleware};
use sprig::model::Schema;
use sprig::server::Server;
use sprig::validator::Field;
use sprig::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

const PER_PAGE: u64 = 10;

struct User;

impl Schema for User {
    const FILLABLE: &'static [&'static str] = &["name", "email", "role"];
    const COLUMNS: &'static [&'static str] = &["id", "name", "email", "role"];
}

struct UserController {
    cx: Rc<ControllerContext>,
    db: Rc<SqliteDatabase>,
}

impl UserController {
    fn index(&self, _params: &[String]) -> Result<Response, Error> {
        let page = self
            .cx
            .request()
            .query("page")
            .and_then(|p| p.parse().ok())
            .unwrap_or(1);
        let users = User::query(&*self.db)
            .order_by("name", "asc")?
            .paginate(page, PER_PAGE)?;
        Ok(self.cx.render("users/index", json!({ "users": users }))?)
    }

    fn show(&self, params: &[String]) -> Result<Response, Error> {
        let Some(user) = self.find(&params[0])? else {
            return Ok(Response::send("Page not found", StatusCode::NOT_FOUND));
        };
        Ok(self.cx.render("users/show", json!({ "user": user }))?)
    }

    fn create(&self, _params: &[String]) -> Result<Response, Error> {
        Ok(self.cx.render("users/form", json!({ "old": {} }))?)
    }

    fn store(&self, _params: &[String]) -> Result<Response, Error> {
        let input = self.cx.request().inputs();
        let validator = self.cx.validator();
        validator.check(
            input,
            &[
                Field::new("name", "Name", "required|string|min:2|max:80"),
                Field::new("email", "Email", "required|string|max:120"),
                Field::new("role", "Role", "required|in:admin,member"),
            ],
        )?;
        if validator.fails() {
            self.cx.session().set_flash_lines("error", validator.errors());
            return Ok(self
                .cx
                .render("users/form", json!({ "old": input }))?
                .with_status(StatusCode::UNPROCESSABLE_ENTITY));
        }

        let data: Map<String, Value> = input
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        match User::query(&*self.db).create(data)? {
            Some(user) => {
                let id = user.id().cloned().unwrap_or(Value::Null);
                info!(%id, "user created");
                Ok(self.cx.response().redirect(&format!("/users/{id}"), StatusCode::SEE_OTHER)?)
            }
            None => Ok(self.cx.response().redirect("/users/new", StatusCode::SEE_OTHER)?),
        }
    }

    fn destroy(&self, params: &[String]) -> Result<Response, Error> {
        if let Some(user) = self.find(&params[0])? {
            user.delete(&*self.db)?;
        }
        Ok(self.cx.response().redirect("/users", StatusCode::SEE_OTHER)?)
    }

    fn find(&self, id: &str) -> Result<Option<sprig::Entity<User>>, Error> {
        // `{id}` only captures digits, but it may still overflow
        let Ok(id) = id.parse::<i64>() else {
            return Ok(None);
        };
        Ok(User::query(&*self.db).find(id)?)
    }
}

/// Refuses writes while `storage/maintenance` exists.
struct Maintenance {
    cx: Rc<MiddlewareContext>,
}

impl Middleware for Maintenance {
    fn handle(&self) -> Result<Flow, Error> {
        if !Path::new("storage/maintenance").exists() {
            return Ok(Flow::Continue);
        }
        self.cx
            .session()
            .set_flash("error", "The directory is read-only right now");
        Ok(Flow::Halt(
            self.cx.response().redirect("/users", StatusCode::SEE_OTHER)?,
        ))
    }
}

fn prepare_database(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    SqliteDatabase::open(path).execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            email TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'member'
        )",
        &Bindings::new(),
    )?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = Config::from_env();
    if std::env::var_os("SPRIG_VIEWS").is_none() {
        config.views = "demos/views".into();
    }
    prepare_database(&config.database)?;
    let bind = config.bind.to_string();

    let mut app = App::builder(config);
    app.providers()
        .register(|c| {
            Ok(UserController {
                cx: c.resolve()?,
                db: c.resolve()?,
            })
        })
        .register(|c| Ok(Maintenance { cx: c.resolve()? }));

    let router = app.router();
    router
        .middleware::<Maintenance>("Maintenance")
        .action("UserController@index", UserController::index)?
        .action("UserController@show", UserController::show)?
        .action("UserController@create", UserController::create)?
        .action("UserController@store", UserController::store)?
        .action("UserController@destroy", UserController::destroy)?;
    router
        .get("/users", "UserController@index", &[REQUEST_LOGGER])?
        .get("/users/new", "UserController@create", &[REQUEST_LOGGER])?
        .get("/users/{id}", "UserController@show", &[REQUEST_LOGGER])?
        .post("/users", "UserController@store", &[REQUEST_LOGGER, "Maintenance"])?
        .route(
            Method::Post,
            "/users/{id}/delete",
            "UserController@destroy",
            &[REQUEST_LOGGER, "Maintenance"],
        )?;

    Server::bind(bind).await?.serve(app.build()).await?;
    Ok(())
}

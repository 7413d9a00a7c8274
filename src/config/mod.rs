//! Application configuration loaded from `SPRIG_*` environment variables.
//!
//! | Variable         | Default                  |
//! |------------------|--------------------------|
//! | `SPRIG_BIND`     | `127.0.0.1:8080`         |
//! | `SPRIG_APP_URL`  | `http://localhost:8080`  |
//! | `SPRIG_APP_NAME` | `sprig`                  |
//! | `SPRIG_APP_DESCRIPTION` | (empty)           |
//! | `SPRIG_DATABASE` | `storage/app.sqlite3`    |
//! | `SPRIG_VIEWS`    | `views`                  |
//!
//! A variable that is unset, empty, or does not parse falls back to its
//! default. `SPRIG_DATABASE=:memory:` selects a private in-memory database.
//!
//! ```bash
//! SPRIG_BIND=0.0.0.0:3000 SPRIG_APP_URL=https://shop.example cargo run --example users
//! ```

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use tracing::warn;

const DEFAULT_APP_URL: &str = "http://localhost:8080";
const DEFAULT_APP_NAME: &str = "sprig";
const DEFAULT_DATABASE: &str = "storage/app.sqlite3";
const DEFAULT_VIEWS: &str = "views";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Address the server listens on.
    pub bind: SocketAddr,
    /// Public base URL; redirects and `url()` in views are built on it.
    pub app_url: String,
    pub app_name: String,
    /// Shown by views as `app_description`.
    pub app_description: String,
    /// SQLite database file, or `:memory:`.
    pub database: String,
    /// Directory holding the `.html` views.
    pub views: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            app_url: DEFAULT_APP_URL.to_owned(),
            app_name: DEFAULT_APP_NAME.to_owned(),
            app_description: String::new(),
            database: DEFAULT_DATABASE.to_owned(),
            views: PathBuf::from(DEFAULT_VIEWS),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds a config from any key → value source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind = match var("SPRIG_BIND") {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!(value = %raw, "SPRIG_BIND is not a socket address, using default");
                default_bind()
            }),
            None => default_bind(),
        };
        let app_url = match var("SPRIG_APP_URL") {
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => url,
            Some(url) => {
                warn!(value = %url, "SPRIG_APP_URL is not an http(s) URL, using default");
                DEFAULT_APP_URL.to_owned()
            }
            None => DEFAULT_APP_URL.to_owned(),
        };

        Self {
            bind,
            app_url,
            app_name: var("SPRIG_APP_NAME").unwrap_or_else(|| DEFAULT_APP_NAME.to_owned()),
            app_description: var("SPRIG_APP_DESCRIPTION").unwrap_or_default(),
            database: var("SPRIG_DATABASE").unwrap_or_else(|| DEFAULT_DATABASE.to_owned()),
            views: var("SPRIG_VIEWS")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_VIEWS)),
        }
    }
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

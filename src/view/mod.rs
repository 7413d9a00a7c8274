//! HTML views rendered with `minijinja`.
//!
//! Templates live under one directory as `<name>.html` and are auto-escaped.
//! Every template sees the `app_name` and `app_description` globals, the
//! helper functions `url`, `now`, `set` and `get`, and a handful of display
//! filters (`line_breaks`, `uppercase`, `lowercase`, `date`, `date_time`,
//! `decimal`, `cpf`, `dash`). `url` escapes quotes and markup itself and
//! leaves slashes alone, so its output reads naturally inside `href`
//! attributes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::format::{Item, StrftimeItems};
use chrono::{Local, NaiveDate, NaiveDateTime};
use minijinja::value::ValueKind;
use minijinja::{Environment, ErrorKind, State, Value, path_loader};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;

#[derive(Debug, Error)]
pub enum ViewError {
    #[error("view not found: {0}")]
    NotFound(String),

    #[error("view data must be a map, got {0}")]
    InvalidData(&'static str),

    #[error("failed to render view {name}: {source}")]
    Render {
        name: String,
        #[source]
        source: minijinja::Error,
    },
}

/// The template renderer. Cloning is cheap; all clones share one compiled
/// template cache.
#[derive(Clone)]
pub struct View {
    env: Arc<Environment<'static>>,
    dir: PathBuf,
}

impl View {
    /// A renderer with an empty `app_description`.
    pub fn new(dir: impl Into<PathBuf>, app_name: &str, app_url: &str) -> Self {
        Self::build(dir.into(), app_name, "", app_url)
    }

    pub fn from_config(config: &Config) -> Self {
        Self::build(
            config.views.clone(),
            &config.app_name,
            &config.app_description,
            &config.app_url,
        )
    }

    fn build(dir: PathBuf, app_name: &str, app_description: &str, app_url: &str) -> Self {
        let mut env = Environment::new();
        env.set_loader(path_loader(&dir));
        env.add_global("app_name", app_name.to_owned());
        env.add_global("app_description", app_description.to_owned());

        let base = app_url.trim_end_matches('/').to_owned();
        env.add_function("url", move |path: String| -> Value {
            let url = format!("{base}/{}", path.trim_start_matches('/'));
            Value::from_safe_string(escape_attribute(&url))
        });
        env.add_function("now", now);
        env.add_function("set", set_var);
        env.add_function("get", get_var);

        env.add_filter("line_breaks", line_breaks);
        env.add_filter("uppercase", uppercase);
        env.add_filter("lowercase", lowercase);
        env.add_filter("date", date);
        env.add_filter("date_time", date_time);
        env.add_filter("decimal", decimal);
        env.add_filter("cpf", cpf);
        env.add_filter("dash", dash);

        Self {
            env: Arc::new(env),
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Renders `<dir>/<name>.html`. Characters outside `[A-Za-z0-9/_-]` are
    /// dropped from `name` first, so it cannot leave the views directory.
    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> Result<String, ViewError> {
        let name = sanitize(name);
        let file = format!("{name}.html");
        debug!(view = %name, "rendering");

        let template = self.env.get_template(&file).map_err(|source| {
            if source.kind() == ErrorKind::TemplateNotFound {
                ViewError::NotFound(name.clone())
            } else {
                ViewError::Render {
                    name: name.clone(),
                    source,
                }
            }
        })?;
        template
            .render(data)
            .map_err(|source| ViewError::Render { name, source })
    }
}

const VAR_PREFIX: &str = "sprig.var.";

/// Formats the local time; an empty, non-string, or invalid format gives `""`.
fn now(format: Value) -> String {
    let Some(format) = format.as_str().filter(|f| !f.is_empty()) else {
        return String::new();
    };
    let items = StrftimeItems::new(format);
    if items.clone().any(|item| matches!(item, Item::Error)) {
        return String::new();
    }
    Local::now().format_with_items(items).to_string()
}

// Render-scoped; includes run on the same state and see the same variables.
fn set_var(state: &State, key: String, value: Value) -> Value {
    state.set_temp(&format!("{VAR_PREFIX}{key}"), value);
    Value::UNDEFINED
}

fn get_var(state: &State, key: String) -> Value {
    let found = match key.as_str() {
        "app_name" | "app_description" => state.lookup(&key),
        _ => state.get_temp(&format!("{VAR_PREFIX}{key}")),
    };
    found.unwrap_or(Value::UNDEFINED)
}

// The text a filter works on. Missing values and containers read as empty.
fn text(value: &Value) -> String {
    match value.kind() {
        ValueKind::Undefined | ValueKind::None | ValueKind::Seq | ValueKind::Map => String::new(),
        ValueKind::Bool if value.is_true() => "1".to_owned(),
        ValueKind::Bool => String::new(),
        _ => value.to_string(),
    }
}

// Keeps already-escaped input from being escaped twice.
fn same_safety(value: &Value, out: String) -> Value {
    if value.is_safe() {
        Value::from_safe_string(out)
    } else {
        Value::from(out)
    }
}

fn line_breaks(value: Value) -> Value {
    let raw = text(&value);
    let escaped = if value.is_safe() {
        raw
    } else {
        escape_attribute(&raw)
    };
    let html = escaped
        .replace("\r\n", "<br>")
        .replace('\r', "<br>")
        .replace('\n', "<br>");
    Value::from_safe_string(html)
}

fn uppercase(value: Value) -> Value {
    same_safety(&value, text(&value).to_uppercase())
}

fn lowercase(value: Value) -> Value {
    same_safety(&value, text(&value).to_lowercase())
}

fn date(value: Value) -> Value {
    let raw = text(&value);
    match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
        Ok(parsed) if parsed.format("%Y-%m-%d").to_string() == raw => {
            Value::from(parsed.format("%d/%m/%Y").to_string())
        }
        _ => value,
    }
}

fn date_time(value: Value) -> Value {
    let raw = text(&value);
    match NaiveDateTime::parse_from_str(&raw, "%Y-%m-%d %H:%M:%S") {
        Ok(parsed) if parsed.format("%Y-%m-%d %H:%M:%S").to_string() == raw => {
            Value::from(parsed.format("%d/%m/%Y %H:%M:%S").to_string())
        }
        _ => value,
    }
}

/// `1234.5` becomes `1.234,50`. Non-numeric input passes through.
fn decimal(value: Value) -> Value {
    let number = match text(&value).trim().parse::<f64>() {
        Ok(number) if number.is_finite() => number,
        _ => return value,
    };
    Value::from(format_decimal(number))
}

fn format_decimal(number: f64) -> String {
    let rounded = (number * 100.0).round() / 100.0;
    let fixed = format!("{:.2}", rounded.abs());
    let (whole, cents) = fixed.split_once('.').unwrap_or((&fixed, "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, digit) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(digit);
    }

    let sign = if rounded < 0.0 { "-" } else { "" };
    format!("{sign}{grouped},{cents}")
}

/// Formats 11 digits as a CPF and 14 digits as a CNPJ.
fn cpf(value: Value) -> Value {
    let digits: String = text(&value).chars().filter(char::is_ascii_digit).collect();
    let formatted = match digits.len() {
        11 => format!(
            "{}.{}.{}-{}",
            &digits[..3],
            &digits[3..6],
            &digits[6..9],
            &digits[9..]
        ),
        14 => format!(
            "{}.{}.{}/{}-{}",
            &digits[..2],
            &digits[2..5],
            &digits[5..8],
            &digits[8..12],
            &digits[12..]
        ),
        _ => return value,
    };
    Value::from(formatted)
}

fn dash(value: Value) -> Value {
    if text(&value).is_empty() {
        Value::from("\u{2014}")
    } else {
        value
    }
}

fn escape_attribute(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            c => out.push(c),
        }
    }
    out
}

fn sanitize(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '_' | '-'))
        .collect::<String>()
        .trim_start_matches('/')
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static NEXT_DIR: AtomicUsize = AtomicUsize::new(0);

    fn write_views(files: &[(&str, &str)]) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sprig-views-{}-{}",
            std::process::id(),
            NEXT_DIR.fetch_add(1, Ordering::SeqCst)
        ));
        for (name, source) in files {
            let path = dir.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, source).unwrap();
        }
        dir
    }

    fn views(files: &[(&str, &str)]) -> View {
        View::new(write_views(files), "Sprig", "https://app.test/")
    }

    fn render_one(source: &str, data: serde_json::Value) -> String {
        views(&[("one.html", source)]).render("one", &data).unwrap()
    }

    #[test]
    fn renders_with_escaping() {
        let view = views(&[("hello.html", "<p>{{ name }}</p>")]);
        let html = view
            .render("hello", &json!({"name": "<script>"}))
            .unwrap();
        assert_eq!(html, "<p>&lt;script&gt;</p>");
    }

    #[test]
    fn helpers_are_available() {
        let view = views(&[(
            "users/index.html",
            "{{ app_name }} {{ url('/users/1') }}",
        )]);
        let html = view.render("/users/index", &json!({})).unwrap();
        assert_eq!(html, "Sprig https://app.test/users/1");
    }

    #[test]
    fn url_output_cannot_break_out_of_an_attribute() {
        let view = views(&[("link.html", "<a href=\"{{ url(target) }}\">x</a>")]);
        let html = view
            .render("link", &json!({"target": "a\"onclick=\"x&y"}))
            .unwrap();
        assert_eq!(
            html,
            "<a href=\"https://app.test/a&quot;onclick=&quot;x&amp;y\">x</a>"
        );
    }

    #[test]
    fn includes_resolve_from_the_views_dir() {
        let view = views(&[
            ("layout/header.html", "<h1>{{ title }}</h1>"),
            ("page.html", "{% include 'layout/header.html' %}body"),
        ]);
        let html = view.render("page", &json!({"title": "Hi"})).unwrap();
        assert_eq!(html, "<h1>Hi</h1>body");
    }

    #[test]
    fn names_are_sanitized() {
        assert_eq!(sanitize("../../etc/passwd"), "etc/passwd");
        assert_eq!(sanitize("users/show.php"), "users/showphp");
        assert_eq!(sanitize("/a b/c"), "ab/c");
    }

    #[test]
    fn missing_view() {
        let view = views(&[]);
        assert!(matches!(
            view.render("nope", &json!({})),
            Err(ViewError::NotFound(name)) if name == "nope"
        ));
    }

    #[test]
    fn line_breaks_escapes_before_inserting_br() {
        let html = render_one("{{ note|line_breaks }}", json!({"note": "a<b>\r\nc\rd\ne"}));
        assert_eq!(html, "a&lt;b&gt;<br>c<br>d<br>e");
    }

    #[test]
    fn case_filters_handle_unicode() {
        let html = render_one(
            "{{ name|uppercase }} {{ name|lowercase }}",
            json!({"name": "Ação Ü"}),
        );
        assert_eq!(html, "AÇÃO Ü ação ü");
    }

    #[test]
    fn date_filters_only_touch_strict_dates() {
        let html = render_one(
            "{{ a|date }}|{{ b|date }}|{{ c|date }}|{{ d|date_time }}|{{ a|date_time }}",
            json!({
                "a": "2024-02-29",
                "b": "2023-02-29",
                "c": "2024-2-9",
                "d": "2024-03-01 09:05:00",
            }),
        );
        assert_eq!(html, "29/02/2024|2023-02-29|2024-2-9|01/03/2024 09:05:00|2024-02-29");
    }

    #[test]
    fn decimal_uses_comma_and_dot_grouping() {
        let html = render_one(
            "{{ a|decimal }}|{{ b|decimal }}|{{ c|decimal }}|{{ d|decimal }}",
            json!({"a": 1234.5, "b": "1234567.891", "c": 1000, "d": "n/a"}),
        );
        assert_eq!(html, "1.234,50|1.234.567,89|1.000,00|n/a");

        assert_eq!(format_decimal(-0.5), "-0,50");
        assert_eq!(format_decimal(-0.001), "0,00");
        assert_eq!(format_decimal(999.999), "1.000,00");
        assert_eq!(format_decimal(12.0), "12,00");
    }

    #[test]
    fn cpf_formats_eleven_and_fourteen_digits() {
        let html = render_one(
            "{{ a|cpf }}|{{ b|cpf }}|{{ c|cpf }}",
            json!({"a": "12345678901", "b": "12.345.678/0001-95", "c": "123-4"}),
        );
        assert_eq!(html, "123.456.789-01|12.345.678/0001-95|123-4");
    }

    #[test]
    fn dash_fills_empty_values() {
        let html = render_one(
            "{{ empty|dash }}|{{ missing|dash }}|{{ name|dash }}",
            json!({"empty": "", "name": "Ana"}),
        );
        assert_eq!(html, "\u{2014}|\u{2014}|Ana");
    }

    #[test]
    fn now_formats_local_time_or_yields_nothing() {
        let html = render_one(
            "{{ now('%Y') }}|{{ now('') }}|{{ now(5) }}|{{ now('%Q') }}",
            json!({}),
        );
        assert_eq!(html, format!("{}|||", Local::now().format("%Y")));
    }

    #[test]
    fn set_and_get_are_scoped_to_one_render() {
        let view = views(&[
            ("layout/header.html", "<title>{{ get('title') }} - {{ get('app_name') }}</title>"),
            ("home.html", "{{ set('title', 'Home') }}{% include 'layout/header.html' %}"),
            ("bare.html", "[{{ get('title') }}][{{ get('nope') }}]"),
        ]);
        assert_eq!(
            view.render("home", &json!({})).unwrap(),
            "<title>Home - Sprig</title>"
        );
        assert_eq!(view.render("bare", &json!({})).unwrap(), "[][]");
    }

    #[test]
    fn description_comes_from_config() {
        let config = Config {
            views: write_views(&[(
                "about.html",
                "{{ app_description }}|{{ get('app_description') }}|{{ app_name }}",
            )]),
            app_name: "Shop".into(),
            app_description: "Hand-made & local".into(),
            ..Config::default()
        };
        let html = View::from_config(&config).render("about", &json!({})).unwrap();
        assert_eq!(html, "Hand-made &amp; local|Hand-made &amp; local|Shop");
    }
}

//! The services a controller or middleware may reach, resolved from the
//! request's container.
//!
//! Controllers and middleware get these by asking for the context in their
//! provider:
//!
//! ```
//! use std::rc::Rc;
//! use sprig::context::ControllerContext;
//! use sprig::container::Providers;
//!
//! struct HomeController {
//!     cx: Rc<ControllerContext>,
//! }
//!
//! let mut providers = Providers::new();
//! providers.register(|c| Ok(HomeController { cx: c.resolve()? }));
//! ```

use std::rc::Rc;

use serde_json::Value;

use crate::container::{Container, ContainerError};
use crate::http::{Request, Responder, Response, StatusCode};
use crate::session::Session;
use crate::validator::Validator;
use crate::view::{View, ViewError};

/// Everything a controller method may use.
pub struct ControllerContext {
    request: Rc<Request>,
    response: Rc<Responder>,
    session: Rc<Session>,
    validator: Rc<Validator>,
    view: Rc<View>,
}

impl ControllerContext {
    pub fn from_container(container: &Container) -> Result<Self, ContainerError> {
        Ok(Self {
            request: container.resolve()?,
            response: container.resolve()?,
            session: container.resolve()?,
            validator: container.resolve()?,
            view: container.resolve()?,
        })
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &Responder {
        &self.response
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    /// Renders a view as a `200` HTML response.
    ///
    /// `data` must be a JSON object. The pending flash message (consumed) and
    /// the CSRF token are added to it as `flash` and `csrf`.
    pub fn render(&self, name: &str, data: Value) -> Result<Response, ViewError> {
        let mut data = match data {
            Value::Object(map) => map,
            Value::Null => serde_json::Map::new(),
            other => return Err(ViewError::InvalidData(json_kind(&other))),
        };
        let flash = self.session.take_flash();
        data.insert(
            "flash".to_owned(),
            serde_json::to_value(flash).unwrap_or(Value::Null),
        );
        data.insert("csrf".to_owned(), Value::String(self.session.csrf_token()));

        let html = self.view.render(name, &data)?;
        Ok(self.response.send(html, StatusCode::OK))
    }
}

/// The narrower set of services a middleware may use.
pub struct MiddlewareContext {
    request: Rc<Request>,
    response: Rc<Responder>,
    session: Rc<Session>,
}

impl MiddlewareContext {
    pub fn from_container(container: &Container) -> Result<Self, ContainerError> {
        Ok(Self {
            request: container.resolve()?,
            response: container.resolve()?,
            session: container.resolve()?,
        })
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn response(&self) -> &Responder {
        &self.response
    }

    pub fn session(&self) -> &Session {
        &self.session
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Providers;
    use serde_json::json;
    use std::fs;
    use std::sync::Arc;

    fn container(views: &std::path::Path) -> Container {
        let view = View::new(views, "Sprig", "http://localhost");
        let mut providers = Providers::new();
        providers
            .register(|_| Ok(Responder::new("http://localhost")))
            .register(|_| Ok(Session::new()))
            .register(|_| Ok(Validator::new()))
            .register(move |_| Ok(view.clone()))
            .register(ControllerContext::from_container)
            .register(MiddlewareContext::from_container);
        let container = Container::new(Arc::new(providers));
        let (request, _) = Request::parse(b"GET /form HTTP/1.1\r\n\r\n").unwrap();
        container.instance(request);
        container
    }

    fn views_dir(tag: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("sprig-context-{}-{tag}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("form.html"),
            "{{ title }}|{% if flash %}{{ flash.type }}:{{ flash.message }}{% endif %}|{{ csrf }}",
        )
        .unwrap();
        dir
    }

    #[test]
    fn contexts_share_the_request_services() {
        let container = container(&views_dir("share"));
        let cx = container.resolve::<ControllerContext>().unwrap();
        let mw = container.resolve::<MiddlewareContext>().unwrap();
        mw.session().set("seen", true);
        assert_eq!(cx.session().get("seen"), Some(json!(true)));
        assert_eq!(cx.request().path(), "/form");
    }

    #[test]
    fn render_merges_flash_and_csrf() {
        let container = container(&views_dir("render"));
        let cx = container.resolve::<ControllerContext>().unwrap();
        cx.session().set_flash("success", "Saved");

        let response = cx.render("form", json!({"title": "Edit"})).unwrap();
        let token = cx.session().csrf_token();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body_text(), format!("Edit|success:Saved|{token}"));

        let again = cx.render("form", json!({"title": "Edit"})).unwrap();
        assert_eq!(again.body_text(), format!("Edit||{token}"));
    }

    #[test]
    fn render_needs_a_map() {
        let container = container(&views_dir("map"));
        let cx = container.resolve::<ControllerContext>().unwrap();
        assert!(matches!(
            cx.render("form", json!([1, 2])),
            Err(ViewError::InvalidData("an array"))
        ));
    }

    #[test]
    fn missing_request_is_reported() {
        let mut providers = Providers::new();
        providers.register(MiddlewareContext::from_container);
        let container = Container::new(Arc::new(providers));
        assert!(matches!(
            container.resolve::<MiddlewareContext>(),
            Err(ContainerError::ServiceNotFound { .. })
        ));
    }
}

//! The crate-wide error returned by controllers, middleware and dispatch.

use thiserror::Error;

use crate::container::ContainerError;
use crate::database::DatabaseError;
use crate::http::RedirectError;
use crate::model::{ModelError, QueryError};
use crate::router::RoutingError;
use crate::validator::ValidatorError;
use crate::view::ViewError;

/// Any fatal condition raised while handling a request.
///
/// The app boundary logs it and answers with a bare 500; none of this detail
/// reaches the client.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Container(#[from] ContainerError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Redirect(#[from] RedirectError),

    #[error(transparent)]
    Validator(#[from] ValidatorError),

    #[error(transparent)]
    View(#[from] ViewError),
}

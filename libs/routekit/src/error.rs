use http::StatusCode;
use thiserror::Error;

use crate::context::InputKind;
use crate::model::Role;
use crate::problem::Problem;
use crate::registry::RegistryError;

/// Failure raised while a handler serves a request or message.
///
/// Every variant is carried into the transport's failure path; none of them
/// is meant to escape the dispatch loop.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("{detail}")]
    Status { status: StatusCode, detail: String },

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("handler '{handler}' panicked: {message}")]
    Panicked { handler: String, message: String },

    #[error("handler expected {expected} input but received {actual}")]
    InputMismatch {
        expected: InputKind,
        actual: InputKind,
    },

    #[error("controller instance is not a '{0}'")]
    InstanceMismatch(&'static str),

    #[error("handler '{0}' declares an unsupported parameter list")]
    UnsupportedArity(&'static str),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn status(status: StatusCode, detail: impl Into<String>) -> Self {
        Self::Status {
            status,
            detail: detail.into(),
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::status(StatusCode::BAD_REQUEST, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::status(StatusCode::NOT_FOUND, detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::Unauthorized(detail.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            HandlerError::Status { status, .. } => *status,
            HandlerError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Problem body for the default failure behavior. Internal details of
    /// server-side errors are not echoed back to the client.
    pub fn to_problem(&self) -> Problem {
        let status = self.status_code();
        let detail = if status.is_server_error() {
            "internal error".to_string()
        } else {
            self.to_string()
        };
        Problem::from_status(status, detail)
    }
}

/// Configuration error detected while building a router. Always fatal.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("router '{name}' was already built")]
    AlreadyBuilt { name: String },

    #[error("{controller}::{method} declares {arity} parameters; handlers take zero or one")]
    UnsupportedArity {
        controller: &'static str,
        method: &'static str,
        arity: usize,
    },

    #[error("{controller}::{method} takes {input} input, which a {role} route cannot supply")]
    IncompatibleInput {
        controller: &'static str,
        method: &'static str,
        input: InputKind,
        role: Role,
    },

    #[error("{controller}::{method}: invalid route pattern '{pattern}'")]
    InvalidPattern {
        controller: &'static str,
        method: &'static str,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("{controller}::{method}: #[{annotation}] requires a value")]
    MissingAnnotationValue {
        controller: &'static str,
        method: &'static str,
        annotation: &'static str,
    },

    #[error("{route} requires auth handler '{identity}', which is not configured")]
    UnknownAuthHandler { route: String, identity: String },

    #[error("custom route '{path}' has no handler")]
    IncompleteRoute { path: String },

    #[error("failed to instantiate controller '{controller}'")]
    Instantiate {
        controller: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

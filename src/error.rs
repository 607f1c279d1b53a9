//! Typed errors per layer and their HTTP mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config source {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("parameter '{name}' is a {expected}, got {got}")]
    Cardinality {
        name: String,
        expected: &'static str,
        got: &'static str,
    },
    #[error("invalid value for '{name}': {value}")]
    InvalidValue { name: String, value: String },
}

#[derive(Error, Debug, Clone)]
pub enum ClassError {
    #[error("class '{class}' could not be loaded: {reason}")]
    Load { class: String, reason: String },
    #[error("moniker '{moniker}' of class '{class}' is already taken by '{existing}'")]
    DuplicateMoniker {
        moniker: String,
        class: String,
        existing: String,
    },
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database: {0}")]
    Db(#[from] sqlx::Error),
    #[error("connection string: {0}")]
    Dsn(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column {column} on {table}")]
    UnknownColumn { table: String, column: String },
}

#[derive(Error, Debug)]
pub enum FactoryError {
    #[error("operation not recognized: {0}")]
    UnknownOperation(String),
    #[error("bad arguments for {operation}: {reason}")]
    BadArguments {
        operation: &'static str,
        reason: String,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Class(#[from] ClassError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Unexpected faults raised inside a task step. The pipeline turns every one
/// of these into a server-error outcome.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error(transparent)]
    Factory(#[from] FactoryError),
}

impl From<StoreError> for HandlerError {
    fn from(e: StoreError) -> Self {
        HandlerError::Factory(FactoryError::Store(e))
    }
}

/// Errors surfaced by the HTTP glue before a request reaches a site.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Factory(#[from] FactoryError),
    #[error("bad request: {0}")]
    BadRequest(String),
}

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AppError::Factory(FactoryError::Class(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "class_error"),
            AppError::Factory(FactoryError::Config(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "config_error"),
            AppError::Factory(_) => (StatusCode::INTERNAL_SERVER_ERROR, "site_error"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
        };
        tracing::error!(error = %self, "request rejected before dispatch");
        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_string(),
            },
        };
        (status, Json(body)).into_response()
    }
}

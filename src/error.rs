use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

/// Failures reported by an `OrderStore`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("order {0} not found")]
    NotFound(Uuid),

    #[error("version conflict on order {order_id}: expected {expected}, found {actual}")]
    Conflict {
        order_id: Uuid,
        expected: u64,
        actual: u64,
    },

    #[error("order store unavailable: {0}")]
    Unavailable(String),
}

/// Failures from the driver directory, notifier or distance estimator.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CollaboratorError {
    #[error("{0} timed out")]
    Timeout(&'static str),

    #[error("{collaborator} unavailable: {message}")]
    Unavailable {
        collaborator: &'static str,
        message: String,
    },

    #[error("driver {0} not found")]
    DriverNotFound(Uuid),

    #[error("distance estimate is not a finite value: {0}")]
    InvalidDistance(f64),
}

impl CollaboratorError {
    pub fn collaborator(&self) -> &'static str {
        match self {
            CollaboratorError::Timeout(name) => name,
            CollaboratorError::Unavailable { collaborator, .. } => collaborator,
            CollaboratorError::DriverNotFound(_) => "driver_directory",
            CollaboratorError::InvalidDistance(_) => "distance_estimator",
        }
    }
}

/// Errors surfaced by engine operations. Soft outcomes (no candidates, stale
/// accepts) are not errors and travel in the outcome enums instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("invalid transition for order {order_id}: {from} -> {to}")]
    InvalidTransition {
        order_id: Uuid,
        from: &'static str,
        to: &'static str,
    },

    #[error(transparent)]
    Store(StoreError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("order {0} kept changing under concurrent writers")]
    Contended(Uuid),

    #[error("supervisor cannot be started: {0}")]
    SupervisorUnavailable(&'static str),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => EngineError::OrderNotFound(id),
            other => EngineError::Store(other),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::OrderNotFound(id) => AppError::NotFound(format!("order {id} not found")),
            EngineError::InvalidTransition { .. } | EngineError::Contended(_) => {
                AppError::Conflict(err.to_string())
            }
            EngineError::Store(StoreError::Conflict { .. }) => AppError::Conflict(err.to_string()),
            EngineError::Store(StoreError::NotFound(id)) => {
                AppError::NotFound(format!("order {id} not found"))
            }
            EngineError::Store(StoreError::Unavailable(msg)) => AppError::Unavailable(msg),
            EngineError::Collaborator(err) => AppError::Unavailable(err.to_string()),
            EngineError::SupervisorUnavailable(_) => AppError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

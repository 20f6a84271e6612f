use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use reportbridge_core::error::flatten_error;
use reportbridge_orchestrator::OrchestratorError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`OrchestratorError`] and adds HTTP-specific variants. Implements
/// [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A resource that does not exist (yet).
    #[error("{0}")]
    NotFound(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::Orchestrator(err) => match err {
                OrchestratorError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string())
                }
                OrchestratorError::InvalidTarget(_) | OrchestratorError::Script(_) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST", flatten_error(err))
                }
                OrchestratorError::Auth(_) => {
                    let message = flatten_error(err);
                    tracing::warn!(error = %message, "Session could not be obtained");
                    (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
                }
                OrchestratorError::ShuttingDown => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    err.to_string(),
                ),
            },
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sqlrag::{ErrorKind, SqlRagError};
use tracing::{error, warn};

/// A custom error type for the server application.
///
/// Pipeline errors are mapped to HTTP statuses by their [`ErrorKind`].
pub enum AppError {
    /// Errors originating from the `sqlrag` pipeline.
    Pipeline(SqlRagError),
    /// The request itself was malformed.
    BadRequest(String),
    /// Generic internal server errors.
    Internal(anyhow::Error),
}

impl From<SqlRagError> for AppError {
    fn from(err: SqlRagError) -> Self {
        AppError::Pipeline(err)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

fn kind_name(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::Configuration => "configuration",
        ErrorKind::Validation => "validation",
        ErrorKind::Timeout => "timeout",
        ErrorKind::Execution => "execution",
        ErrorKind::Concurrency => "concurrency",
        ErrorKind::Backend => "backend",
    }
}

fn status_for(err: &SqlRagError) -> StatusCode {
    if let SqlRagError::SnapshotNotFound(_) = err {
        return StatusCode::NOT_FOUND;
    }
    match err.kind() {
        ErrorKind::Configuration => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Execution => StatusCode::BAD_REQUEST,
        ErrorKind::Concurrency => StatusCode::CONFLICT,
        ErrorKind::Backend => StatusCode::BAD_GATEWAY,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status_code, kind, error_message) = match self {
            AppError::Pipeline(err) => {
                let status = status_for(&err);
                if status.is_server_error() {
                    error!("Pipeline error: {:?}", err);
                } else {
                    warn!("Request failed: {err}");
                }
                (status, kind_name(err.kind()), err.to_string())
            }
            AppError::BadRequest(message) => (StatusCode::BAD_REQUEST, "request", message),
            AppError::Internal(err) => {
                error!("Internal server error: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "An internal server error occurred.".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
            "kind": kind,
        }));

        (status_code, body).into_response()
    }
}

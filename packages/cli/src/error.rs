use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use runbox_runner::RunnerError;
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Main application error type that all handlers should return
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Structured error response format for API consistency
#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    error: ErrorDetail,
}

/// Error detail structure with machine-readable codes
#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    request_id: String,
}

impl AppError {
    /// Convert AppError to appropriate HTTP status code and error code
    pub fn to_status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            // A traversal attempt must look exactly like a missing file.
            AppError::Runner(RunnerError::PathTraversal { .. }) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND")
            }
            AppError::Runner(e) => (
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                e.code(),
            ),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }

    /// Get user-friendly error message (sanitized for external consumption)
    pub fn to_user_message(&self) -> String {
        match self {
            AppError::Runner(RunnerError::PathTraversal { .. }) => "Not found".to_string(),
            AppError::Runner(RunnerError::Io(_)) | AppError::Runner(RunnerError::Serialization(_)) => {
                "An internal server error occurred".to_string()
            }
            AppError::Runner(e) => e.to_string(),
            AppError::Internal(_) => "An internal server error occurred".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = Uuid::new_v4().to_string();
        let (status, code) = self.to_status_and_code();

        if status.is_server_error() {
            error!(request_id = %request_id, code = code, "Request failed: {}", self);
        } else if matches!(self, AppError::Runner(RunnerError::PathTraversal { .. })) {
            warn!(request_id = %request_id, "Blocked path traversal: {}", self);
        } else {
            info!(request_id = %request_id, code = code, "Request rejected: {}", self);
        }

        let body = ErrorResponse {
            success: false,
            error: ErrorDetail {
                code: code.to_string(),
                message: self.to_user_message(),
                request_id,
            },
        };

        (status, Json(body)).into_response()
    }
}

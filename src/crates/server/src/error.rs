//! API error types and HTTP response conversion.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// API error response structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// Error type identifier.
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API result type.
pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced by the HTTP handlers.
///
/// Note that a running SSE stream never turns into a non-2xx: once the
/// stream has begun, failures become `error` events followed by the
/// `[DONE]` terminator. `ApiError` covers the plain JSON endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Invalid request data.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Internal server error.
    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_type(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BadRequest",
            ApiError::InternalError(_) => "InternalError",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ApiErrorResponse {
            error: self.error_type().to_string(),
            message: self.to_string(),
        };

        tracing::error!("API error: {:?}", body);
        (status, Json(body)).into_response()
    }
}

impl From<checkpoint::CheckpointError> for ApiError {
    fn from(err: checkpoint::CheckpointError) -> Self {
        ApiError::InternalError(err.to_string())
    }
}

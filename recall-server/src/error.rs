//! Mapping of service errors onto HTTP responses.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use recall_context::ContextError;
use serde_json::json;
use tracing::{error, warn};

/// Error response with a `{ "error": "..." }` body.
#[derive(Debug)]
pub struct ApiError {
    /// Response status.
    pub status: StatusCode,
    /// Message placed in the body.
    pub message: String,
}

impl ApiError {
    /// Creates an error with an explicit status.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// 400 Bad Request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<ContextError> for ApiError {
    fn from(err: ContextError) -> Self {
        let category = err.category();
        let status = if err.is_invalid_argument() {
            StatusCode::BAD_REQUEST
        } else {
            match &err {
                ContextError::EmbeddingFailed { .. } => StatusCode::BAD_GATEWAY,
                ContextError::GenerationFailed { timed_out: true, .. } => StatusCode::GATEWAY_TIMEOUT,
                ContextError::GenerationFailed { .. } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            }
        };

        let message = match err {
            ContextError::InvalidArgument { reason } => reason,
            other => other.to_string(),
        };
        if status.is_server_error() {
            error!(category, status = status.as_u16(), error = %message, "request failed");
        } else {
            warn!(category, status = status.as_u16(), error = %message, "request rejected");
        }
        Self::new(status, message)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::bad_request(rejection.body_text())
    }
}

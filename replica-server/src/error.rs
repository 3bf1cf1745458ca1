//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use replica_core::CoreError;
use thiserror::Error;
use tracing::error;

/// Errors returned to HTTP clients as plain text.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or unusable request parameters.
    #[error("{0}")]
    BadRequest(String),

    /// The source origin could not be reached.
    #[error("{0}")]
    Upstream(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::MissingOrigin | CoreError::InvalidUrl(_) => {
                ApiError::BadRequest(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Internal(_) => {
                error!("{}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// Result type for API operations.
pub type Result<T> = std::result::Result<T, ApiError>;

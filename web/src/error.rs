//! Error types for the HTTP handlers.
//!
//! Bridges engine and validation failures into JSON error responses via
//! Axum's `IntoResponse`. Business rejects never pass through here; they
//! are ordinary response payloads.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use farepass_core::error::{EngineError, RejectReason, RepositoryError};
use serde::Serialize;
use std::fmt;

/// Application error type for HTTP handlers.
///
/// Wraps a status, a stable machine-readable code, and a user-facing
/// message; the original error is kept for logging only.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create an error with an explicit status and code.
    #[must_use]
    pub const fn new(status: StatusCode, code: String, message: String) -> Self {
        Self {
            status,
            code,
            message,
            source: None,
        }
    }

    /// Attach the underlying error for server-side logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 400 Bad Request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "BAD_REQUEST".to_string(),
            message.into(),
        )
    }

    /// 404 Not Found.
    #[must_use]
    pub fn not_found(resource: impl fmt::Display, id: impl fmt::Display) -> Self {
        Self::new(
            StatusCode::NOT_FOUND,
            "NOT_FOUND".to_string(),
            format!("{resource} {id} not found"),
        )
    }

    /// 500 with the redemption taxonomy's `INTERNAL_ERROR` code, so the
    /// terminal shows the same reason vocabulary for every failure.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            RejectReason::InternalError.as_str().to_string(),
            message.into(),
        )
    }

    /// 503 Service Unavailable.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE".to_string(),
            message.into(),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Error response body (JSON).
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            match &self.source {
                Some(source) => tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    error = %source,
                    "request failed"
                ),
                None => tracing::error!(
                    status = %self.status,
                    code = %self.code,
                    message = %self.message,
                    "request failed"
                ),
            }
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<EngineError> for AppError {
    fn from(error: EngineError) -> Self {
        let app_error = match &error {
            EngineError::Repository(RepositoryError::LockTimeout) => {
                Self::internal("scan could not be serialized in time, please re-scan")
            }
            EngineError::Repository(_) | EngineError::UnknownVenue(_) => {
                Self::internal("redemption could not be processed")
            }
        };
        app_error.with_source(error.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_code_and_message() {
        let error = AppError::bad_request("malformed filter");
        assert_eq!(error.to_string(), "[BAD_REQUEST] malformed filter");
    }

    #[test]
    fn engine_errors_map_to_the_internal_error_code() {
        let error: AppError = EngineError::Repository(RepositoryError::LockTimeout).into();
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(error.code, "INTERNAL_ERROR");
    }

    #[test]
    fn not_found_names_the_resource() {
        let error = AppError::not_found("ticket", "TKT-404");
        assert_eq!(error.to_string(), "[NOT_FOUND] ticket TKT-404 not found");
        assert_eq!(error.status, StatusCode::NOT_FOUND);
    }
}

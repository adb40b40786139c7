//! API error types
//!
//! Every failure is rendered as `{"status":"error","kind":..,"message":..}`.
//! Resolution failures additionally carry the full `errors` list.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use ironbot_core::IronbotError;
use ironbot_core::error::ResolutionError;

/// API errors
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request body or path
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unknown route parameter (operation name, queue kind)
    #[error("not found: {0}")]
    NotFound(String),

    /// Error from the management facade
    #[error(transparent)]
    Core(#[from] IronbotError),
}

/// HTTP status for an error kind shared by the facade and batch rows.
pub fn status_for_kind(kind: &str) -> StatusCode {
    match kind {
        "config" | "resolution" => StatusCode::UNPROCESSABLE_ENTITY,
        "not_found" => StatusCode::NOT_FOUND,
        "state" => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl ApiError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Core(e) => status_for_kind(e.kind()),
        }
    }

    /// Machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::NotFound(_) => "not_found",
            Self::Core(e) => e.kind(),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse<'a> {
    pub status: &'static str,
    pub kind: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<&'a [ResolutionError]>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let errors = match &self {
            Self::Core(IronbotError::Resolution(errors)) => Some(errors.as_slice()),
            _ => None,
        };
        let body = ErrorResponse {
            status: "error",
            kind: self.kind(),
            message: self.to_string(),
            errors,
        };

        tracing::warn!(
            kind = body.kind,
            error_message = %body.message,
            status = %status,
            "API error"
        );

        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers
pub type Result<T> = std::result::Result<T, ApiError>;

//! API error types and conversions

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use fwrest_core::CoreError;
use serde::Serialize;

/// API error type that converts to HTTP responses
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request
    BadRequest(String),
    /// 404 Not Found, outside the API namespace
    NotFound(String),
    /// 405 Method Not Allowed
    MethodNotAllowed(String),
    /// Failure reported by the core pipeline
    Core(CoreError),
}

/// Standard error response format
#[derive(Serialize)]
struct ErrorResponse {
    error: i32,
    msg: String,
}

/// File store error response format
#[derive(Serialize)]
struct FileErrorResponse {
    fname: String,
    error: i32,
}

/// Successful acknowledgement
#[derive(Debug, Serialize)]
pub struct Success {
    pub success: u16,
    pub msg: &'static str,
}

impl Success {
    pub fn ok() -> Json<Self> {
        Json(Self {
            success: 200,
            msg: "OK",
        })
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::Core(err) => StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// Numeric code carried in the body
    pub fn code(&self) -> i32 {
        match self {
            ApiError::BadRequest(_) | ApiError::MethodNotAllowed(_) => -1,
            ApiError::NotFound(_) => -2,
            ApiError::Core(err) => err.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        // Log errors at appropriate levels
        if status.is_server_error() {
            tracing::error!(code, error = ?self, "API error");
        } else if status.is_client_error() {
            tracing::debug!(code, error = ?self, "API client error");
        }

        match self {
            ApiError::Core(CoreError::Storage { path, .. }) => {
                (status, Json(FileErrorResponse { fname: path, error: code })).into_response()
            }
            ApiError::Core(err) => (
                status,
                Json(ErrorResponse {
                    error: code,
                    msg: err.to_string(),
                }),
            )
                .into_response(),
            ApiError::BadRequest(msg) | ApiError::NotFound(msg) | ApiError::MethodNotAllowed(msg) => {
                (status, Json(ErrorResponse { error: code, msg })).into_response()
            }
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::Core(err)
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("Failed to parse JSON: {}", err))
    }
}

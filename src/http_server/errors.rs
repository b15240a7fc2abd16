//! # HTTP Errors
//!
//! Every failure leaves the server as `{"error": <message>, "code": <status>}`.

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::auth::{AuthError, CHALLENGE};
use crate::query::QueryError;

/// Result type for HTTP handlers
pub type ApiResult<T> = Result<T, ApiError>;

/// HTTP-facing errors
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    // ==================
    // Client Errors (4xx)
    // ==================
    /// No route for the path
    #[error("No route for {0}")]
    NotFound(String),

    /// The path exists but not for this method
    #[error("Method {method} not allowed for {path}")]
    MethodNotAllowed { method: String, path: String },

    /// Request body is not a JSON object
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    // ==================
    // Auth Errors
    // ==================
    /// Authentication error
    #[error("{0}")]
    Auth(#[from] AuthError),

    // ==================
    // Engine Errors
    // ==================
    /// Route execution failed; status follows the error class
    #[error("{0}")]
    Query(#[from] QueryError),
}

impl ApiError {
    /// Get HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::MethodNotAllowed { .. } => StatusCode::METHOD_NOT_ALLOWED,
            ApiError::InvalidBody(_) => StatusCode::BAD_REQUEST,
            ApiError::Auth(err) => {
                StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::UNAUTHORIZED)
            }
            ApiError::Query(err) => StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

impl From<&ApiError> for ErrorResponse {
    fn from(err: &ApiError) -> Self {
        Self {
            code: err.status_code().as_u16(),
            error: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, Json(ErrorResponse::from(&self))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(CHALLENGE),
            );
        }
        response
    }
}

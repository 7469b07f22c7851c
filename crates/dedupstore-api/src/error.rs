//! API error type and its HTTP rendering.

use axum::extract::multipart::MultipartError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use dedupstore_core::Error;

/// Errors a handler can return.
#[derive(Debug)]
pub enum ApiError {
    Store(Error),
    NotFound(String),
    BadRequest(String),
    Multipart(MultipartError),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::InvalidSource(msg) | Error::InvalidInput(msg) => ApiError::BadRequest(msg),
            Error::Config(msg) => ApiError::BadRequest(msg),
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => {
                ApiError::NotFound("File not found in storage".to_string())
            }
            other => ApiError::Store(other),
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::Multipart(err)
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Store(Error::Io(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Store(err) => {
                tracing::error!(subsystem = "api", error = %err, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Multipart(err) => (err.status(), err.body_text()),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

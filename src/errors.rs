use crate::services::{backend::BackendError, file_service::FileServiceError};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = self.status.as_u16(), "{}", self.message);
        }

        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<FileServiceError> for AppError {
    fn from(err: FileServiceError) -> Self {
        match err {
            FileServiceError::Validation(msg) => AppError::bad_request(msg),
            FileServiceError::BucketNotFound(_)
            | FileServiceError::ObjectNotFound { .. }
            | FileServiceError::NoFilesFound => AppError::not_found(err.to_string()),
            FileServiceError::Backend(BackendError::Unavailable(detail))
            | FileServiceError::Listing(BackendError::Unavailable(detail))
            | FileServiceError::Presign {
                source: BackendError::Unavailable(detail),
                ..
            } => {
                tracing::warn!(%detail, "storage backend unavailable");
                AppError::internal("storage backend unavailable")
            }
            FileServiceError::Backend(BackendError::NotFound(detail)) => {
                AppError::not_found(detail)
            }
            FileServiceError::Backend(BackendError::Operation(_))
            | FileServiceError::Listing(_)
            | FileServiceError::Presign { .. } => AppError::internal(err.to_string()),
        }
    }
}

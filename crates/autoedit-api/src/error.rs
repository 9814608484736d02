//! API error types.

use std::sync::atomic::{AtomicBool, Ordering};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use autoedit_store::StoreError;
use autoedit_worker::WorkerError;

pub type ApiResult<T> = Result<T, ApiError>;

static HIDE_INTERNAL_DETAILS: AtomicBool = AtomicBool::new(false);

/// Replace the details of internal errors with a generic message in
/// responses. Enabled in production.
pub fn hide_internal_details(hide: bool) {
    HIDE_INTERNAL_DETAILS.store(hide, Ordering::Relaxed);
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("Upload exceeds the maximum allowed size")]
    PayloadTooLarge,

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("{0}")]
    Worker(#[from] WorkerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Worker(WorkerError::QueueFull | WorkerError::ShutDown) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Worker(e) if e.is_input_error() => StatusCode::BAD_REQUEST,
            ApiError::Config(_)
            | ApiError::Store(_)
            | ApiError::Worker(_)
            | ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message sent to the client.
    fn public_message(&self, hide_internal: bool) -> String {
        let status = self.status_code();
        if hide_internal && status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error = self.public_message(HIDE_INTERNAL_DETAILS.load(Ordering::Relaxed));

        if status.is_server_error() {
            tracing::error!(status = %status, "Request failed: {}", self);
        }

        (status, Json(ErrorResponse { error })).into_response()
    }
}

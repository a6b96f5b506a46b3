use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use shared::models::RelayErrorBody;
use thiserror::Error;

use crate::services::{AuthorizationError, PushError, RelayError};

pub type AppResult<T> = Result<T, ApiError>;

pub const SEND_FAILED: &str = "Failed to send message";
pub const HISTORY_FAILED: &str = "Failed to load chat history";
pub const TRIM_FAILED: &str = "Failed to delete old messages";
pub const AUTHORIZATION_FAILED: &str = "Authorization failed";
pub const STREAM_UNAVAILABLE: &str = "Realtime stream is not available";

#[derive(Debug, Error)]
#[error("{status}: {body}")]
pub struct ApiError {
    status: StatusCode,
    body: RelayErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: RelayErrorBody::new(error),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.body.details = Some(details.into());
        self
    }

    pub fn internal_server_error(error: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error)
    }

    pub fn forbidden(error: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, error)
    }

    pub fn unauthorized(error: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, error)
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    /// Relay failures are all reported as 500 with the cause in `details`,
    /// validation included.
    pub fn relay(operation: &'static str, err: &RelayError) -> Self {
        Self::internal_server_error(operation).with_details(err.to_string())
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn body(&self) -> &RelayErrorBody {
        &self.body
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<AuthorizationError> for ApiError {
    fn from(err: AuthorizationError) -> Self {
        Self::forbidden(AUTHORIZATION_FAILED).with_details(err.to_string())
    }
}

impl From<PushError> for ApiError {
    fn from(err: PushError) -> Self {
        Self::internal_server_error("Push notification failed").with_details(err.to_string())
    }
}

impl From<http::Error> for ApiError {
    fn from(err: http::Error) -> Self {
        Self::internal_server_error(err.to_string())
    }
}

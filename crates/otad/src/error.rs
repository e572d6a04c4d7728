//! HTTP mapping for storage errors

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ota_common::OtaError;
use serde::Serialize;
use tracing::error;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}

#[derive(Debug)]
pub struct ApiError(pub OtaError);

impl From<OtaError> for ApiError {
    fn from(err: OtaError) -> Self {
        ApiError(err)
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(err: tokio::task::JoinError) -> Self {
        ApiError(OtaError::Io(std::io::Error::other(err)))
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            OtaError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            OtaError::NotFound(_) => StatusCode::NOT_FOUND,
            OtaError::Forbidden(_) => StatusCode::FORBIDDEN,
            OtaError::TooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            OtaError::CorruptState(_) | OtaError::Config(_) | OtaError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("Request failed ({}): {}", self.0.code(), self.0);
        }

        let body = Json(ErrorResponse {
            detail: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

//! HTTP renderings of rejections and API errors.
//!
//! Rejections become `429 Too Many Requests` with a `Retry-After` header.
//! Internal failures are logged and answered with a generic message so that
//! no store contents leak to the caller.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::error;

use crate::admission::Rejection;
use crate::error::GatekeeperError;

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, self.retry_after_secs.to_string())],
            Json(self),
        )
            .into_response()
    }
}

/// Errors returned by the decision and admin APIs.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Internal(GatekeeperError),
}

impl From<GatekeeperError> for ApiError {
    fn from(err: GatekeeperError) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized".to_string()),
            ApiError::Internal(e) => {
                error!(error = %e, "Request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

//! Decision service for callers that run the admission check out of process.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use super::response::ApiError;
use super::AppState;
use crate::admission::{resolve_client_identity, Decision};

/// Body of `POST /v1/check`.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckRequest {
    /// The protected operation, e.g. a route path
    pub resource: String,
    /// Caller identity; resolved from proxy headers when absent
    #[serde(default)]
    pub client_identity: Option<String>,
}

/// Outcome of `POST /v1/check`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResponse {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,
}

impl From<Decision> for CheckResponse {
    fn from(decision: Decision) -> Self {
        match decision {
            Decision::Allow => Self {
                allowed: true,
                reason: None,
                retry_after_seconds: None,
            },
            Decision::Reject(rejection) => Self {
                allowed: false,
                reason: Some(rejection.reason.as_str().to_string()),
                retry_after_seconds: Some(rejection.retry_after_secs),
            },
        }
    }
}

/// Decide whether a request to a protected resource may proceed.
///
/// Always answers `200` for a valid request; the decision is in the body.
#[instrument(skip_all, fields(resource = %request.resource))]
pub async fn check(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, ApiError> {
    if request.resource.is_empty() {
        warn!("Received admission check with empty resource");
        return Err(ApiError::BadRequest("resource is required".to_string()));
    }

    let identity = request
        .client_identity
        .filter(|identity| !identity.is_empty())
        .unwrap_or_else(|| resolve_client_identity(&headers));

    let decision = state.engine.check_admission(&identity, &request.resource);

    debug!(
        identity = %identity,
        allowed = decision.is_allowed(),
        reason = decision.rejection().map(|r| r.reason.as_str()),
        "Admission decision made"
    );

    Ok(Json(decision.into()))
}

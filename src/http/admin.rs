//! Administrative endpoints: inspection and manual ban overrides.

use axum::extract::{Path, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::response::ApiError;
use super::AppState;
use crate::admission::clock::to_datetime;
use crate::admission::{AdmissionStatus, StoreSize, SweepStats};
use crate::error::GatekeeperError;

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub identity: String,
    pub resource: String,
}

#[derive(Debug, Deserialize)]
pub struct BanRequest {
    pub identity: String,
    /// Defaults to the default policy's ban duration
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BanResponse {
    pub identity: String,
    pub banned_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnbanResponse {
    pub identity: String,
    pub removed: bool,
}

/// Require `Authorization: Bearer <admin_token>` when a token is configured.
pub async fn require_admin_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(token) = state.admin_token.as_deref() {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|presented| presented == token);

        if !authorized {
            return ApiError::Unauthorized.into_response();
        }
    }
    next.run(request).await
}

pub async fn get_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<AdmissionStatus>, ApiError> {
    Ok(Json(state.engine.status(&query.identity, &query.resource)?))
}

pub async fn create_ban(
    State(state): State<AppState>,
    Json(request): Json<BanRequest>,
) -> Result<(StatusCode, Json<BanResponse>), ApiError> {
    if request.identity.is_empty() {
        return Err(ApiError::BadRequest("identity is required".to_string()));
    }

    let duration_ms = request
        .duration_ms
        .unwrap_or_else(|| state.engine.policies().default_policy().ban_duration_ms);
    if duration_ms == 0 {
        return Err(ApiError::BadRequest("duration_ms must be at least 1".to_string()));
    }

    let ban = state.engine.ban_identity(&request.identity, duration_ms)?;

    Ok((
        StatusCode::CREATED,
        Json(BanResponse {
            identity: request.identity,
            banned_until: to_datetime(ban.expires_at),
        }),
    ))
}

pub async fn delete_ban(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<UnbanResponse>, ApiError> {
    let removed = state.engine.unban_identity(&identity)?;
    Ok(Json(UnbanResponse { identity, removed }))
}

pub async fn sweep(State(state): State<AppState>) -> Result<Json<SweepStats>, ApiError> {
    state
        .engine
        .sweep_expired()
        .map(Json)
        .ok_or_else(|| ApiError::Internal(GatekeeperError::Store("sweep failed".to_string())))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<StoreSize>, ApiError> {
    Ok(Json(state.engine.store_size()?))
}

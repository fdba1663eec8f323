//! API Key Handlers
//!
//! Owner-scoped management. The plaintext key leaves the server once, in the
//! creation response.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

use clubhouse_auth::{ApiKeyInfo, AuthenticatedUser, RequireAuth};

use crate::dto::{CreateApiKeyRequest, CreateApiKeyResponse, UpdateApiKeyRequest};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Scope an API key needs to manage its owner's keys
pub const MANAGE_SCOPE: &str = "api_keys:manage";

fn ensure_can_manage(user: &AuthenticatedUser) -> ApiResult<()> {
    if user.has_permission(MANAGE_SCOPE) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(MANAGE_SCOPE))
    }
}

pub async fn create_api_key(
    State(state): State<Arc<AppState>>,
    RequireAuth(user): RequireAuth,
    Json(request): Json<CreateApiKeyRequest>,
) -> ApiResult<(StatusCode, Json<CreateApiKeyResponse>)> {
    ensure_can_manage(&user)?;

    let created = state.auth.api_keys.create(&user.user_id, request.into()).await?;
    Ok((StatusCode::CREATED, Json(CreateApiKeyResponse::from(created))))
}

pub async fn list_api_keys(
    State(state): State<Arc<AppState>>,
    RequireAuth(user): RequireAuth,
) -> ApiResult<Json<Vec<ApiKeyInfo>>> {
    ensure_can_manage(&user)?;

    Ok(Json(state.auth.api_keys.list(&user.user_id).await?))
}

/// Enable or disable a key
pub async fn update_api_key(
    State(state): State<Arc<AppState>>,
    RequireAuth(user): RequireAuth,
    Path(key_id): Path<Uuid>,
    Json(request): Json<UpdateApiKeyRequest>,
) -> ApiResult<Json<ApiKeyInfo>> {
    ensure_can_manage(&user)?;

    let info = state
        .auth
        .api_keys
        .set_active(&user.user_id, key_id, request.is_active)
        .await?;
    Ok(Json(info))
}

pub async fn delete_api_key(
    State(state): State<Arc<AppState>>,
    RequireAuth(user): RequireAuth,
    Path(key_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    ensure_can_manage(&user)?;

    state.auth.api_keys.delete(&user.user_id, key_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

//! OIDC Login Handlers
//!
//! Login hands out a signed state token bound to the caller's IP plus the PKCE
//! verifier; the callback checks both before exchanging the code, then maps
//! the provider subject to a local user and issues local tokens.

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use tracing::info;

use clubhouse_auth::middleware::{device_info, requester_ip};
use clubhouse_auth::state::hash_requester_ip;
use clubhouse_auth::OidcBridge;
use clubhouse_db::NewFederatedUser;

use crate::dto::{OidcCallbackRequest, OidcCallbackResponse, OidcLoginResponse, OidcLogoutQuery, OidcLogoutResponse};
use crate::error::{ApiError, ApiResult};
use crate::handlers::auth::session_cookies;
use crate::state::AppState;

fn bridge(state: &AppState) -> ApiResult<&OidcBridge> {
    state.auth.oidc().ok_or(ApiError::OidcNotConfigured)
}

/// Start a login: authorization URL, state token and PKCE verifier
pub async fn login(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<Json<OidcLoginResponse>> {
    let bridge = bridge(&state)?;

    let state_token = state.auth.state.generate(&hash_requester_ip(&requester_ip(&headers)))?;
    let request = bridge.authorization_url(&state_token)?;

    Ok(Json(OidcLoginResponse {
        authorization_url: request.url,
        state: state_token,
        code_verifier: request.code_verifier,
    }))
}

/// Finish a login and issue local tokens
pub async fn callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<OidcCallbackRequest>,
) -> ApiResult<impl IntoResponse> {
    let bridge = bridge(&state)?;

    // Checked before any provider call
    state
        .auth
        .state
        .validate(&request.state, &hash_requester_ip(&requester_ip(&headers)))?;

    let login = bridge.exchange_code(&request.code, &request.code_verifier).await?;
    let identity = login.identity;

    let user = state
        .federated_users
        .find_or_create(NewFederatedUser {
            provider_subject: identity.subject,
            email: identity.email,
            display_name: identity.display_name,
        })
        .await?;

    let pair = state.auth.issue_session(&user.user_id, &device_info(&headers)).await?;
    info!(user_id = %user.user_id, profile_complete = user.profile_complete, "Federated login");

    let body = OidcCallbackResponse {
        access_token: pair.access_token.clone(),
        refresh_token: pair.refresh_token.clone(),
        token_type: pair.token_type.clone(),
        expires_in: pair.expires_in(),
        profile_complete: user.profile_complete,
        external_tokens: request.include_external_tokens.then_some(login.tokens),
    };

    Ok((session_cookies(state.auth.config(), &pair), Json(body)))
}

/// Provider end-session URL
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OidcLogoutQuery>,
) -> ApiResult<Json<OidcLogoutResponse>> {
    let logout_url = bridge(&state)?
        .logout_url(query.post_logout_redirect_uri.as_deref(), query.id_token_hint.as_deref())?;

    Ok(Json(OidcLogoutResponse { logout_url }))
}

//! Session Handlers
//!
//! Refresh rotation, logout and introspection of the caller's identity.

use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    response::{AppendHeaders, IntoResponse},
    Json,
};
use std::sync::Arc;

use clubhouse_auth::cookie::{build_clear_cookie, build_set_cookie};
use clubhouse_auth::middleware::{device_info, extract_refresh_token};
use clubhouse_auth::state::generate_csrf_token;
use clubhouse_auth::{AuthConfig, AuthError, RequireAuth, SessionInfo, TokenPair};

use crate::dto::{CsrfResponse, MeResponse, TokenResponse};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

type CookieHeaders = AppendHeaders<[(axum::http::HeaderName, String); 2]>;

/// `Set-Cookie` headers carrying both tokens of `pair`
pub(crate) fn session_cookies(config: &AuthConfig, pair: &TokenPair) -> CookieHeaders {
    let cookie = &config.cookie;
    AppendHeaders([
        (
            SET_COOKIE,
            build_set_cookie(
                cookie,
                &cookie.access_cookie,
                &pair.access_token,
                config.jwt.access_token_lifetime.as_secs() as i64,
            ),
        ),
        (
            SET_COOKIE,
            build_set_cookie(
                cookie,
                &cookie.refresh_cookie,
                &pair.refresh_token,
                config.jwt.refresh_token_lifetime.as_secs() as i64,
            ),
        ),
    ])
}

fn cleared_cookies(config: &AuthConfig) -> CookieHeaders {
    let cookie = &config.cookie;
    AppendHeaders([
        (SET_COOKIE, build_clear_cookie(cookie, &cookie.access_cookie)),
        (SET_COOKIE, build_clear_cookie(cookie, &cookie.refresh_cookie)),
    ])
}

fn presented_refresh_token(state: &AppState, headers: &HeaderMap) -> ApiResult<String> {
    extract_refresh_token(headers, &state.auth.config().cookie.refresh_cookie)
        .ok_or(ApiError::Auth(AuthError::Unauthenticated))
}

/// Rotate the presented refresh token into a new pair
pub async fn refresh(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    let presented = presented_refresh_token(&state, &headers)?;
    let pair = state.auth.refresh_session(&presented, &device_info(&headers)).await?;

    Ok((session_cookies(state.auth.config(), &pair), Json(TokenResponse::from(&pair))))
}

/// Revoke every session of the credential's owner
pub async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    let presented = presented_refresh_token(&state, &headers)?;
    state.auth.logout(&presented).await?;

    Ok((StatusCode::NO_CONTENT, cleared_cookies(state.auth.config())))
}

/// Revoke only the presented refresh token
pub async fn revoke(State(state): State<Arc<AppState>>, headers: HeaderMap) -> ApiResult<impl IntoResponse> {
    let presented = presented_refresh_token(&state, &headers)?;
    state.auth.refresh.revoke(&presented).await?;

    Ok((StatusCode::NO_CONTENT, cleared_cookies(state.auth.config())))
}

pub async fn me(RequireAuth(user): RequireAuth) -> Json<MeResponse> {
    Json(MeResponse::from(user))
}

/// Live refresh sessions of the caller
pub async fn sessions(
    State(state): State<Arc<AppState>>,
    RequireAuth(user): RequireAuth,
) -> ApiResult<Json<Vec<SessionInfo>>> {
    let sessions = state.auth.refresh.list_sessions(&user.user_id).await?;
    Ok(Json(sessions))
}

pub async fn csrf() -> Json<CsrfResponse> {
    Json(CsrfResponse {
        csrf_token: generate_csrf_token(),
    })
}

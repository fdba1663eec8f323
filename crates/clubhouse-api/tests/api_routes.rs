//! Router-level tests against in-memory repositories

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use clubhouse_api::{create_test_router, AppState};
use clubhouse_auth::oidc::ProviderMetadata;
use clubhouse_auth::{AuthConfig, AuthService, DeviceInfo, OidcBridge, OidcConfig, TokenPair};
use clubhouse_db::memory::{MemoryApiKeyRepo, MemoryFederatedUserRepo, MemoryRefreshTokenRepo};

fn config() -> AuthConfig {
    let mut config = AuthConfig::default();
    config.jwt.secret = "api-routes-test-secret-0123456789abcdef".to_string();
    config.state.secret = "api-routes-state-secret".to_string();
    config
}

fn state_with(auth: AuthService) -> Arc<AppState> {
    Arc::new(AppState::new(Arc::new(auth), Arc::new(MemoryFederatedUserRepo::new())))
}

fn auth_service() -> AuthService {
    AuthService::new(
        config(),
        Arc::new(MemoryRefreshTokenRepo::new()),
        Arc::new(MemoryApiKeyRepo::new()),
    )
}

fn app() -> (Router, Arc<AppState>) {
    let state = state_with(auth_service());
    (create_test_router(state.clone()), state)
}

struct TestResponse {
    status: StatusCode,
    cookies: Vec<String>,
    body: Value,
}

async fn send(router: &Router, method: &str, uri: &str, headers: &[(&str, &str)], body: Option<Value>) -> TestResponse {
    let mut request = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        request = request.header(*name, *value);
    }

    let body = match body {
        Some(json) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => Body::empty(),
    };

    let response = router.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let cookies = response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();

    TestResponse {
        status,
        cookies,
        body: serde_json::from_slice(&bytes).unwrap_or(Value::Null),
    }
}

async fn login(state: &AppState, user_id: &str) -> TokenPair {
    state.auth.issue_session(user_id, &DeviceInfo::default()).await.unwrap()
}

fn bearer(pair: &TokenPair) -> String {
    format!("Bearer {}", pair.access_token)
}

// =============================================================================
// Sessions
// =============================================================================

#[tokio::test]
async fn health_is_public() {
    let (router, _) = app();
    let res = send(&router, "GET", "/health", &[], None).await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["status"], "healthy");

    let ready = send(&router, "GET", "/ready", &[], None).await;
    assert_eq!(ready.status, StatusCode::OK);
    assert_eq!(ready.body["oidc_configured"], false);
}

#[tokio::test]
async fn refresh_without_credential_is_unauthorized() {
    let (router, _) = app();
    let res = send(&router, "POST", "/api/v1/auth/refresh", &[], None).await;

    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn refresh_rotates_and_sets_cookies() {
    let (router, state) = app();
    let pair = login(&state, "user-1").await;

    let res = send(
        &router,
        "POST",
        "/api/v1/auth/refresh",
        &[("X-Refresh-Token", &pair.refresh_token)],
        None,
    )
    .await;

    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["token_type"], "Bearer");
    assert_ne!(res.body["refresh_token"], pair.refresh_token.as_str());
    assert!(res.body["expires_in"].as_i64().unwrap() > 0);

    assert_eq!(res.cookies.len(), 2);
    assert!(res.cookies.iter().any(|c| c.starts_with("access_token=")));
    assert!(res.cookies.iter().all(|c| c.contains("HttpOnly") && c.contains("SameSite=Lax")));

    let replay = send(
        &router,
        "POST",
        "/api/v1/auth/refresh",
        &[("X-Refresh-Token", &pair.refresh_token)],
        None,
    )
    .await;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn refresh_accepts_every_credential_location() {
    let (router, state) = app();

    let pair = login(&state, "user-1").await;
    let cookie = format!("refresh_token={}", pair.refresh_token);
    let res = send(&router, "POST", "/api/v1/auth/refresh", &[("Cookie", &cookie)], None).await;
    assert_eq!(res.status, StatusCode::OK);

    let pair = login(&state, "user-2").await;
    let res = send(
        &router,
        "POST",
        "/api/v1/auth/refresh",
        &[("Authorization", &pair.refresh_token)],
        None,
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);

    let pair = login(&state, "user-3").await;
    let res = send(
        &router,
        "POST",
        "/api/v1/auth/refresh",
        &[("Authorization", &format!("Bearer {}", pair.refresh_token))],
        None,
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
}

#[tokio::test]
async fn logout_revokes_every_session_and_clears_cookies() {
    let (router, state) = app();
    let laptop = login(&state, "user-1").await;
    let phone = login(&state, "user-1").await;

    let res = send(
        &router,
        "POST",
        "/api/v1/auth/logout",
        &[("X-Refresh-Token", &laptop.refresh_token)],
        None,
    )
    .await;

    assert_eq!(res.status, StatusCode::NO_CONTENT);
    assert_eq!(res.cookies.len(), 2);
    assert!(res.cookies.iter().all(|c| c.contains("Max-Age=-1")));

    let res = send(
        &router,
        "POST",
        "/api/v1/auth/refresh",
        &[("X-Refresh-Token", &phone.refresh_token)],
        None,
    )
    .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_with_rotated_token_is_rejected() {
    let (router, state) = app();
    let original = login(&state, "user-1").await;
    let rotated = state
        .auth
        .refresh_session(&original.refresh_token, &DeviceInfo::default())
        .await
        .unwrap();

    let res = send(
        &router,
        "POST",
        "/api/v1/auth/logout",
        &[("X-Refresh-Token", &original.refresh_token)],
        None,
    )
    .await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.body["code"], "UNAUTHORIZED");

    let res = send(
        &router,
        "POST",
        "/api/v1/auth/refresh",
        &[("X-Refresh-Token", &rotated.refresh_token)],
        None,
    )
    .await;
    assert_eq!(res.status, StatusCode::OK);
}

#[tokio::test]
async fn revoke_only_ends_the_presented_session() {
    let (router, state) = app();
    let laptop = login(&state, "user-1").await;
    let phone = login(&state, "user-1").await;

    let res = send(
        &router,
        "POST",
        "/api/v1/auth/revoke",
        &[("X-Refresh-Token", &laptop.refresh_token)],
        None,
    )
    .await;
    assert_eq!(res.status, StatusCode::NO_CONTENT);

    let sessions = send(&router, "GET", "/api/v1/auth/sessions", &[("Authorization", &bearer(&phone))], None).await;
    assert_eq!(sessions.status, StatusCode::OK);
    assert_eq!(sessions.body.as_array().unwrap().len(), 1);
    assert!(sessions.body[0].get("token_hash").is_none());
}

#[tokio::test]
async fn me_reports_resolved_identity() {
    let (router, state) = app();
    let pair = login(&state, "user-9").await;

    let res = send(&router, "GET", "/api/v1/auth/me", &[("Authorization", &bearer(&pair))], None).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.body["user_id"], "user-9");
    assert_eq!(res.body["auth_method"], "bearer");

    let anonymous = send(&router, "GET", "/api/v1/auth/me", &[], None).await;
    assert_eq!(anonymous.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn csrf_token_is_issued() {
    let (router, _) = app();
    let res = send(&router, "GET", "/api/v1/auth/csrf", &[], None).await;

    assert_eq!(res.status, StatusCode::OK);
    assert!(clubhouse_auth::state::validate_csrf_token(res.body["csrf_token"].as_str().unwrap()));
}

// =============================================================================
// API keys
// =============================================================================

async fn create_key(router: &Router, auth: &str, body: Value) -> TestResponse {
    send(router, "POST", "/api/v1/api-keys", &[("Authorization", auth)], Some(body)).await
}

#[tokio::test]
async fn api_key_lifecycle() {
    let (router, state) = app();
    let owner = bearer(&login(&state, "owner-1").await);

    let created = create_key(&router, &owner, json!({ "name": "ci", "permissions": ["read"] })).await;
    assert_eq!(created.status, StatusCode::CREATED);
    let key = created.body["key"].as_str().unwrap().to_string();
    let id = created.body["id"].as_str().unwrap().to_string();
    assert!(key.starts_with("sk_live_"));
    assert!(key.starts_with(created.body["key_prefix"].as_str().unwrap()));

    let listed = send(&router, "GET", "/api/v1/api-keys", &[("Authorization", &owner)], None).await;
    assert_eq!(listed.body.as_array().unwrap().len(), 1);
    assert!(listed.body[0].get("key").is_none());
    assert!(listed.body[0].get("key_hash").is_none());

    let me = send(&router, "GET", "/api/v1/auth/me", &[("X-API-Key", &key)], None).await;
    assert_eq!(me.body["user_id"], "owner-1");
    assert_eq!(me.body["auth_method"], "api_key");
    assert_eq!(me.body["permissions"], json!(["read"]));

    let uri = format!("/api/v1/api-keys/{}", id);
    let disabled = send(&router, "PATCH", &uri, &[("Authorization", &owner)], Some(json!({ "is_active": false }))).await;
    assert_eq!(disabled.status, StatusCode::OK);
    assert_eq!(disabled.body["is_active"], false);

    let rejected = send(&router, "GET", "/api/v1/auth/me", &[("X-API-Key", &key)], None).await;
    assert_eq!(rejected.status, StatusCode::UNAUTHORIZED);

    let deleted = send(&router, "DELETE", &uri, &[("Authorization", &owner)], None).await;
    assert_eq!(deleted.status, StatusCode::NO_CONTENT);
    let again = send(&router, "DELETE", &uri, &[("Authorization", &owner)], None).await;
    assert_eq!(again.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn eleventh_active_key_is_refused() {
    let (router, state) = app();
    let owner = bearer(&login(&state, "owner-1").await);

    for i in 0..10 {
        let res = create_key(&router, &owner, json!({ "name": format!("key-{i}") })).await;
        assert_eq!(res.status, StatusCode::CREATED);
    }

    let res = create_key(&router, &owner, json!({ "name": "one-too-many" })).await;
    assert_eq!(res.status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(res.body["code"], "API_KEY_LIMIT_REACHED");
    assert_eq!(res.body["limit"], 10);

    let listed = send(&router, "GET", "/api/v1/api-keys", &[("Authorization", &owner)], None).await;
    assert_eq!(listed.body.as_array().unwrap().len(), 10);
}

#[tokio::test]
async fn other_owners_keys_are_invisible() {
    let (router, state) = app();
    let alice = bearer(&login(&state, "alice").await);
    let bob = bearer(&login(&state, "bob").await);

    let created = create_key(&router, &alice, json!({ "name": "alice-key" })).await;
    let uri = format!("/api/v1/api-keys/{}", created.body["id"].as_str().unwrap());

    let res = send(&router, "DELETE", &uri, &[("Authorization", &bob)], None).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);

    let listed = send(&router, "GET", "/api/v1/api-keys", &[("Authorization", &bob)], None).await;
    assert!(listed.body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn key_management_requires_scope_for_api_key_principals() {
    let (router, state) = app();
    let owner = bearer(&login(&state, "owner-1").await);

    let limited = create_key(&router, &owner, json!({ "name": "read-only", "permissions": ["read"] })).await;
    let limited = limited.body["key"].as_str().unwrap().to_string();
    let manager = create_key(&router, &owner, json!({ "name": "admin", "permissions": ["api_keys:manage"] })).await;
    let manager = manager.body["key"].as_str().unwrap().to_string();

    let res = send(&router, "GET", "/api/v1/api-keys", &[("X-API-Key", &limited)], None).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.body["code"], "FORBIDDEN");

    let res = send(&router, "GET", "/api/v1/api-keys", &[("X-API-Key", &manager)], None).await;
    assert_eq!(res.status, StatusCode::OK);
}

#[tokio::test]
async fn blank_key_name_is_rejected() {
    let (router, state) = app();
    let owner = bearer(&login(&state, "owner-1").await);

    let res = create_key(&router, &owner, json!({ "name": "   " })).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["code"], "VALIDATION_FAILED");
}

// =============================================================================
// OIDC
// =============================================================================

fn app_with_oidc() -> Router {
    let metadata = ProviderMetadata {
        issuer: "https://idp.example.com".to_string(),
        authorization_endpoint: "https://idp.example.com/authorize".to_string(),
        token_endpoint: "https://idp.example.com/token".to_string(),
        jwks_uri: "https://idp.example.com/jwks".to_string(),
        userinfo_endpoint: None,
        end_session_endpoint: Some("https://idp.example.com/logout".to_string()),
    };
    let oidc = OidcConfig::new("https://idp.example.com", "clubhouse-web", "https://app.example.com/callback");
    let bridge = OidcBridge::from_metadata(oidc, metadata).unwrap();

    create_test_router(state_with(auth_service().with_oidc(bridge)))
}

#[tokio::test]
async fn oidc_routes_report_missing_configuration() {
    let (router, _) = app();
    let res = send(&router, "GET", "/api/v1/auth/oidc/login", &[], None).await;

    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(res.body["code"], "OIDC_NOT_CONFIGURED");
}

#[tokio::test]
async fn oidc_login_returns_state_bound_authorization_url() {
    let router = app_with_oidc();
    let res = send(&router, "GET", "/api/v1/auth/oidc/login", &[("X-Forwarded-For", "203.0.113.9")], None).await;

    assert_eq!(res.status, StatusCode::OK);
    let url = res.body["authorization_url"].as_str().unwrap();
    assert!(url.starts_with("https://idp.example.com/authorize?"));
    assert!(url.contains("code_challenge_method=S256"));
    assert_eq!(res.body["state"].as_str().unwrap().split('.').count(), 3);
    assert!(!res.body["code_verifier"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn oidc_callback_rejects_state_from_another_requester() {
    let router = app_with_oidc();
    let login = send(&router, "GET", "/api/v1/auth/oidc/login", &[("X-Forwarded-For", "203.0.113.9")], None).await;

    let callback = json!({
        "code": "anything",
        "state": login.body["state"],
        "code_verifier": login.body["code_verifier"],
    });
    let res = send(
        &router,
        "POST",
        "/api/v1/auth/oidc/callback",
        &[("X-Forwarded-For", "198.51.100.77")],
        Some(callback),
    )
    .await;

    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.body["code"], "INVALID_STATE");
}

#[tokio::test]
async fn oidc_logout_url() {
    let router = app_with_oidc();
    let res = send(
        &router,
        "GET",
        "/api/v1/auth/oidc/logout?post_logout_redirect_uri=https%3A%2F%2Fapp.example.com%2F",
        &[],
        None,
    )
    .await;

    assert_eq!(res.status, StatusCode::OK);
    assert!(res.body["logout_url"]
        .as_str()
        .unwrap()
        .starts_with("https://idp.example.com/logout?"));
}

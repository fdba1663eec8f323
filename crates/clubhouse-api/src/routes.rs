//! API Routes

use axum::{
    routing::{get, patch, post},
    Router,
};
use clubhouse_auth::AuthLayer;
use std::sync::Arc;

use crate::handlers;
use crate::state::AppState;

/// Create API v1 routes.
///
/// `auth_layer` wraps only the routes that act on a resolved identity; the
/// session and OIDC routes read their own credentials.
pub fn api_v1_routes(auth_layer: AuthLayer) -> Router<Arc<AppState>> {
    Router::new()
        .merge(session_routes())
        .merge(oidc_routes())
        .merge(identified_routes().layer(auth_layer))
}

/// Routes driven by a refresh credential, or by nothing
fn session_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/revoke", post(handlers::auth::revoke))
        .route("/auth/csrf", get(handlers::auth::csrf))
}

fn oidc_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/oidc/login", get(handlers::oidc::login))
        .route("/auth/oidc/callback", post(handlers::oidc::callback))
        .route("/auth/oidc/logout", get(handlers::oidc::logout))
}

/// Routes resolved through the composite authenticator
fn identified_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/me", get(handlers::auth::me))
        .route("/auth/sessions", get(handlers::auth::sessions))
        .route(
            "/api-keys",
            post(handlers::api_keys::create_api_key).get(handlers::api_keys::list_api_keys),
        )
        .route(
            "/api-keys/:id",
            patch(handlers::api_keys::update_api_key).delete(handlers::api_keys::delete_api_key),
        )
}

//! Clubhouse Credential API
//!
//! HTTP surface over the credential core.
//!
//! # API Structure
//!
//! ```text
//! /api/v1/
//! ├── /auth          - Refresh, logout, identity, sessions, CSRF, OIDC login
//! └── /api-keys      - Owner-scoped API key management
//! /health            - Liveness
//! /ready             - Readiness
//! ```
//!
//! # Authentication Methods
//!
//! - **Bearer Token**: access token in `Authorization` or the access cookie
//! - **API Key**: `X-API-Key` header or `Authorization: ApiKey <key>`

pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

use axum::http::HeaderName;
use axum::Router;
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

pub use error::{ApiError, ApiResult};
pub use state::AppState;

/// API configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Enable CORS for browser clients
    pub enable_cors: bool,
    /// Allowed origins for CORS; `*` allows any
    pub cors_origins: Vec<String>,
    /// Enable request tracing
    pub enable_tracing: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enable_cors: true,
            cors_origins: vec!["*".to_string()],
            enable_tracing: true,
        }
    }
}

/// Create the main API router with all middleware
pub fn create_router(state: Arc<AppState>, config: ApiConfig) -> Router {
    let mut router = create_test_router(state);

    let x_request_id = HeaderName::from_static("x-request-id");
    router = router
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid));

    if config.enable_tracing {
        router = router.layer(TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown");

            tracing::info_span!(
                "http_request",
                method = %request.method(),
                uri = %request.uri().path(),
                request_id = %request_id,
            )
        }));
    }

    if config.enable_cors {
        let cors = if config.cors_origins.iter().any(|o| o == "*") {
            CorsLayer::permissive()
        } else {
            // Cookies need explicit origins and credentials
            CorsLayer::new()
                .allow_origin(
                    config
                        .cors_origins
                        .iter()
                        .filter_map(|o| o.parse().ok())
                        .collect::<Vec<_>>(),
                )
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PATCH,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers([
                    axum::http::header::AUTHORIZATION,
                    axum::http::header::CONTENT_TYPE,
                    HeaderName::from_static("x-api-key"),
                    HeaderName::from_static("x-refresh-token"),
                ])
                .allow_credentials(true)
        };
        router = router.layer(cors);
    }

    router
}

/// Routes and authentication without the outer middleware stack
pub fn create_test_router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/v1", routes::api_v1_routes(state.auth.layer()))
        .route("/health", axum::routing::get(handlers::health::health_check))
        .route("/ready", axum::routing::get(handlers::health::readiness_check))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ApiConfig::default();
        assert!(config.enable_cors);
        assert!(config.enable_tracing);
        assert_eq!(config.cors_origins, vec!["*".to_string()]);
    }
}

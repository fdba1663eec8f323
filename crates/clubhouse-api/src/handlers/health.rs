//! Health Check Handlers

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Unix milliseconds
    pub timestamp: i64,
}

#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub status: String,
    /// `None` when running without a database
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<ComponentStatus>,
    pub oidc_configured: bool,
}

#[derive(Debug, Serialize)]
pub struct ComponentStatus {
    pub name: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Liveness. Never touches dependencies.
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().timestamp_millis(),
    })
}

/// Readiness: 503 when the attached database does not answer
pub async fn readiness_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ReadinessResponse>) {
    let database = match &state.db {
        Some(db) => {
            let health = db.health_check().await;
            Some(ComponentStatus {
                name: "PostgreSQL".to_string(),
                status: if health.healthy { "healthy" } else { "unhealthy" }.to_string(),
                error: (!health.healthy).then(|| "PostgreSQL health check failed".to_string()),
            })
        }
        None => None,
    };

    let ready = database.as_ref().map_or(true, |db| db.status == "healthy");
    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(ReadinessResponse {
            status: if ready { "ready" } else { "not_ready" }.to_string(),
            database,
            oidc_configured: state.auth.oidc().is_some(),
        }),
    )
}

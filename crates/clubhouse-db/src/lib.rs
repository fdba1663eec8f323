//! Clubhouse Database Layer
//!
//! PostgreSQL persistence for the credential core: rotating refresh tokens,
//! hashed API keys and the links between identity-provider subjects and local
//! users.
//!
//! # Repository Pattern
//!
//! Each table sits behind a repository trait so the auth services can run
//! against PostgreSQL in production and against the in-memory implementations
//! (feature `mock`) in tests.

pub mod config;
pub mod error;
pub mod models;
pub mod repos;

#[cfg(feature = "mock")]
pub mod memory;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

pub use config::DatabaseConfig;
pub use error::{DbError, DbResult};
pub use models::*;
pub use repos::*;

/// PostgreSQL connection pool
#[derive(Clone)]
pub struct Database {
    pub pg: PgPool,
}

impl Database {
    /// Connect to PostgreSQL
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        info!("Connecting to PostgreSQL: {}", config.postgres_url_masked());

        let pg = PgPoolOptions::new()
            .max_connections(config.pg_max_connections)
            .min_connections(config.pg_min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.pg_acquire_timeout_secs))
            .connect(&config.postgres_url)
            .await
            .map_err(|e| DbError::Connection(format!("PostgreSQL: {}", e)))?;

        info!("Connected to PostgreSQL");

        Ok(Self { pg })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> DbResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pg)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;
        info!("Migrations complete");
        Ok(())
    }

    /// Health check
    pub async fn health_check(&self) -> HealthStatus {
        let postgres = sqlx::query("SELECT 1").fetch_one(&self.pg).await.is_ok();

        HealthStatus {
            postgres,
            healthy: postgres,
        }
    }

    /// Create repository instances
    pub fn refresh_token_repo(&self) -> PgRefreshTokenRepo {
        PgRefreshTokenRepo::new(self.pg.clone())
    }

    pub fn api_key_repo(&self) -> PgApiKeyRepo {
        PgApiKeyRepo::new(self.pg.clone())
    }

    pub fn federated_user_repo(&self) -> PgFederatedUserRepo {
        PgFederatedUserRepo::new(self.pg.clone())
    }
}

/// Health status of the database connection
#[derive(Debug, Clone)]
pub struct HealthStatus {
    pub postgres: bool,
    pub healthy: bool,
}

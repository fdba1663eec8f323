//! Clubhouse Auth Server
//!
//! Serves the credential API: refresh rotation, API key management and
//! federated login.
//!
//! # Usage
//!
//! ```bash
//! # Against Postgres
//! DATABASE_URL=postgres://... JWT_SECRET=... STATE_SECRET=... clubhouse-auth-server
//!
//! # Local development without a database
//! clubhouse-auth-server --in-memory --log-format pretty
//!
//! # With a config file and environment overrides
//! CLUBHOUSE__SERVER__PORT=8080 clubhouse-auth-server --config config/prod.toml
//! ```

mod config;

use std::future::{Future, IntoFuture};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Notify;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use clubhouse_api::{create_router, ApiConfig, AppState};
use clubhouse_auth::{AuthService, OidcBridge, RefreshTokenService};
use clubhouse_db::memory::{MemoryApiKeyRepo, MemoryFederatedUserRepo, MemoryRefreshTokenRepo};
use clubhouse_db::Database;

use crate::config::{LoggingConfig, ServerConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Clubhouse Auth Server - credential and session lifecycle API
#[derive(Parser, Debug)]
#[command(name = "clubhouse-auth-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, env = "CLUBHOUSE_CONFIG")]
    config: Option<String>,

    /// Host to bind to
    #[arg(long, env = "CLUBHOUSE_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "CLUBHOUSE_PORT")]
    port: Option<u16>,

    /// Log level or filter directive
    #[arg(long, env = "CLUBHOUSE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "CLUBHOUSE_LOG_FORMAT")]
    log_format: Option<String>,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Access/refresh token signing secret
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// OAuth state signing secret
    #[arg(long, env = "STATE_SECRET", hide_env_values = true)]
    state_secret: Option<String>,

    /// Serve from in-memory repositories (development only)
    #[arg(long, env = "CLUBHOUSE_IN_MEMORY")]
    in_memory: bool,

    /// Skip database migrations on startup
    #[arg(long)]
    skip_migrations: bool,
}

impl Args {
    fn apply(self, config: &mut ServerConfig) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }
        if let Some(format) = self.log_format {
            config.logging.format = format;
        }
        if let Some(url) = self.database_url {
            config.database.postgres_url = url;
        }
        if let Some(secret) = self.jwt_secret {
            config.auth.jwt.secret = secret;
        }
        if let Some(secret) = self.state_secret {
            config.auth.state.secret = secret;
        }
        if self.in_memory {
            config.server.in_memory = true;
        }
        if self.skip_migrations {
            config.server.run_migrations = false;
        }
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    let config_path = args.config.clone();
    let mut server_config = ServerConfig::load(config_path.as_deref())?;
    args.apply(&mut server_config);

    init_logging(&server_config.logging)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Clubhouse auth server");

    server_config.validate()?;

    let state = if server_config.server.in_memory {
        tracing::warn!("Running with in-memory repositories; all credentials are lost on restart");
        in_memory_state(&server_config).await?
    } else {
        postgres_state(&server_config).await?
    };

    spawn_purge_task(
        state.auth.refresh.clone(),
        server_config.auth.refresh.purge_interval,
    );

    let api_config = ApiConfig {
        enable_cors: server_config.api.enable_cors,
        cors_origins: server_config.api.cors_origins.clone(),
        enable_tracing: server_config.api.enable_tracing,
    };
    let app = create_router(state, api_config);

    let addr = server_config.server.socket_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!(%addr, "Server listening");

    serve_with_drain(listener, app, shutdown_signal(), server_config.server.shutdown_timeout()).await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}

// =============================================================================
// Initialization Functions
// =============================================================================

/// Initialize tracing/logging
fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => subscriber.with(fmt::layer().json().with_target(true)).try_init()?,
        _ => subscriber.with(fmt::layer().pretty().with_target(true)).try_init()?,
    }

    Ok(())
}

async fn postgres_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let db = Database::connect(&config.database)
        .await
        .context("Failed to connect to PostgreSQL")?;

    if config.server.run_migrations {
        db.migrate().await.context("Failed to run migrations")?;
    }

    let health = db.health_check().await;
    if !health.healthy {
        anyhow::bail!("Database health check failed");
    }
    tracing::info!(postgres = health.postgres, "Database health check passed");

    let auth = AuthService::from_database(&db, config.auth.clone());
    let auth = attach_oidc(auth, config).await;

    Ok(Arc::new(AppState::from_database(db, Arc::new(auth))))
}

async fn in_memory_state(config: &ServerConfig) -> anyhow::Result<Arc<AppState>> {
    let auth = AuthService::new(
        config.auth.clone(),
        Arc::new(MemoryRefreshTokenRepo::new()),
        Arc::new(MemoryApiKeyRepo::new()),
    );
    let auth = attach_oidc(auth, config).await;

    Ok(Arc::new(AppState::new(
        Arc::new(auth),
        Arc::new(MemoryFederatedUserRepo::new()),
    )))
}

/// Discover the configured provider. Federation stays disabled if discovery fails.
async fn attach_oidc(auth: AuthService, config: &ServerConfig) -> AuthService {
    let Some(oidc) = config.auth.oidc.clone() else {
        tracing::info!("OIDC login disabled");
        return auth;
    };

    let issuer = oidc.issuer_url.clone();
    match OidcBridge::discover(oidc).await {
        Ok(bridge) => auth.with_oidc(bridge),
        Err(e) => {
            tracing::error!(issuer = %issuer, error = %e, "OIDC discovery failed; federated login disabled");
            auth
        }
    }
}

/// Periodically delete expired refresh rows
fn spawn_purge_task(refresh: RefreshTokenService, every: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = refresh.purge_expired().await {
                tracing::warn!(error = %e, "Refresh token purge failed");
            }
        }
    });
}

// =============================================================================
// Graceful Shutdown
// =============================================================================

/// Serve until `signal` resolves, then stop accepting and give in-flight
/// requests at most `drain_timeout` to finish
async fn serve_with_drain<F>(listener: TcpListener, app: Router, signal: F, drain_timeout: Duration) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let draining = Arc::new(Notify::new());
    let notify = draining.clone();

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        signal.await;
        tracing::info!(
            timeout_secs = drain_timeout.as_secs(),
            "Waiting for in-flight requests to complete"
        );
        notify.notify_one();
    });

    tokio::select! {
        result = server.into_future() => result?,
        _ = async {
            draining.notified().await;
            tokio::time::sleep(drain_timeout).await;
        } => {
            tracing::warn!(
                timeout_secs = drain_timeout.as_secs(),
                "In-flight requests still running after drain timeout; exiting"
            );
        }
    }

    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, initiating graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

// =============================================================================
// Tests
// =============================================================================

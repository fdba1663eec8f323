//! Clubhouse Credential Core
//!
//! Credential and session lifecycle for the Clubhouse API:
//!
//! - **Access tokens**: short-lived HS256 JWTs resolved on every request
//! - **Refresh tokens**: single-use, rotated atomically against a stored row
//! - **API keys**: long-lived, hashed at rest, scope-limited, capped per owner
//! - **OAuth state**: stateless HMAC-signed tokens bound to the requester IP
//! - **OIDC federation**: external login exchanged for local tokens
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Request resolution                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  Request → AuthLayer → Authenticator → Handler               │
//! │                            │                                 │
//! │              ┌─────────────┴─────────────┐                   │
//! │              ▼                           ▼                   │
//! │      Bearer / cookie JWT            X-API-Key                │
//! │              │                           │                   │
//! │              ▼                           ▼                   │
//! │         JwtService                 ApiKeyService             │
//! │              └─────────────┬─────────────┘                   │
//! │                            ▼                                 │
//! │                    AuthenticatedUser                         │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod api_key;
pub mod config;
pub mod cookie;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod oidc;
pub mod refresh;
pub mod state;
pub mod types;

pub use api_key::{ApiKeyService, LastUsedRecorder};
pub use config::{AuthConfig, OidcConfig};
pub use error::{AuthError, AuthResult, ErrorResponse};
pub use jwt::JwtService;
pub use middleware::{AuthLayer, AuthMiddleware, AuthPolicy, Authenticator, CredentialScheme, OptionalUser, RequireAuth};
pub use oidc::{FederatedIdentity, FederatedLogin, OidcBridge};
pub use refresh::RefreshTokenService;
pub use state::StateSigner;
pub use types::*;

use clubhouse_db::{ApiKeyRepository, Database, RefreshTokenRepository};
use std::sync::Arc;

/// Credential services wired to one set of repositories
#[derive(Clone)]
pub struct AuthService {
    pub jwt: JwtService,
    pub refresh: RefreshTokenService,
    pub api_keys: ApiKeyService,
    pub state: StateSigner,
    authenticator: Arc<Authenticator>,
    oidc: Option<OidcBridge>,
    config: AuthConfig,
}

impl AuthService {
    /// Build the services over arbitrary repositories.
    ///
    /// Spawns the API key usage recorder, so this must run inside a Tokio runtime.
    pub fn new(
        config: AuthConfig,
        refresh_repo: Arc<dyn RefreshTokenRepository>,
        api_key_repo: Arc<dyn ApiKeyRepository>,
    ) -> Self {
        let jwt = JwtService::new(config.jwt.clone());
        let refresh = RefreshTokenService::new(jwt.clone(), refresh_repo);

        let (recorder, _worker) =
            LastUsedRecorder::spawn(api_key_repo.clone(), config.api_key.last_used_queue_capacity);
        let api_keys = ApiKeyService::new(api_key_repo, recorder, config.api_key.clone());

        let authenticator = Arc::new(Authenticator::new(
            jwt.clone(),
            api_keys.clone(),
            AuthPolicy::default(),
            config.cookie.access_cookie.clone(),
        ));

        Self {
            jwt,
            refresh,
            api_keys,
            state: StateSigner::new(&config.state),
            authenticator,
            oidc: None,
            config,
        }
    }

    /// Build the services over the Postgres repositories
    pub fn from_database(db: &Database, config: AuthConfig) -> Self {
        Self::new(
            config,
            Arc::new(db.refresh_token_repo()),
            Arc::new(db.api_key_repo()),
        )
    }

    /// Attach an identity provider
    pub fn with_oidc(mut self, bridge: OidcBridge) -> Self {
        self.oidc = Some(bridge);
        self
    }

    /// Replace the credential policy used by [`AuthService::layer`]
    pub fn with_policy(mut self, policy: AuthPolicy) -> Self {
        self.authenticator = Arc::new(Authenticator::new(
            self.jwt.clone(),
            self.api_keys.clone(),
            policy,
            self.config.cookie.access_cookie.clone(),
        ));
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn oidc(&self) -> Option<&OidcBridge> {
        self.oidc.as_ref()
    }

    pub fn authenticator(&self) -> &Arc<Authenticator> {
        &self.authenticator
    }

    /// Create an auth layer for an Axum router
    pub fn layer(&self) -> AuthLayer {
        AuthLayer::new(self.authenticator.clone())
    }

    /// Issue a fresh access/refresh pair for `user_id` (login)
    pub async fn issue_session(&self, user_id: &str, device: &DeviceInfo) -> AuthResult<TokenPair> {
        let (access_token, access_expires_at) = self.jwt.issue_access(user_id)?;
        let refresh = self.refresh.issue(user_id, device).await?;

        Ok(TokenPair::new(
            access_token,
            refresh.token,
            access_expires_at.timestamp(),
            refresh.expires_at.timestamp(),
        ))
    }

    /// Rotate a presented refresh token into a new pair
    pub async fn refresh_session(&self, presented: &str, device: &DeviceInfo) -> AuthResult<TokenPair> {
        let (user_id, refresh) = self.refresh.rotate(presented, device).await?;
        let (access_token, access_expires_at) = self.jwt.issue_access(&user_id)?;

        Ok(TokenPair::new(
            access_token,
            refresh.token,
            access_expires_at.timestamp(),
            refresh.expires_at.timestamp(),
        ))
    }

    /// Revoke every refresh row owned by the holder of `presented`.
    ///
    /// The presented token is consumed first, so only a live token can end
    /// the owner's other sessions. Returns the number of rows removed.
    pub async fn logout(&self, presented: &str) -> AuthResult<u64> {
        let user_id = self.refresh.revoke(presented).await?;
        let others = self.refresh.revoke_all(&user_id).await?;
        Ok(others + 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clubhouse_db::memory::{MemoryApiKeyRepo, MemoryRefreshTokenRepo};

    fn service() -> (AuthService, MemoryRefreshTokenRepo) {
        let mut config = AuthConfig::default();
        config.jwt.secret = "lib-test-secret-with-enough-length".to_string();
        let refresh_repo = MemoryRefreshTokenRepo::new();

        let service = AuthService::new(config, Arc::new(refresh_repo.clone()), Arc::new(MemoryApiKeyRepo::new()));
        (service, refresh_repo)
    }

    #[tokio::test]
    async fn test_issue_and_refresh_session() {
        let (service, repo) = service();
        let device = DeviceInfo::new(Some("test-agent".to_string()), Some("192.0.2.1".to_string()));

        let pair = service.issue_session("user-1", &device).await.unwrap();
        assert_eq!(service.jwt.verify(&pair.access_token, TokenType::Access).unwrap(), "user-1");
        assert_eq!(repo.len().await, 1);

        let rotated = service.refresh_session(&pair.refresh_token, &device).await.unwrap();
        assert_ne!(rotated.refresh_token, pair.refresh_token);
        assert_eq!(repo.len().await, 1);

        let replay = service.refresh_session(&pair.refresh_token, &device).await;
        assert!(matches!(replay, Err(AuthError::RefreshTokenReused)));
    }

    #[tokio::test]
    async fn test_logout_revokes_all_sessions() {
        let (service, repo) = service();
        let device = DeviceInfo::default();

        let first = service.issue_session("user-1", &device).await.unwrap();
        service.issue_session("user-1", &device).await.unwrap();
        service.issue_session("user-2", &device).await.unwrap();

        assert_eq!(service.logout(&first.refresh_token).await.unwrap(), 2);
        assert_eq!(repo.len().await, 1);
    }

    #[tokio::test]
    async fn test_logout_with_rotated_token_keeps_sessions() {
        let (service, repo) = service();
        let device = DeviceInfo::default();

        let original = service.issue_session("user-1", &device).await.unwrap();
        let rotated = service.refresh_session(&original.refresh_token, &device).await.unwrap();
        let other = service.issue_session("user-1", &device).await.unwrap();

        assert!(matches!(
            service.logout(&original.refresh_token).await,
            Err(AuthError::RefreshTokenReused)
        ));
        assert_eq!(repo.len().await, 2);
        assert!(service.refresh_session(&rotated.refresh_token, &device).await.is_ok());
        assert!(service.refresh_session(&other.refresh_token, &device).await.is_ok());
    }

    #[tokio::test]
    async fn test_logout_rejects_access_token() {
        let (service, _) = service();
        let pair = service.issue_session("user-1", &DeviceInfo::default()).await.unwrap();

        assert!(matches!(
            service.logout(&pair.access_token).await,
            Err(AuthError::InvalidRefreshToken)
        ));
    }
}

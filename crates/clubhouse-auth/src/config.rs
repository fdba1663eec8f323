//! Authentication configuration
//!
//! Signing secrets are plain configuration values handed to each component at
//! construction; nothing here reads process-global state after `from_env`.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Access/refresh token signing
    pub jwt: JwtConfig,
    /// Refresh token storage
    pub refresh: RefreshConfig,
    /// API key issuance and verification
    pub api_key: ApiKeyConfig,
    /// OAuth state token signing
    pub state: StateConfig,
    /// Session cookie attributes
    pub cookie: CookieConfig,
    /// External OpenID Connect provider (disabled when absent)
    pub oidc: Option<OidcConfig>,
}

/// JWT token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    /// Secret key for signing tokens (at least 256 bits)
    pub secret: String,
    /// Access token lifetime
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,
    /// Refresh token lifetime
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,
    /// Token issuer claim
    pub issuer: String,
    /// Token audience claim
    pub audience: String,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(), // Must be set in production
            access_token_lifetime: Duration::from_secs(15 * 60), // 15 minutes
            refresh_token_lifetime: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
            issuer: "clubhouse".to_string(),
            audience: "clubhouse-api".to_string(),
        }
    }
}

/// Refresh token store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshConfig {
    /// How often the server purges expired refresh rows
    #[serde(with = "humantime_serde")]
    pub purge_interval: Duration,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            purge_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// API key configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeyConfig {
    /// Maximum active API keys per user
    pub max_active_keys_per_user: usize,
    /// Label placed in front of generated keys (`<label>_<random>`)
    pub key_label: String,
    /// Capacity of the last-used update queue
    pub last_used_queue_capacity: usize,
}

impl Default for ApiKeyConfig {
    fn default() -> Self {
        Self {
            max_active_keys_per_user: 10,
            key_label: "sk_live".to_string(),
            last_used_queue_capacity: 1024,
        }
    }
}

/// OAuth state token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// HMAC secret for state signatures
    pub secret: String,
    /// How long a state token stays valid after issuance
    #[serde(with = "humantime_serde")]
    pub validity: Duration,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            validity: Duration::from_secs(10 * 60), // 10 minutes
        }
    }
}

/// Cookie attributes for the access/refresh cookies
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Name of the access token cookie
    pub access_cookie: String,
    /// Name of the refresh token cookie
    pub refresh_cookie: String,
    /// Set the `Secure` attribute
    pub secure: bool,
    /// Optional `Domain` attribute
    pub domain: Option<String>,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            access_cookie: "access_token".to_string(),
            refresh_cookie: "refresh_token".to_string(),
            secure: true,
            domain: None,
        }
    }
}

/// External OpenID Connect provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// Issuer URL; discovery is fetched from `<issuer>/.well-known/openid-configuration`
    pub issuer_url: String,
    /// Client identifier registered with the provider
    pub client_id: String,
    /// Client secret (confidential clients only)
    pub client_secret: Option<String>,
    /// Redirect target registered with the provider
    pub redirect_url: String,
    /// Requested scopes
    pub scopes: Vec<String>,
    /// Upper bound on any single provider call
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// How long fetched signing keys are trusted before refetching
    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,
    /// Minimum gap between key refetches triggered by an unknown `kid`
    #[serde(default = "default_jwks_refetch_interval", with = "humantime_serde")]
    pub jwks_min_refetch_interval: Duration,
}

fn default_jwks_refetch_interval() -> Duration {
    Duration::from_secs(30)
}

impl OidcConfig {
    pub fn new(issuer_url: impl Into<String>, client_id: impl Into<String>, redirect_url: impl Into<String>) -> Self {
        Self {
            issuer_url: issuer_url.into(),
            client_id: client_id.into(),
            client_secret: None,
            redirect_url: redirect_url.into(),
            scopes: vec!["openid".to_string(), "profile".to_string(), "email".to_string()],
            request_timeout: Duration::from_secs(10),
            jwks_cache_ttl: Duration::from_secs(60 * 60),
            jwks_min_refetch_interval: default_jwks_refetch_interval(),
        }
    }
}

impl AuthConfig {
    /// Create configuration from environment variables
    ///
    /// OIDC is enabled only when `OIDC_ISSUER_URL`, `OIDC_CLIENT_ID` and
    /// `OIDC_REDIRECT_URL` are all present.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(secret) = std::env::var("JWT_SECRET") {
            config.jwt.secret = secret;
        }
        if let Ok(issuer) = std::env::var("JWT_ISSUER") {
            config.jwt.issuer = issuer;
        }
        if let Ok(audience) = std::env::var("JWT_AUDIENCE") {
            config.jwt.audience = audience;
        }
        if let Ok(secret) = std::env::var("STATE_SECRET") {
            config.state.secret = secret;
        }
        if let Ok(secure) = std::env::var("COOKIE_SECURE") {
            config.cookie.secure = secure != "false";
        }
        if let Ok(domain) = std::env::var("COOKIE_DOMAIN") {
            config.cookie.domain = Some(domain);
        }

        if let (Ok(issuer), Ok(client_id), Ok(redirect)) = (
            std::env::var("OIDC_ISSUER_URL"),
            std::env::var("OIDC_CLIENT_ID"),
            std::env::var("OIDC_REDIRECT_URL"),
        ) {
            let mut oidc = OidcConfig::new(issuer, client_id, redirect);
            oidc.client_secret = std::env::var("OIDC_CLIENT_SECRET").ok();
            config.oidc = Some(oidc);
        }

        config
    }

    /// Validate the configuration, collecting every problem found
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.jwt.secret.is_empty() {
            errors.push("JWT secret must be set".to_string());
        } else if self.jwt.secret.len() < 32 {
            errors.push("JWT secret should be at least 256 bits (32 bytes)".to_string());
        }
        if self.jwt.access_token_lifetime.is_zero() || self.jwt.refresh_token_lifetime.is_zero() {
            errors.push("Token lifetimes must be greater than zero".to_string());
        }

        if self.state.secret.is_empty() {
            errors.push("State secret must be set".to_string());
        }
        if self.state.validity.is_zero() {
            errors.push("State validity window must be greater than zero".to_string());
        }

        if self.api_key.max_active_keys_per_user == 0 {
            errors.push("API key limit must be greater than zero".to_string());
        }
        if self.api_key.last_used_queue_capacity == 0 {
            errors.push("Last-used queue capacity must be greater than zero".to_string());
        }
        if self.api_key.key_label.is_empty() || self.api_key.key_label.len() > 10 {
            errors.push("API key label must be 1 to 10 characters".to_string());
        }

        if let Some(oidc) = &self.oidc {
            if !oidc.issuer_url.starts_with("http") {
                errors.push("OIDC issuer URL must be an http(s) URL".to_string());
            }
            if oidc.client_id.is_empty() {
                errors.push("OIDC client id must be set".to_string());
            }
            if !oidc.scopes.iter().any(|s| s == "openid") {
                errors.push("OIDC scopes must include openid".to_string());
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

//! Core authentication types
//!
//! Shared types used across all authentication components.

use chrono::{DateTime, Utc};
use clubhouse_db::{DbApiKey, DbRefreshToken};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Scope granting every permission to an API key
pub const WILDCARD_PERMISSION: &str = "*";

// =============================================================================
// Authenticated principal
// =============================================================================

/// Identity resolved for a request by the composite authenticator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    /// Local user ID
    pub user_id: String,
    /// Scheme that resolved the identity
    pub auth_method: AuthMethod,
    /// API key ID (API key auth only)
    pub api_key_id: Option<Uuid>,
    /// Scopes granted to the credential (API key auth only)
    pub permissions: HashSet<String>,
}

impl AuthenticatedUser {
    /// Principal resolved from an access token
    pub fn from_bearer(user_id: String) -> Self {
        Self {
            user_id,
            auth_method: AuthMethod::Bearer,
            api_key_id: None,
            permissions: HashSet::new(),
        }
    }

    /// Principal resolved from a verified API key
    pub fn from_api_key(principal: ApiKeyPrincipal) -> Self {
        Self {
            user_id: principal.user_id,
            auth_method: AuthMethod::ApiKey,
            api_key_id: Some(principal.key_id),
            permissions: principal.permissions,
        }
    }

    /// Check whether the credential carries a scope.
    ///
    /// Access tokens act with the full authority of their user; API keys are
    /// limited to the scopes they were created with.
    pub fn has_permission(&self, permission: &str) -> bool {
        match self.auth_method {
            AuthMethod::Bearer => true,
            AuthMethod::ApiKey => {
                self.permissions.contains(permission) || self.permissions.contains(WILDCARD_PERMISSION)
            }
        }
    }
}

/// Authentication scheme used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Signed access token
    Bearer,
    /// Long-lived API key
    ApiKey,
}

// =============================================================================
// Token Types
// =============================================================================

/// Access + refresh token pair
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token expiry (Unix timestamp)
    pub access_expires_at: i64,
    /// Refresh token expiry (Unix timestamp)
    pub refresh_expires_at: i64,
    /// Always "Bearer"
    pub token_type: String,
}

impl TokenPair {
    pub fn new(
        access_token: String,
        refresh_token: String,
        access_expires_at: i64,
        refresh_expires_at: i64,
    ) -> Self {
        Self {
            access_token,
            refresh_token,
            access_expires_at,
            refresh_expires_at,
            token_type: "Bearer".to_string(),
        }
    }

    /// Seconds until the access token expires
    pub fn expires_in(&self) -> i64 {
        (self.access_expires_at - Utc::now().timestamp()).max(0)
    }
}

/// Token kind carried in the claims
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    Access,
    Refresh,
}

/// JWT claims structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Subject (user ID)
    pub sub: String,
    pub token_type: TokenType,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Not before (Unix timestamp)
    pub nbf: i64,
    pub iss: String,
    pub aud: String,
    /// Unique per token, so two tokens minted in the same second still differ
    pub jti: String,
}

// =============================================================================
// Refresh sessions
// =============================================================================

/// Request metadata stored alongside a refresh token
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
}

impl DeviceInfo {
    pub fn new(user_agent: Option<String>, ip_address: Option<String>) -> Self {
        Self { user_agent, ip_address }
    }
}

/// A freshly minted, persisted refresh token
#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// A live refresh session as shown to its owner (never the token itself)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl From<DbRefreshToken> for SessionInfo {
    fn from(row: DbRefreshToken) -> Self {
        Self {
            id: row.id,
            user_agent: row.user_agent,
            ip_address: row.ip_address,
            created_at: row.created_at,
            expires_at: row.expires_at,
        }
    }
}

// =============================================================================
// API Key Types
// =============================================================================

/// Output of key generation. `plaintext` must be handed to the caller once and dropped.
#[derive(Debug, Clone)]
pub struct GeneratedApiKey {
    pub plaintext: String,
    /// Lowercase hex SHA-256 of `plaintext`
    pub hash: String,
    /// Recognizable fragment, at most 20 characters
    pub display_prefix: String,
}

/// Parameters for a new API key
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewApiKeyRequest {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Public view of a stored key. Never carries the plaintext or the hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyInfo {
    pub id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub permissions: Vec<String>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<DbApiKey> for ApiKeyInfo {
    fn from(key: DbApiKey) -> Self {
        Self {
            id: key.id,
            name: key.name,
            key_prefix: key.key_prefix,
            permissions: key.permissions,
            is_active: key.is_active,
            expires_at: key.expires_at,
            last_used_at: key.last_used_at,
            created_at: key.created_at,
        }
    }
}

/// Result of key creation: the stored view plus the one-time plaintext
#[derive(Debug, Clone)]
pub struct CreatedApiKey {
    pub info: ApiKeyInfo,
    pub plaintext: String,
}

/// Owner and scopes of a verified API key
#[derive(Debug, Clone)]
pub struct ApiKeyPrincipal {
    pub key_id: Uuid,
    pub user_id: String,
    pub permissions: HashSet<String>,
}

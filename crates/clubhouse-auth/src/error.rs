//! Authentication error types
//!
//! Errors carry their precise cause for logging, but every credential failure
//! maps to the same client-facing code and message so a caller cannot tell a
//! forged token from an expired or already-rotated one.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Message shared by every authentication failure
const UNAUTHORIZED_MESSAGE: &str = "Authentication failed";

/// Authentication error types
#[derive(Debug, Error)]
pub enum AuthError {
    // =========================================================================
    // Validation
    // =========================================================================
    /// Required input missing or empty
    #[error("Validation failed: {0}")]
    Validation(String),

    // =========================================================================
    // Authentication
    // =========================================================================
    /// No credential was presented
    #[error("Authentication required")]
    Unauthenticated,

    /// Token is malformed or its signature does not verify
    #[error("Invalid token")]
    InvalidToken,

    /// Token has expired
    #[error("Token has expired")]
    TokenExpired,

    /// Token kind mismatch (refresh token presented as access token, etc.)
    #[error("Invalid token type")]
    InvalidTokenType,

    /// Refresh token failed verification
    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    /// Refresh token verified but no longer has a stored row
    #[error("Refresh token already used or revoked")]
    RefreshTokenReused,

    /// No key matches the presented digest
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Key exists but is disabled
    #[error("API key is inactive")]
    ApiKeyInactive,

    /// Key exists but its expiry has passed
    #[error("API key has expired")]
    ApiKeyExpired,

    /// Identity token from the external provider failed verification
    #[error("Invalid ID token: {0}")]
    InvalidIdToken(String),

    /// Provider's token endpoint refused the authorization code
    #[error("Authorization code rejected")]
    CodeRejected,

    // =========================================================================
    // Rate limit
    // =========================================================================
    /// Owner already has the maximum number of active keys
    #[error("Maximum of {limit} active API keys reached")]
    ApiKeyLimitReached { limit: usize },

    // =========================================================================
    // Lookup
    // =========================================================================
    /// API key not found for this owner
    #[error("API key not found")]
    ApiKeyNotFound,

    // =========================================================================
    // OAuth state
    // =========================================================================
    /// State token is malformed, expired, bound to another requester or tampered
    #[error("Invalid state")]
    InvalidState,

    // =========================================================================
    // External provider
    // =========================================================================
    /// Identity provider unreachable, timed out or misconfigured
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    // =========================================================================
    // Internal
    // =========================================================================
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cryptographic operation failed
    #[error("Cryptographic error: {0}")]
    Crypto(String),

    /// Internal error (should not be exposed to clients)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::Validation(_) | Self::InvalidState => 400,

            // 401 Unauthorized
            _ if self.is_authentication_failure() => 401,

            // 404 Not Found
            Self::ApiKeyNotFound => 404,

            // 429 Too Many Requests
            Self::ApiKeyLimitReached { .. } => 429,

            // 503 Service Unavailable
            Self::ServiceUnavailable(_) => 503,

            // 500 Internal Server Error
            _ => 500,
        }
    }

    /// Whether this error belongs to the uniform 401 class
    pub fn is_authentication_failure(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated
                | Self::InvalidToken
                | Self::TokenExpired
                | Self::InvalidTokenType
                | Self::InvalidRefreshToken
                | Self::RefreshTokenReused
                | Self::InvalidApiKey
                | Self::ApiKeyInactive
                | Self::ApiKeyExpired
                | Self::InvalidIdToken(_)
                | Self::CodeRejected
        )
    }

    /// Get an error code for the client (safe to expose)
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_FAILED",
            _ if self.is_authentication_failure() => "UNAUTHORIZED",
            Self::ApiKeyLimitReached { .. } => "API_KEY_LIMIT_REACHED",
            Self::ApiKeyNotFound => "API_KEY_NOT_FOUND",
            Self::InvalidState => "INVALID_STATE",
            Self::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code() >= 500
    }

    /// Get safe message for client (doesn't leak internal details)
    pub fn client_message(&self) -> String {
        match self {
            _ if self.is_authentication_failure() => UNAUTHORIZED_MESSAGE.to_string(),
            Self::ServiceUnavailable(_) => "Identity provider unavailable".to_string(),
            Self::Database(_) | Self::Config(_) | Self::Crypto(_) | Self::Internal(_) => {
                "An internal error occurred".to_string()
            }
            _ => self.to_string(),
        }
    }
}

/// Error response for API clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (machine-readable)
    pub code: String,
    /// Error message (human-readable)
    pub message: String,
    /// Active key limit, when that is what was hit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl From<&AuthError> for ErrorResponse {
    fn from(error: &AuthError) -> Self {
        let limit = match error {
            AuthError::ApiKeyLimitReached { limit } => Some(*limit),
            _ => None,
        };

        Self {
            code: error.error_code().to_string(),
            message: error.client_message(),
            limit,
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::TokenExpired,
            _ => Self::InvalidToken,
        }
    }
}

impl From<clubhouse_db::DbError> for AuthError {
    fn from(err: clubhouse_db::DbError) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(err: reqwest::Error) -> Self {
        Self::ServiceUnavailable(err.to_string())
    }
}

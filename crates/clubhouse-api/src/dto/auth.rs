//! Session DTOs

use clubhouse_auth::{AuthMethod, AuthenticatedUser, TokenPair};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Token pair returned by refresh and OIDC login
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    /// Seconds until the access token expires
    pub expires_in: i64,
}

impl From<&TokenPair> for TokenResponse {
    fn from(pair: &TokenPair) -> Self {
        Self {
            access_token: pair.access_token.clone(),
            refresh_token: pair.refresh_token.clone(),
            token_type: pair.token_type.clone(),
            expires_in: pair.expires_in(),
        }
    }
}

/// The resolved identity of the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeResponse {
    pub user_id: String,
    pub auth_method: AuthMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_id: Option<Uuid>,
    /// Sorted scopes; empty for bearer principals, which are unrestricted
    pub permissions: Vec<String>,
}

impl From<AuthenticatedUser> for MeResponse {
    fn from(user: AuthenticatedUser) -> Self {
        let mut permissions: Vec<String> = user.permissions.into_iter().collect();
        permissions.sort();

        Self {
            user_id: user.user_id,
            auth_method: user.auth_method,
            api_key_id: user.api_key_id,
            permissions,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsrfResponse {
    pub csrf_token: String,
}

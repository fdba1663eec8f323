//! OIDC login DTOs

use clubhouse_auth::oidc::ExternalTokenSet;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcLoginResponse {
    pub authorization_url: String,
    pub state: String,
    /// PKCE verifier the client must send back with the callback
    pub code_verifier: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OidcCallbackRequest {
    pub code: String,
    pub state: String,
    pub code_verifier: String,
    /// Echo the provider's raw token set in the response
    #[serde(default)]
    pub include_external_tokens: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcCallbackResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub profile_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_tokens: Option<ExternalTokenSet>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct OidcLogoutQuery {
    pub post_logout_redirect_uri: Option<String>,
    pub id_token_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcLogoutResponse {
    pub logout_url: String,
}

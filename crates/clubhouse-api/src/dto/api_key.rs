//! API key DTOs

use chrono::{DateTime, Utc};
use clubhouse_auth::{CreatedApiKey, NewApiKeyRequest};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl From<CreateApiKeyRequest> for NewApiKeyRequest {
    fn from(request: CreateApiKeyRequest) -> Self {
        Self {
            name: request.name,
            permissions: request.permissions,
            expires_at: request.expires_at,
        }
    }
}

/// The only response that ever carries the plaintext key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateApiKeyResponse {
    pub id: Uuid,
    pub name: String,
    pub key: String,
    pub key_prefix: String,
    pub is_active: bool,
    pub permissions: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<CreatedApiKey> for CreateApiKeyResponse {
    fn from(created: CreatedApiKey) -> Self {
        let info = created.info;
        Self {
            id: info.id,
            name: info.name,
            key: created.plaintext,
            key_prefix: info.key_prefix,
            is_active: info.is_active,
            permissions: info.permissions,
            expires_at: info.expires_at,
            created_at: info.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateApiKeyRequest {
    pub is_active: bool,
}

//! Database models - mapped from PostgreSQL tables

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ============================================================================
// Refresh Token Models
// ============================================================================

/// A persisted refresh token row.
///
/// Only the SHA-256 digest of the token value is stored.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbRefreshToken {
    pub id: Uuid,
    pub user_id: String,
    pub token_hash: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Values for a refresh token row about to be inserted
#[derive(Debug, Clone)]
pub struct NewRefreshToken {
    pub user_id: String,
    pub token_hash: String,
    pub user_agent: Option<String>,
    pub ip_address: Option<String>,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// API Key Models
// ============================================================================

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbApiKey {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub permissions: Vec<String>,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DbApiKey {
    /// Whether the key has an expiry that lies before `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

#[derive(Debug, Clone)]
pub struct NewApiKey {
    pub user_id: String,
    pub name: String,
    pub key_hash: String,
    pub key_prefix: String,
    pub permissions: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

// ============================================================================
// Federated User Models
// ============================================================================

/// Link between an external identity provider subject and a local user
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbFederatedUser {
    pub user_id: String,
    pub provider_subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub profile_complete: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewFederatedUser {
    pub provider_subject: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
}

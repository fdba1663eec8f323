//! In-memory repositories
//!
//! Used by tests and development mode. Each repository keeps its rows behind a
//! single `RwLock`, and every read-then-write sequence runs under one write
//! guard, which gives the same atomicity the PostgreSQL implementations get
//! from transactions.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    Activation, ApiKeyRepository, DbApiKey, DbError, DbFederatedUser, DbRefreshToken, DbResult,
    FederatedUserRepository, NewApiKey, NewFederatedUser, NewRefreshToken, RefreshTokenRepository,
};

// =============================================================================
// Refresh tokens
// =============================================================================

/// Refresh token rows keyed by token hash
#[derive(Clone, Default)]
pub struct MemoryRefreshTokenRepo {
    rows: Arc<RwLock<HashMap<String, DbRefreshToken>>>,
}

impl MemoryRefreshTokenRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored rows
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }
}

fn refresh_row(token: NewRefreshToken) -> DbRefreshToken {
    DbRefreshToken {
        id: Uuid::new_v4(),
        user_id: token.user_id,
        token_hash: token.token_hash,
        user_agent: token.user_agent,
        ip_address: token.ip_address,
        expires_at: token.expires_at,
        created_at: Utc::now(),
    }
}

#[async_trait]
impl RefreshTokenRepository for MemoryRefreshTokenRepo {
    async fn insert(&self, token: NewRefreshToken) -> DbResult<DbRefreshToken> {
        let mut rows = self.rows.write().await;
        if rows.contains_key(&token.token_hash) {
            return Err(DbError::Duplicate("refresh token hash already stored".to_string()));
        }
        let row = refresh_row(token);
        rows.insert(row.token_hash.clone(), row.clone());
        Ok(row)
    }

    async fn consume_and_replace(
        &self,
        user_id: &str,
        token_hash: &str,
        replacement: NewRefreshToken,
    ) -> DbResult<Option<DbRefreshToken>> {
        let mut rows = self.rows.write().await;

        match rows.get(token_hash) {
            Some(row) if row.user_id == user_id => {}
            _ => return Ok(None),
        }
        if rows.contains_key(&replacement.token_hash) {
            return Err(DbError::Duplicate("refresh token hash already stored".to_string()));
        }

        rows.remove(token_hash);
        let row = refresh_row(replacement);
        rows.insert(row.token_hash.clone(), row.clone());
        Ok(Some(row))
    }

    async fn delete_by_hash(&self, user_id: &str, token_hash: &str) -> DbResult<bool> {
        let mut rows = self.rows.write().await;
        match rows.get(token_hash) {
            Some(row) if row.user_id == user_id => Ok(rows.remove(token_hash).is_some()),
            _ => Ok(false),
        }
    }

    async fn delete_all_for_user(&self, user_id: &str) -> DbResult<u64> {
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, row| row.user_id != user_id);
        Ok((before - rows.len()) as u64)
    }

    async fn list_for_user(&self, user_id: &str) -> DbResult<Vec<DbRefreshToken>> {
        let now = Utc::now();
        let rows = self.rows.read().await;
        let mut found: Vec<DbRefreshToken> = rows
            .values()
            .filter(|row| row.user_id == user_id && row.expires_at > now)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn delete_expired(&self) -> DbResult<u64> {
        let now = Utc::now();
        let mut rows = self.rows.write().await;
        let before = rows.len();
        rows.retain(|_, row| row.expires_at >= now);
        Ok((before - rows.len()) as u64)
    }
}

// =============================================================================
// API keys
// =============================================================================

/// API key rows keyed by id
#[derive(Clone, Default)]
pub struct MemoryApiKeyRepo {
    rows: Arc<RwLock<HashMap<Uuid, DbApiKey>>>,
}

impl MemoryApiKeyRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a key by id regardless of owner
    pub async fn get(&self, id: Uuid) -> Option<DbApiKey> {
        self.rows.read().await.get(&id).cloned()
    }

    /// Total number of stored keys across all owners
    pub async fn len(&self) -> usize {
        self.rows.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.rows.read().await.is_empty()
    }

    /// Overwrite a key's expiry
    pub async fn set_expiry(&self, id: Uuid, expires_at: Option<DateTime<Utc>>) -> bool {
        match self.rows.write().await.get_mut(&id) {
            Some(row) => {
                row.expires_at = expires_at;
                true
            }
            None => false,
        }
    }
}

fn active_count(rows: &HashMap<Uuid, DbApiKey>, user_id: &str) -> usize {
    rows.values()
        .filter(|row| row.user_id == user_id && row.is_active)
        .count()
}

#[async_trait]
impl ApiKeyRepository for MemoryApiKeyRepo {
    async fn create_within_limit(&self, key: NewApiKey, max_active: usize) -> DbResult<Option<DbApiKey>> {
        let mut rows = self.rows.write().await;

        if active_count(&rows, &key.user_id) >= max_active {
            return Ok(None);
        }
        if rows.values().any(|row| row.key_hash == key.key_hash) {
            return Err(DbError::Duplicate("API key hash already stored".to_string()));
        }

        let row = DbApiKey {
            id: Uuid::new_v4(),
            user_id: key.user_id,
            name: key.name,
            key_hash: key.key_hash,
            key_prefix: key.key_prefix,
            permissions: key.permissions,
            is_active: true,
            expires_at: key.expires_at,
            last_used_at: None,
            created_at: Utc::now(),
        };
        rows.insert(row.id, row.clone());
        Ok(Some(row))
    }

    async fn find_by_hash(&self, key_hash: &str) -> DbResult<Option<DbApiKey>> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .find(|row| row.key_hash == key_hash)
            .cloned())
    }

    async fn list_for_user(&self, user_id: &str) -> DbResult<Vec<DbApiKey>> {
        let rows = self.rows.read().await;
        let mut found: Vec<DbApiKey> = rows.values().filter(|row| row.user_id == user_id).cloned().collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn deactivate(&self, id: Uuid, user_id: &str) -> DbResult<Option<DbApiKey>> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&id) {
            Some(row) if row.user_id == user_id => {
                row.is_active = false;
                Ok(Some(row.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn activate_within_limit(&self, id: Uuid, user_id: &str, max_active: usize) -> DbResult<Activation> {
        let mut rows = self.rows.write().await;

        match rows.get(&id) {
            Some(row) if row.user_id == user_id => {
                if row.is_active {
                    return Ok(Activation::Activated(row.clone()));
                }
            }
            _ => return Ok(Activation::NotFound),
        }

        if active_count(&rows, user_id) >= max_active {
            return Ok(Activation::LimitReached);
        }

        match rows.get_mut(&id) {
            Some(row) => {
                row.is_active = true;
                Ok(Activation::Activated(row.clone()))
            }
            None => Ok(Activation::NotFound),
        }
    }

    async fn delete(&self, id: Uuid, user_id: &str) -> DbResult<bool> {
        let mut rows = self.rows.write().await;
        match rows.get(&id) {
            Some(row) if row.user_id == user_id => Ok(rows.remove(&id).is_some()),
            _ => Ok(false),
        }
    }

    async fn touch(&self, id: Uuid, used_at: DateTime<Utc>) -> DbResult<()> {
        if let Some(row) = self.rows.write().await.get_mut(&id) {
            row.last_used_at = Some(used_at);
        }
        Ok(())
    }
}

// =============================================================================
// Federated users
// =============================================================================

/// Federated user links keyed by provider subject
#[derive(Clone, Default)]
pub struct MemoryFederatedUserRepo {
    rows: Arc<RwLock<HashMap<String, DbFederatedUser>>>,
}

impl MemoryFederatedUserRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FederatedUserRepository for MemoryFederatedUserRepo {
    async fn find_or_create(&self, user: NewFederatedUser) -> DbResult<DbFederatedUser> {
        let mut rows = self.rows.write().await;
        let row = rows
            .entry(user.provider_subject.clone())
            .and_modify(|row| {
                if user.email.is_some() {
                    row.email = user.email.clone();
                }
                if row.display_name.is_none() {
                    row.display_name = user.display_name.clone();
                }
            })
            .or_insert_with(|| DbFederatedUser {
                user_id: Uuid::new_v4().to_string(),
                provider_subject: user.provider_subject.clone(),
                email: user.email.clone(),
                display_name: user.display_name.clone(),
                profile_complete: false,
                created_at: Utc::now(),
            });
        Ok(row.clone())
    }
}

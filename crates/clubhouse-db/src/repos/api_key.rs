//! API key repository

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbApiKey, DbResult, NewApiKey};

/// Outcome of re-enabling a key
#[derive(Debug, Clone)]
pub enum Activation {
    Activated(DbApiKey),
    LimitReached,
    NotFound,
}

/// Storage for API key rows.
///
/// Lookups are by digest only; the plaintext never reaches this layer.
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    /// Insert `key` unless the owner already has `max_active` active keys.
    ///
    /// The count and the insert are serialized per owner. Returns `None` when
    /// the limit is reached, in which case nothing was written.
    async fn create_within_limit(&self, key: NewApiKey, max_active: usize) -> DbResult<Option<DbApiKey>>;

    /// Find a key by the digest of its plaintext
    async fn find_by_hash(&self, key_hash: &str) -> DbResult<Option<DbApiKey>>;

    /// List a user's keys, newest first
    async fn list_for_user(&self, user_id: &str) -> DbResult<Vec<DbApiKey>>;

    /// Disable a key owned by `user_id`
    async fn deactivate(&self, id: Uuid, user_id: &str) -> DbResult<Option<DbApiKey>>;

    /// Re-enable a key owned by `user_id` unless that would exceed `max_active`.
    ///
    /// Serialized per owner together with `create_within_limit`.
    async fn activate_within_limit(&self, id: Uuid, user_id: &str, max_active: usize) -> DbResult<Activation>;

    /// Delete a key owned by `user_id`, returning whether it existed
    async fn delete(&self, id: Uuid, user_id: &str) -> DbResult<bool>;

    /// Record the last time a key was used
    async fn touch(&self, id: Uuid, used_at: DateTime<Utc>) -> DbResult<()>;
}

/// PostgreSQL-backed API key repository
#[derive(Clone)]
pub struct PgApiKeyRepo {
    pool: PgPool,
}

impl PgApiKeyRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const COLUMNS: &str =
    "id, user_id, name, key_hash, key_prefix, permissions, is_active, expires_at, last_used_at, created_at";

#[async_trait]
impl ApiKeyRepository for PgApiKeyRepo {
    async fn create_within_limit(&self, key: NewApiKey, max_active: usize) -> DbResult<Option<DbApiKey>> {
        let mut tx = self.pool.begin().await?;

        // Serializes concurrent creations for the same owner until commit.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1)::bigint)")
            .bind(&key.user_id)
            .execute(&mut *tx)
            .await?;

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM api_keys WHERE user_id = $1 AND is_active = TRUE",
        )
        .bind(&key.user_id)
        .fetch_one(&mut *tx)
        .await?;

        if active.max(0) as usize >= max_active {
            tx.rollback().await?;
            return Ok(None);
        }

        let row = sqlx::query_as::<_, DbApiKey>(&format!(
            r#"
            INSERT INTO api_keys (id, user_id, name, key_hash, key_prefix, permissions, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&key.user_id)
        .bind(&key.name)
        .bind(&key.key_hash)
        .bind(&key.key_prefix)
        .bind(&key.permissions)
        .bind(key.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(row))
    }

    async fn find_by_hash(&self, key_hash: &str) -> DbResult<Option<DbApiKey>> {
        let key = sqlx::query_as::<_, DbApiKey>(&format!(
            "SELECT {COLUMNS} FROM api_keys WHERE key_hash = $1"
        ))
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    async fn list_for_user(&self, user_id: &str) -> DbResult<Vec<DbApiKey>> {
        let keys = sqlx::query_as::<_, DbApiKey>(&format!(
            "SELECT {COLUMNS} FROM api_keys WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(keys)
    }

    async fn deactivate(&self, id: Uuid, user_id: &str) -> DbResult<Option<DbApiKey>> {
        let key = sqlx::query_as::<_, DbApiKey>(&format!(
            "UPDATE api_keys SET is_active = FALSE WHERE id = $1 AND user_id = $2 RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(key)
    }

    async fn activate_within_limit(&self, id: Uuid, user_id: &str, max_active: usize) -> DbResult<Activation> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1)::bigint)")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        let Some(current) = sqlx::query_as::<_, DbApiKey>(&format!(
            "SELECT {COLUMNS} FROM api_keys WHERE id = $1 AND user_id = $2"
        ))
        .bind(id)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            tx.rollback().await?;
            return Ok(Activation::NotFound);
        };

        if current.is_active {
            tx.rollback().await?;
            return Ok(Activation::Activated(current));
        }

        let active: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM api_keys WHERE user_id = $1 AND is_active = TRUE",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        if active.max(0) as usize >= max_active {
            tx.rollback().await?;
            return Ok(Activation::LimitReached);
        }

        let key = sqlx::query_as::<_, DbApiKey>(&format!(
            "UPDATE api_keys SET is_active = TRUE WHERE id = $1 RETURNING {COLUMNS}"
        ))
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Activation::Activated(key))
    }

    async fn delete(&self, id: Uuid, user_id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn touch(&self, id: Uuid, used_at: DateTime<Utc>) -> DbResult<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = $2 WHERE id = $1")
            .bind(id)
            .bind(used_at)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

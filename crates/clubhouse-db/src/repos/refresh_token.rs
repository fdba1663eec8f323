//! Refresh token repository

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbRefreshToken, DbResult, NewRefreshToken};

/// Storage for refresh token rows.
///
/// `consume_and_replace` is the authority on whether a refresh token is still
/// usable: implementations must delete the matching row and insert the
/// replacement atomically, so that two concurrent callers presenting the same
/// token cannot both observe the row.
#[async_trait]
pub trait RefreshTokenRepository: Send + Sync {
    /// Insert a new refresh token row
    async fn insert(&self, token: NewRefreshToken) -> DbResult<DbRefreshToken>;

    /// Delete the row for `token_hash` owned by `user_id` and insert `replacement`.
    ///
    /// Returns `None` (and inserts nothing) when no such row exists.
    async fn consume_and_replace(
        &self,
        user_id: &str,
        token_hash: &str,
        replacement: NewRefreshToken,
    ) -> DbResult<Option<DbRefreshToken>>;

    /// Delete a single row, returning whether it existed
    async fn delete_by_hash(&self, user_id: &str, token_hash: &str) -> DbResult<bool>;

    /// Delete every row for a user (logout everywhere)
    async fn delete_all_for_user(&self, user_id: &str) -> DbResult<u64>;

    /// List a user's unexpired rows, newest first
    async fn list_for_user(&self, user_id: &str) -> DbResult<Vec<DbRefreshToken>>;

    /// Remove rows whose expiry has passed
    async fn delete_expired(&self) -> DbResult<u64>;
}

/// PostgreSQL-backed refresh token repository
#[derive(Clone)]
pub struct PgRefreshTokenRepo {
    pool: PgPool,
}

impl PgRefreshTokenRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const RETURNING: &str = "id, user_id, token_hash, user_agent, ip_address, expires_at, created_at";

#[async_trait]
impl RefreshTokenRepository for PgRefreshTokenRepo {
    async fn insert(&self, token: NewRefreshToken) -> DbResult<DbRefreshToken> {
        let row = sqlx::query_as::<_, DbRefreshToken>(&format!(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, user_agent, ip_address, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {RETURNING}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&token.user_id)
        .bind(&token.token_hash)
        .bind(&token.user_agent)
        .bind(&token.ip_address)
        .bind(token.expires_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    async fn consume_and_replace(
        &self,
        user_id: &str,
        token_hash: &str,
        replacement: NewRefreshToken,
    ) -> DbResult<Option<DbRefreshToken>> {
        let mut tx = self.pool.begin().await?;

        // Row lock on the DELETE makes a concurrent consumer wait, then see zero rows.
        let consumed: Option<Uuid> = sqlx::query_scalar(
            "DELETE FROM refresh_tokens WHERE token_hash = $1 AND user_id = $2 RETURNING id",
        )
        .bind(token_hash)
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;

        if consumed.is_none() {
            tx.rollback().await?;
            return Ok(None);
        }

        let row = sqlx::query_as::<_, DbRefreshToken>(&format!(
            r#"
            INSERT INTO refresh_tokens (id, user_id, token_hash, user_agent, ip_address, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {RETURNING}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&replacement.user_id)
        .bind(&replacement.token_hash)
        .bind(&replacement.user_agent)
        .bind(&replacement.ip_address)
        .bind(replacement.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(Some(row))
    }

    async fn delete_by_hash(&self, user_id: &str, token_hash: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE token_hash = $1 AND user_id = $2")
            .bind(token_hash)
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_all_for_user(&self, user_id: &str) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn list_for_user(&self, user_id: &str) -> DbResult<Vec<DbRefreshToken>> {
        let rows = sqlx::query_as::<_, DbRefreshToken>(&format!(
            r#"
            SELECT {RETURNING}
            FROM refresh_tokens
            WHERE user_id = $1 AND expires_at > NOW()
            ORDER BY created_at DESC
            "#
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn delete_expired(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM refresh_tokens WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

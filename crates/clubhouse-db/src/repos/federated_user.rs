//! Federated user repository

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbFederatedUser, DbResult, NewFederatedUser};

/// Maps identity provider subjects onto local user ids
#[async_trait]
pub trait FederatedUserRepository: Send + Sync {
    /// Return the local user linked to `user.provider_subject`, linking a new one if absent
    async fn find_or_create(&self, user: NewFederatedUser) -> DbResult<DbFederatedUser>;
}

/// PostgreSQL-backed federated user repository
#[derive(Clone)]
pub struct PgFederatedUserRepo {
    pool: PgPool,
}

impl PgFederatedUserRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FederatedUserRepository for PgFederatedUserRepo {
    async fn find_or_create(&self, user: NewFederatedUser) -> DbResult<DbFederatedUser> {
        let row = sqlx::query_as::<_, DbFederatedUser>(
            r#"
            INSERT INTO federated_users (user_id, provider_subject, email, display_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (provider_subject) DO UPDATE
                SET email = COALESCE(EXCLUDED.email, federated_users.email),
                    display_name = COALESCE(federated_users.display_name, EXCLUDED.display_name)
            RETURNING user_id, provider_subject, email, display_name, profile_complete, created_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&user.provider_subject)
        .bind(&user.email)
        .bind(&user.display_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }
}

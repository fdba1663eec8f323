//! Refresh Token Store
//!
//! A refresh token is accepted only when two independent checks pass:
//!
//! 1. the token verifies as a `refresh` JWT (signature, issuer, audience, expiry), and
//! 2. the repository atomically consumes the row stored for its digest and
//!    inserts the replacement.
//!
//! Step 2 is the authority on single use. A token that verifies but has no row
//! (already rotated, or revoked by logout) is rejected with an error that the
//! client cannot tell apart from a forged one; only the logs record which it was.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};

use clubhouse_db::{NewRefreshToken, RefreshTokenRepository};

use crate::error::{AuthError, AuthResult};
use crate::jwt::JwtService;
use crate::types::{DeviceInfo, IssuedRefreshToken, SessionInfo, TokenType};

/// Refresh token issuance, rotation and revocation
#[derive(Clone)]
pub struct RefreshTokenService {
    jwt: JwtService,
    repo: Arc<dyn RefreshTokenRepository>,
}

impl RefreshTokenService {
    pub fn new(jwt: JwtService, repo: Arc<dyn RefreshTokenRepository>) -> Self {
        Self { jwt, repo }
    }

    /// Mint a refresh token for `user_id` and persist its row
    pub async fn issue(&self, user_id: &str, device: &DeviceInfo) -> AuthResult<IssuedRefreshToken> {
        let (token, expires_at) = self.jwt.issue_refresh(user_id)?;

        self.repo
            .insert(NewRefreshToken {
                user_id: user_id.to_string(),
                token_hash: hash_token(&token),
                user_agent: device.user_agent.clone(),
                ip_address: device.ip_address.clone(),
                expires_at,
            })
            .await?;

        debug!(user_id = %user_id, "Refresh token issued");

        Ok(IssuedRefreshToken { token, expires_at })
    }

    /// Consume `presented` and return its owner with a replacement token
    pub async fn rotate(&self, presented: &str, device: &DeviceInfo) -> AuthResult<(String, IssuedRefreshToken)> {
        let user_id = self.verify(presented)?;
        let (token, expires_at) = self.jwt.issue_refresh(&user_id)?;

        let replacement = NewRefreshToken {
            user_id: user_id.clone(),
            token_hash: hash_token(&token),
            user_agent: device.user_agent.clone(),
            ip_address: device.ip_address.clone(),
            expires_at,
        };

        match self
            .repo
            .consume_and_replace(&user_id, &hash_token(presented), replacement)
            .await?
        {
            Some(_) => {
                info!(user_id = %user_id, "Refresh token rotated");
                Ok((user_id, IssuedRefreshToken { token, expires_at }))
            }
            None => {
                warn!(
                    user_id = %user_id,
                    ip = device.ip_address.as_deref().unwrap_or("unknown"),
                    "Refresh token presented after rotation or revocation"
                );
                Err(AuthError::RefreshTokenReused)
            }
        }
    }

    /// Delete the row for a single presented token (one device logging out).
    ///
    /// The token must still be live: a rotated or revoked token fails with
    /// [`AuthError::RefreshTokenReused`], exactly as it would in [`Self::rotate`].
    /// Returns the owner's user id.
    pub async fn revoke(&self, presented: &str) -> AuthResult<String> {
        let user_id = self.verify(presented)?;

        if !self.repo.delete_by_hash(&user_id, &hash_token(presented)).await? {
            warn!(user_id = %user_id, "Revocation with a refresh token that is no longer live");
            return Err(AuthError::RefreshTokenReused);
        }

        info!(user_id = %user_id, "Refresh token revoked");
        Ok(user_id)
    }

    /// Delete every refresh row for `user_id`
    pub async fn revoke_all(&self, user_id: &str) -> AuthResult<u64> {
        let removed = self.repo.delete_all_for_user(user_id).await?;

        info!(user_id = %user_id, removed, "All refresh tokens revoked");
        Ok(removed)
    }

    /// Live sessions for `user_id`, newest first
    pub async fn list_sessions(&self, user_id: &str) -> AuthResult<Vec<SessionInfo>> {
        let rows = self.repo.list_for_user(user_id).await?;
        Ok(rows.into_iter().map(SessionInfo::from).collect())
    }

    /// Remove rows whose expiry has passed
    pub async fn purge_expired(&self) -> AuthResult<u64> {
        let removed = self.repo.delete_expired().await?;
        if removed > 0 {
            info!(removed, at = %Utc::now(), "Purged expired refresh tokens");
        }
        Ok(removed)
    }

    /// Stateless half of the check: signature, claims and kind
    pub fn verify(&self, presented: &str) -> AuthResult<String> {
        self.jwt.verify(presented, TokenType::Refresh).map_err(|e| {
            debug!(error = %e, "Refresh token failed verification");
            AuthError::InvalidRefreshToken
        })
    }
}

/// Digest stored in place of the token value
fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

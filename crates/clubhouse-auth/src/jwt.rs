//! JWT Token Service
//!
//! Issues and verifies the HS256 tokens used for both access and refresh
//! credentials. The two kinds share one signing primitive and differ only in
//! lifetime and the `token_type` claim. Verification is pure: it never touches
//! storage, so whether a refresh token has already been consumed is decided by
//! the refresh store, not here.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::error::{AuthError, AuthResult};
use crate::types::{TokenClaims, TokenPair, TokenType};

/// JWT service for token management
#[derive(Clone)]
pub struct JwtService {
    config: JwtConfig,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    /// Create a new JWT service
    pub fn new(config: JwtConfig) -> Self {
        let encoding_key = EncodingKey::from_secret(config.secret.as_bytes());
        let decoding_key = DecodingKey::from_secret(config.secret.as_bytes());

        Self {
            config,
            encoding_key,
            decoding_key,
        }
    }

    pub fn config(&self) -> &JwtConfig {
        &self.config
    }

    /// Issue a token of `kind` for `user_id`, valid for `ttl`.
    ///
    /// Rejects an empty or blank subject before doing any cryptographic work.
    pub fn issue(&self, user_id: &str, ttl: std::time::Duration, kind: TokenType) -> AuthResult<(String, DateTime<Utc>)> {
        self.issue_at(user_id, ttl, kind, Utc::now())
    }

    fn issue_at(
        &self,
        user_id: &str,
        ttl: std::time::Duration,
        kind: TokenType,
        now: DateTime<Utc>,
    ) -> AuthResult<(String, DateTime<Utc>)> {
        if user_id.trim().is_empty() {
            return Err(AuthError::Validation("user id must not be empty".to_string()));
        }

        let expires_at = now + Duration::from_std(ttl).map_err(|e| AuthError::Internal(e.to_string()))?;
        let claims = TokenClaims {
            sub: user_id.to_string(),
            token_type: kind,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
            nbf: now.timestamp(),
            iss: self.config.issuer.clone(),
            aud: self.config.audience.clone(),
            jti: Uuid::new_v4().to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Crypto(format!("Failed to encode token: {}", e)))?;

        Ok((token, expires_at))
    }

    /// Issue an access token with the configured lifetime
    pub fn issue_access(&self, user_id: &str) -> AuthResult<(String, DateTime<Utc>)> {
        self.issue(user_id, self.config.access_token_lifetime, TokenType::Access)
    }

    /// Issue a refresh token with the configured lifetime
    pub fn issue_refresh(&self, user_id: &str) -> AuthResult<(String, DateTime<Utc>)> {
        self.issue(user_id, self.config.refresh_token_lifetime, TokenType::Refresh)
    }

    /// Generate a new token pair (access + refresh)
    ///
    /// The refresh half is not persisted here; use the refresh store when the
    /// pair is meant to start a session.
    pub fn generate_token_pair(&self, user_id: &str) -> AuthResult<TokenPair> {
        let (access_token, access_exp) = self.issue_access(user_id)?;
        let (refresh_token, refresh_exp) = self.issue_refresh(user_id)?;

        Ok(TokenPair::new(
            access_token,
            refresh_token,
            access_exp.timestamp(),
            refresh_exp.timestamp(),
        ))
    }

    /// Verify a token of the expected kind and return its subject
    pub fn verify(&self, token: &str, kind: TokenType) -> AuthResult<String> {
        self.verify_claims(token, kind).map(|claims| claims.sub)
    }

    /// Verify a token of the expected kind and return its claims
    pub fn verify_claims(&self, token: &str, kind: TokenType) -> AuthResult<TokenClaims> {
        let claims = self.decode_token(token)?;

        if claims.token_type != kind {
            return Err(AuthError::InvalidTokenType);
        }
        if claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidToken);
        }

        Ok(claims)
    }

    fn decode_token(&self, token: &str) -> AuthResult<TokenClaims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.config.issuer]);
        validation.set_audience(&[&self.config.audience]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation.validate_nbf = true;
        validation.leeway = 0;

        let token_data = decode::<TokenClaims>(token, &self.decoding_key, &validation)?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> JwtConfig {
        JwtConfig {
            secret: "test-secret-key-for-jwt-tokens-min-32-bytes!".to_string(),
            access_token_lifetime: std::time::Duration::from_secs(900),
            refresh_token_lifetime: std::time::Duration::from_secs(604800),
            issuer: "test-issuer".to_string(),
            audience: "test-audience".to_string(),
        }
    }

    #[test]
    fn test_issue_then_verify_returns_subject() {
        let service = JwtService::new(test_config());

        for user_id in ["user-1", "a", "0f8fad5b-d9cb-469f-a165-70867728950e"] {
            let (token, _) = service.issue_access(user_id).unwrap();
            assert_eq!(service.verify(&token, TokenType::Access).unwrap(), user_id);
        }
    }

    #[test]
    fn test_empty_subject_is_rejected() {
        let service = JwtService::new(test_config());

        for user_id in ["", "   "] {
            let result = service.issue_access(user_id);
            assert!(matches!(result, Err(AuthError::Validation(_))));
        }
    }

    #[test]
    fn test_generate_token_pair() {
        let service = JwtService::new(test_config());
        let pair = service.generate_token_pair("user-1").unwrap();

        assert_ne!(pair.access_token, pair.refresh_token);
        assert_eq!(pair.token_type, "Bearer");
        assert!(pair.refresh_expires_at > pair.access_expires_at);
        assert!(pair.expires_in() > 0);
    }

    #[test]
    fn test_token_kinds_are_not_interchangeable() {
        let service = JwtService::new(test_config());
        let pair = service.generate_token_pair("user-1").unwrap();

        assert!(matches!(
            service.verify(&pair.access_token, TokenType::Refresh),
            Err(AuthError::InvalidTokenType)
        ));
        assert!(matches!(
            service.verify(&pair.refresh_token, TokenType::Access),
            Err(AuthError::InvalidTokenType)
        ));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let service = JwtService::new(test_config());
        let issued = Utc::now() - Duration::hours(1);
        let (token, _) = service
            .issue_at("user-1", std::time::Duration::from_secs(60), TokenType::Access, issued)
            .unwrap();

        assert!(matches!(service.verify(&token, TokenType::Access), Err(AuthError::TokenExpired)));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let service = JwtService::new(test_config());
        let mut other_config = test_config();
        other_config.secret = "another-secret-key-for-jwt-tokens-32-bytes".to_string();
        let other = JwtService::new(other_config);

        let (token, _) = other.issue_access("user-1").unwrap();
        assert!(matches!(service.verify(&token, TokenType::Access), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn test_wrong_audience_is_rejected() {
        let service = JwtService::new(test_config());
        let mut other_config = test_config();
        other_config.audience = "someone-else".to_string();
        let other = JwtService::new(other_config);

        let (token, _) = other.issue_access("user-1").unwrap();
        assert!(service.verify(&token, TokenType::Access).is_err());
    }

    #[test]
    fn test_malformed_token() {
        let service = JwtService::new(test_config());
        for token in ["", "invalid-token", "a.b.c"] {
            assert!(matches!(service.verify(token, TokenType::Access), Err(AuthError::InvalidToken)));
        }
    }

    #[test]
    fn test_tokens_are_unique() {
        let service = JwtService::new(test_config());
        let (a, _) = service.issue_refresh("user-1").unwrap();
        let (b, _) = service.issue_refresh("user-1").unwrap();
        assert_ne!(a, b);
    }
}

//! API Key Service
//!
//! Keys are `<label>_<random>` strings. Only the SHA-256 digest of the full
//! plaintext is stored, and lookups go by digest, so the plaintext exists
//! exactly once: in the creation response.
//!
//! Successful verification schedules a `last_used_at` update on a bounded
//! queue drained by one worker task. The request never waits for it, and when
//! the queue is full the update is dropped.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use clubhouse_db::{Activation, ApiKeyRepository, NewApiKey};

use crate::config::ApiKeyConfig;
use crate::error::{AuthError, AuthResult};
use crate::types::{ApiKeyInfo, ApiKeyPrincipal, CreatedApiKey, GeneratedApiKey, NewApiKeyRequest};

/// Random bytes behind each key (256 bits)
const KEY_ENTROPY_BYTES: usize = 32;
/// Characters of the random portion kept in the display prefix
const DISPLAY_FRAGMENT_LEN: usize = 8;
/// Upper bound on the display prefix
pub const MAX_DISPLAY_PREFIX_LEN: usize = 20;
const MAX_NAME_LEN: usize = 100;

/// Generate a new key under `label`.
///
/// Pure: no storage and no limit check. See [`ApiKeyService::create`].
pub fn generate(label: &str) -> GeneratedApiKey {
    let mut bytes = [0u8; KEY_ENTROPY_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let random = URL_SAFE_NO_PAD.encode(bytes);

    let plaintext = format!("{}_{}", label, random);
    let hash = hash_key(&plaintext);
    let display_prefix = format!("{}_{}", label, &random[..DISPLAY_FRAGMENT_LEN])
        .chars()
        .take(MAX_DISPLAY_PREFIX_LEN)
        .collect();

    GeneratedApiKey {
        plaintext,
        hash,
        display_prefix,
    }
}

/// Hash an API key for storage and lookup
pub fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

// =============================================================================
// Last-used recorder
// =============================================================================

/// Bounded queue of `last_used_at` updates
#[derive(Clone)]
pub struct LastUsedRecorder {
    tx: mpsc::Sender<(Uuid, DateTime<Utc>)>,
}

impl LastUsedRecorder {
    /// Start the worker. Must be called from within a Tokio runtime.
    ///
    /// The worker exits once every recorder clone has been dropped.
    pub fn spawn(repo: Arc<dyn ApiKeyRepository>, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<(Uuid, DateTime<Utc>)>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some((key_id, used_at)) = rx.recv().await {
                if let Err(e) = repo.touch(key_id, used_at).await {
                    warn!(key_id = %key_id, error = %e, "Failed to record API key usage");
                }
            }
            debug!("API key usage recorder stopped");
        });

        (Self { tx }, handle)
    }

    /// Queue an update without waiting. Returns `false` if it was dropped.
    pub fn record(&self, key_id: Uuid, used_at: DateTime<Utc>) -> bool {
        match self.tx.try_send((key_id, used_at)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(key_id = %key_id, "API key usage queue full, dropping update");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!(key_id = %key_id, "API key usage recorder stopped, dropping update");
                false
            }
        }
    }
}

// =============================================================================
// Service
// =============================================================================

/// API key service for authentication and owner-side management
#[derive(Clone)]
pub struct ApiKeyService {
    repo: Arc<dyn ApiKeyRepository>,
    recorder: LastUsedRecorder,
    config: ApiKeyConfig,
}

impl ApiKeyService {
    pub fn new(repo: Arc<dyn ApiKeyRepository>, recorder: LastUsedRecorder, config: ApiKeyConfig) -> Self {
        Self { repo, recorder, config }
    }

    pub fn config(&self) -> &ApiKeyConfig {
        &self.config
    }

    /// Create a key for `user_id`, refusing once the owner has the maximum
    /// number of active keys. Nothing is stored when the limit is hit.
    pub async fn create(&self, user_id: &str, request: NewApiKeyRequest) -> AuthResult<CreatedApiKey> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(AuthError::Validation("name must not be empty".to_string()));
        }
        if name.chars().count() > MAX_NAME_LEN {
            return Err(AuthError::Validation(format!("name must be at most {} characters", MAX_NAME_LEN)));
        }
        if request.expires_at.is_some_and(|exp| exp <= Utc::now()) {
            return Err(AuthError::Validation("expiry must be in the future".to_string()));
        }

        let permissions: Vec<String> = request
            .permissions
            .iter()
            .map(|p| p.trim())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let generated = generate(&self.config.key_label);
        let limit = self.config.max_active_keys_per_user;

        let row = self
            .repo
            .create_within_limit(
                NewApiKey {
                    user_id: user_id.to_string(),
                    name: name.to_string(),
                    key_hash: generated.hash,
                    key_prefix: generated.display_prefix,
                    permissions,
                    expires_at: request.expires_at,
                },
                limit,
            )
            .await?;

        let Some(row) = row else {
            warn!(user_id = %user_id, limit, "API key limit reached");
            return Err(AuthError::ApiKeyLimitReached { limit });
        };

        info!(user_id = %user_id, key_id = %row.id, prefix = %row.key_prefix, "API key created");

        Ok(CreatedApiKey {
            info: ApiKeyInfo::from(row),
            plaintext: generated.plaintext,
        })
    }

    /// Resolve a presented key to its owner
    pub async fn verify(&self, presented: &str) -> AuthResult<ApiKeyPrincipal> {
        if presented.is_empty() {
            return Err(AuthError::InvalidApiKey);
        }

        let key = self
            .repo
            .find_by_hash(&hash_key(presented))
            .await?
            .ok_or(AuthError::InvalidApiKey)?;

        if !key.is_active {
            debug!(key_id = %key.id, "Inactive API key presented");
            return Err(AuthError::ApiKeyInactive);
        }

        let now = Utc::now();
        if key.is_expired_at(now) {
            debug!(key_id = %key.id, "Expired API key presented");
            return Err(AuthError::ApiKeyExpired);
        }

        self.recorder.record(key.id, now);

        Ok(ApiKeyPrincipal {
            key_id: key.id,
            user_id: key.user_id,
            permissions: key.permissions.into_iter().collect(),
        })
    }

    /// List an owner's keys
    pub async fn list(&self, user_id: &str) -> AuthResult<Vec<ApiKeyInfo>> {
        let keys = self.repo.list_for_user(user_id).await?;
        Ok(keys.into_iter().map(ApiKeyInfo::from).collect())
    }

    /// Enable or disable one of the owner's keys
    pub async fn set_active(&self, user_id: &str, key_id: Uuid, active: bool) -> AuthResult<ApiKeyInfo> {
        let key = if active {
            let limit = self.config.max_active_keys_per_user;
            match self.repo.activate_within_limit(key_id, user_id, limit).await? {
                Activation::Activated(key) => key,
                Activation::LimitReached => return Err(AuthError::ApiKeyLimitReached { limit }),
                Activation::NotFound => return Err(AuthError::ApiKeyNotFound),
            }
        } else {
            self.repo
                .deactivate(key_id, user_id)
                .await?
                .ok_or(AuthError::ApiKeyNotFound)?
        };

        info!(user_id = %user_id, key_id = %key_id, active, "API key updated");
        Ok(ApiKeyInfo::from(key))
    }

    /// Delete one of the owner's keys
    pub async fn delete(&self, user_id: &str, key_id: Uuid) -> AuthResult<()> {
        if !self.repo.delete(key_id, user_id).await? {
            return Err(AuthError::ApiKeyNotFound);
        }

        info!(user_id = %user_id, key_id = %key_id, "API key deleted");
        Ok(())
    }
}

/// Extract an API key from `X-API-Key` or `Authorization: ApiKey <key>`
pub fn extract_api_key_from_headers(headers: &axum::http::HeaderMap) -> Option<String> {
    if let Some(key) = headers
        .get("X-API-Key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(key.to_string());
    }

    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("apikey"))
        .map(|(_, key)| key.trim())
        .filter(|v| !v.is_empty())
        .map(String::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use clubhouse_db::memory::MemoryApiKeyRepo;
    use clubhouse_db::{DbApiKey, DbError, DbResult};
    use std::time::Duration;

    async fn service_with(repo: MemoryApiKeyRepo) -> ApiKeyService {
        let repo: Arc<dyn ApiKeyRepository> = Arc::new(repo);
        let (recorder, _) = LastUsedRecorder::spawn(repo.clone(), 16);
        ApiKeyService::new(repo, recorder, ApiKeyConfig::default())
    }

    fn request(name: &str) -> NewApiKeyRequest {
        NewApiKeyRequest {
            name: name.to_string(),
            permissions: vec!["events:read".to_string()],
            expires_at: None,
        }
    }

    #[test]
    fn test_generate_format() {
        let key = generate("sk_live");

        assert!(key.plaintext.starts_with("sk_live_"));
        assert_eq!(key.hash.len(), 64);
        assert!(key.hash.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(key.display_prefix.len() <= MAX_DISPLAY_PREFIX_LEN);
        assert!(key.plaintext.starts_with(&key.display_prefix));
        assert_eq!(key.hash, hash_key(&key.plaintext));
    }

    #[test]
    fn test_generate_is_unique() {
        let a = generate("sk_live");
        let b = generate("sk_live");
        assert_ne!(a.plaintext, b.plaintext);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_display_prefix_is_capped_for_long_labels() {
        let key = generate("organisation");
        assert_eq!(key.display_prefix.chars().count(), MAX_DISPLAY_PREFIX_LEN);
    }

    #[tokio::test]
    async fn test_create_then_verify() {
        let service = service_with(MemoryApiKeyRepo::new()).await;
        let created = service.create("user-1", request("ci")).await.unwrap();

        let principal = service.verify(&created.plaintext).await.unwrap();
        assert_eq!(principal.user_id, "user-1");
        assert_eq!(principal.key_id, created.info.id);
        assert!(principal.permissions.contains("events:read"));
    }

    #[tokio::test]
    async fn test_eleventh_key_is_refused() {
        let repo = MemoryApiKeyRepo::new();
        let service = service_with(repo.clone()).await;

        for i in 0..10 {
            service.create("user-1", request(&format!("key-{i}"))).await.unwrap();
        }
        let result = service.create("user-1", request("key-10")).await;

        assert!(matches!(result, Err(AuthError::ApiKeyLimitReached { limit: 10 })));
        assert_eq!(repo.len().await, 10);

        // other owners are unaffected
        assert!(service.create("user-2", request("other")).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_creates_respect_limit() {
        let repo = MemoryApiKeyRepo::new();
        let service = service_with(repo.clone()).await;

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let service = service.clone();
                tokio::spawn(async move { service.create("user-1", request(&format!("key-{i}"))).await })
            })
            .collect();

        let mut created = 0;
        let mut refused = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => created += 1,
                Err(AuthError::ApiKeyLimitReached { limit: 10 }) => refused += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }

        assert_eq!(created, 10);
        assert_eq!(refused, 10);
        assert_eq!(repo.len().await, 10);
    }

    #[tokio::test]
    async fn test_inactive_key_is_rejected() {
        let service = service_with(MemoryApiKeyRepo::new()).await;
        let created = service.create("user-1", request("ci")).await.unwrap();

        service.set_active("user-1", created.info.id, false).await.unwrap();
        assert!(matches!(service.verify(&created.plaintext).await, Err(AuthError::ApiKeyInactive)));

        service.set_active("user-1", created.info.id, true).await.unwrap();
        assert!(service.verify(&created.plaintext).await.is_ok());
    }

    #[tokio::test]
    async fn test_expired_key_is_rejected() {
        let repo = MemoryApiKeyRepo::new();
        let service = service_with(repo.clone()).await;
        let created = service.create("user-1", request("ci")).await.unwrap();

        repo.set_expiry(created.info.id, Some(Utc::now() - chrono::Duration::seconds(1)))
            .await;

        assert!(matches!(service.verify(&created.plaintext).await, Err(AuthError::ApiKeyExpired)));
    }

    #[tokio::test]
    async fn test_unknown_key_is_rejected() {
        let service = service_with(MemoryApiKeyRepo::new()).await;
        let unknown = generate("sk_live");
        assert!(matches!(service.verify(&unknown.plaintext).await, Err(AuthError::InvalidApiKey)));
        assert!(matches!(service.verify("").await, Err(AuthError::InvalidApiKey)));
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let service = service_with(MemoryApiKeyRepo::new()).await;

        assert!(matches!(service.create("user-1", request("  ")).await, Err(AuthError::Validation(_))));

        let mut past = request("ci");
        past.expires_at = Some(Utc::now() - chrono::Duration::minutes(1));
        assert!(matches!(service.create("user-1", past).await, Err(AuthError::Validation(_))));
    }

    #[tokio::test]
    async fn test_management_is_owner_scoped() {
        let service = service_with(MemoryApiKeyRepo::new()).await;
        let created = service.create("user-1", request("ci")).await.unwrap();

        assert!(matches!(
            service.delete("user-2", created.info.id).await,
            Err(AuthError::ApiKeyNotFound)
        ));
        assert!(matches!(
            service.set_active("user-2", created.info.id, false).await,
            Err(AuthError::ApiKeyNotFound)
        ));
        assert!(service.list("user-2").await.unwrap().is_empty());

        service.delete("user-1", created.info.id).await.unwrap();
        assert!(service.list("user-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_verify_records_last_used() {
        let repo = MemoryApiKeyRepo::new();
        let service = service_with(repo.clone()).await;
        let created = service.create("user-1", request("ci")).await.unwrap();

        service.verify(&created.plaintext).await.unwrap();

        let recorded = tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let Some(key) = repo.get(created.info.id).await {
                    if key.last_used_at.is_some() {
                        return;
                    }
                }
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(recorded.is_ok());
    }

    #[tokio::test]
    async fn test_full_queue_drops_updates() {
        let (tx, _rx) = mpsc::channel(1);
        let recorder = LastUsedRecorder { tx };

        assert!(recorder.record(Uuid::new_v4(), Utc::now()));
        assert!(!recorder.record(Uuid::new_v4(), Utc::now()));
    }

    /// Repository whose usage writes always fail
    struct BrokenTouch(MemoryApiKeyRepo);

    #[async_trait]
    impl ApiKeyRepository for BrokenTouch {
        async fn create_within_limit(&self, key: NewApiKey, max_active: usize) -> DbResult<Option<DbApiKey>> {
            self.0.create_within_limit(key, max_active).await
        }
        async fn find_by_hash(&self, key_hash: &str) -> DbResult<Option<DbApiKey>> {
            self.0.find_by_hash(key_hash).await
        }
        async fn list_for_user(&self, user_id: &str) -> DbResult<Vec<DbApiKey>> {
            self.0.list_for_user(user_id).await
        }
        async fn deactivate(&self, id: Uuid, user_id: &str) -> DbResult<Option<DbApiKey>> {
            self.0.deactivate(id, user_id).await
        }
        async fn activate_within_limit(&self, id: Uuid, user_id: &str, max_active: usize) -> DbResult<Activation> {
            self.0.activate_within_limit(id, user_id, max_active).await
        }
        async fn delete(&self, id: Uuid, user_id: &str) -> DbResult<bool> {
            self.0.delete(id, user_id).await
        }
        async fn touch(&self, _id: Uuid, _used_at: DateTime<Utc>) -> DbResult<()> {
            Err(DbError::Connection("database offline".to_string()))
        }
    }

    #[tokio::test]
    async fn test_usage_failures_do_not_fail_verification() {
        let repo: Arc<dyn ApiKeyRepository> = Arc::new(BrokenTouch(MemoryApiKeyRepo::new()));
        let (recorder, worker) = LastUsedRecorder::spawn(repo.clone(), 4);
        let service = ApiKeyService::new(repo, recorder, ApiKeyConfig::default());
        let created = service.create("user-1", request("ci")).await.unwrap();

        for _ in 0..3 {
            assert!(service.verify(&created.plaintext).await.is_ok());
        }

        drop(service);
        assert!(worker.await.is_ok());
    }

    #[test]
    fn test_extract_api_key_from_headers() {
        let mut headers = axum::http::HeaderMap::new();
        headers.insert("X-API-Key", "sk_live_abc".parse().unwrap());
        assert_eq!(extract_api_key_from_headers(&headers).as_deref(), Some("sk_live_abc"));

        let mut headers = axum::http::HeaderMap::new();
        headers.insert("Authorization", "ApiKey sk_live_def".parse().unwrap());
        assert_eq!(extract_api_key_from_headers(&headers).as_deref(), Some("sk_live_def"));

        let mut headers = axum::http::HeaderMap::new();
        headers.insert("Authorization", "Bearer token".parse().unwrap());
        assert_eq!(extract_api_key_from_headers(&headers), None);
    }

    #[test]
    fn test_authorization_scheme_is_case_insensitive() {
        for value in ["apikey sk_live_ghi", "APIKEY sk_live_ghi", "ApiKey   sk_live_ghi"] {
            let mut headers = axum::http::HeaderMap::new();
            headers.insert("Authorization", value.parse().unwrap());
            assert_eq!(extract_api_key_from_headers(&headers).as_deref(), Some("sk_live_ghi"), "{value}");
        }

        let mut headers = axum::http::HeaderMap::new();
        headers.insert("Authorization", "ApiKey ".parse().unwrap());
        assert_eq!(extract_api_key_from_headers(&headers), None);
    }
}

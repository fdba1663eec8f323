//! Refresh rotation under concurrency

use std::sync::Arc;

use clubhouse_auth::{AuthConfig, AuthError, AuthService, DeviceInfo};
use clubhouse_db::memory::{MemoryApiKeyRepo, MemoryRefreshTokenRepo};

fn service(repo: &MemoryRefreshTokenRepo) -> AuthService {
    let mut config = AuthConfig::default();
    config.jwt.secret = "rotation-test-secret-0123456789abcdef".to_string();
    AuthService::new(config, Arc::new(repo.clone()), Arc::new(MemoryApiKeyRepo::new()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_rotation_of_one_token_succeeds_once() {
    let repo = MemoryRefreshTokenRepo::new();
    let service = service(&repo);
    let device = DeviceInfo::default();

    let pair = service.issue_session("user-1", &device).await.unwrap();

    let attempts: Vec<_> = (0..16)
        .map(|_| {
            let service = service.clone();
            let token = pair.refresh_token.clone();
            tokio::spawn(async move { service.refresh_session(&token, &DeviceInfo::default()).await })
        })
        .collect();

    let mut successes = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => successes += 1,
            Err(e) => assert!(matches!(e, AuthError::RefreshTokenReused), "unexpected error: {e}"),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(repo.len().await, 1);
}

#[tokio::test]
async fn rotated_token_chain_stays_single_use() {
    let repo = MemoryRefreshTokenRepo::new();
    let service = service(&repo);
    let device = DeviceInfo::new(Some("cli/1.0".to_string()), Some("198.51.100.4".to_string()));

    let mut current = service.issue_session("user-1", &device).await.unwrap().refresh_token;
    let mut spent = Vec::new();

    for _ in 0..5 {
        let next = service.refresh_session(&current, &device).await.unwrap();
        spent.push(std::mem::replace(&mut current, next.refresh_token));
    }

    for token in &spent {
        let err = service.refresh_session(token, &device).await.unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    let sessions = service.refresh.list_sessions("user-1").await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].user_agent.as_deref(), Some("cli/1.0"));
}

#[tokio::test]
async fn logout_invalidates_outstanding_refresh_tokens() {
    let repo = MemoryRefreshTokenRepo::new();
    let service = service(&repo);
    let device = DeviceInfo::default();

    let laptop = service.issue_session("user-1", &device).await.unwrap();
    let phone = service.issue_session("user-1", &device).await.unwrap();

    service.logout(&laptop.refresh_token).await.unwrap();

    assert!(matches!(
        service.refresh_session(&phone.refresh_token, &device).await,
        Err(AuthError::RefreshTokenReused)
    ));
}

#[tokio::test]
async fn token_from_another_issuer_is_rejected() {
    let repo = MemoryRefreshTokenRepo::new();
    let service = service(&repo);

    let mut other = AuthConfig::default();
    other.jwt.secret = "some-other-deployment-secret-value".to_string();
    let foreign = AuthService::new(other, Arc::new(repo.clone()), Arc::new(MemoryApiKeyRepo::new()));

    let pair = foreign.issue_session("user-1", &DeviceInfo::default()).await.unwrap();
    assert!(matches!(
        service.refresh_session(&pair.refresh_token, &DeviceInfo::default()).await,
        Err(AuthError::InvalidRefreshToken)
    ));
}

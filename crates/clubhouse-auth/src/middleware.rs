//! Composite authentication for Axum
//!
//! Requests are resolved by walking an explicit, ordered [`AuthPolicy`]. The
//! first scheme whose credential is *present* decides the outcome: if it
//! verifies, that identity is used; if it does not, the request fails with 401
//! and no later scheme is consulted. Only when no scheme finds a credential is
//! the request unauthenticated.
//!
//! The default policy is `[Bearer, ApiKey]`, so a request carrying both a
//! bearer token and an API key is resolved by the bearer token.

use axum::{
    async_trait,
    body::Body,
    extract::{FromRequestParts, Request},
    http::{header, request::Parts, HeaderMap, StatusCode},
    response::Response,
};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::debug;

use crate::api_key::{extract_api_key_from_headers, ApiKeyService};
use crate::cookie::cookie_value;
use crate::error::{AuthError, AuthResult, ErrorResponse};
use crate::jwt::JwtService;
use crate::types::{AuthenticatedUser, DeviceInfo, TokenType};

// =============================================================================
// Policy
// =============================================================================

/// A way of presenting a credential
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialScheme {
    /// `Authorization: Bearer <access token>`, or the access token cookie
    Bearer,
    /// `X-API-Key: <key>` or `Authorization: ApiKey <key>`
    ApiKey,
}

/// Ordered list of schemes tried by the [`Authenticator`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPolicy {
    schemes: Vec<CredentialScheme>,
}

impl AuthPolicy {
    pub fn new(schemes: Vec<CredentialScheme>) -> Self {
        Self { schemes }
    }

    pub fn schemes(&self) -> &[CredentialScheme] {
        &self.schemes
    }
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self::new(vec![CredentialScheme::Bearer, CredentialScheme::ApiKey])
    }
}

// =============================================================================
// Authenticator
// =============================================================================

/// Resolves the identity behind a request
#[derive(Clone)]
pub struct Authenticator {
    jwt: JwtService,
    api_keys: ApiKeyService,
    policy: AuthPolicy,
    access_cookie: String,
}

impl Authenticator {
    pub fn new(jwt: JwtService, api_keys: ApiKeyService, policy: AuthPolicy, access_cookie: impl Into<String>) -> Self {
        Self {
            jwt,
            api_keys,
            policy,
            access_cookie: access_cookie.into(),
        }
    }

    pub fn policy(&self) -> &AuthPolicy {
        &self.policy
    }

    /// Resolve the request's identity.
    ///
    /// Returns [`AuthError::Unauthenticated`] only when no credential was presented.
    pub async fn authenticate(&self, headers: &HeaderMap) -> AuthResult<AuthenticatedUser> {
        for scheme in self.policy.schemes() {
            let Some(credential) = self.extract(*scheme, headers) else {
                continue;
            };

            let result = match scheme {
                CredentialScheme::Bearer => self
                    .jwt
                    .verify(&credential, TokenType::Access)
                    .map(AuthenticatedUser::from_bearer),
                CredentialScheme::ApiKey => self
                    .api_keys
                    .verify(&credential)
                    .await
                    .map(AuthenticatedUser::from_api_key),
            };

            if let Err(e) = &result {
                debug!(scheme = ?scheme, error = %e, "Credential rejected");
            }
            return result;
        }

        Err(AuthError::Unauthenticated)
    }

    fn extract(&self, scheme: CredentialScheme, headers: &HeaderMap) -> Option<String> {
        match scheme {
            CredentialScheme::Bearer => {
                extract_bearer_token(headers).or_else(|| cookie_value(headers, &self.access_cookie))
            }
            CredentialScheme::ApiKey => extract_api_key_from_headers(headers),
        }
    }
}

// =============================================================================
// Credential extraction helpers
// =============================================================================

/// Token from `Authorization: Bearer <token>`
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();

    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_string())
}

/// Refresh credential from `Authorization` (raw or `Bearer`), `X-Refresh-Token`,
/// or the refresh cookie, in that order
pub fn extract_refresh_token(headers: &HeaderMap, refresh_cookie: &str) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        let value = value.trim();
        let token = match value.split_once(' ') {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
            Some(_) => "",
            None => value,
        };
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    if let Some(token) = headers
        .get("X-Refresh-Token")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(token.to_string());
    }

    cookie_value(headers, refresh_cookie)
}

/// Requester IP: first `X-Forwarded-For` entry, then `X-Real-IP`, else `"unknown"`
pub fn requester_ip(headers: &HeaderMap) -> String {
    headers
        .get("X-Forwarded-For")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("X-Real-IP")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .unwrap_or("unknown")
        .to_string()
}

/// User agent and IP of the request, stored with refresh tokens
pub fn device_info(headers: &HeaderMap) -> DeviceInfo {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    DeviceInfo::new(user_agent, Some(requester_ip(headers)))
}

// =============================================================================
// Tower layer
// =============================================================================

/// Authentication middleware layer
#[derive(Clone)]
pub struct AuthLayer {
    authenticator: Arc<Authenticator>,
}

impl AuthLayer {
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self { authenticator }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthMiddleware<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthMiddleware {
            inner,
            authenticator: self.authenticator.clone(),
        }
    }
}

/// Authentication middleware service
#[derive(Clone)]
pub struct AuthMiddleware<S> {
    inner: S,
    authenticator: Arc<Authenticator>,
}

impl<S> Service<Request> for AuthMiddleware<S>
where
    S: Service<Request, Response = Response> + Send + Clone + 'static,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let authenticator = self.authenticator.clone();
        // Swap so the clone that was polled ready is the one called.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match authenticator.authenticate(req.headers()).await {
                Ok(user) => {
                    let (mut parts, body) = req.into_parts();
                    parts.extensions.insert(user);
                    inner.call(Request::from_parts(parts, body)).await
                }
                // No credential: handlers decide whether that is acceptable
                Err(AuthError::Unauthenticated) => inner.call(req).await,
                Err(e) => Ok(auth_error_response(e)),
            }
        })
    }
}

/// JSON error response for an authentication error
pub fn auth_error_response(error: AuthError) -> Response {
    let status = StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = ErrorResponse::from(&error);

    let mut res = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/json");

    if status == StatusCode::UNAUTHORIZED {
        res = res.header(header::WWW_AUTHENTICATE, "Bearer");
    }

    res.body(Body::from(serde_json::to_string(&body).unwrap_or_default()))
        .unwrap_or_else(|_| Response::new(Body::empty()))
}

// =============================================================================
// Axum Extractors
// =============================================================================

/// Extractor for an optional authenticated user
pub struct OptionalUser(pub Option<AuthenticatedUser>);

#[async_trait]
impl<S> FromRequestParts<S> for OptionalUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalUser(parts.extensions.get::<AuthenticatedUser>().cloned()))
    }
}

/// Extractor for a required authenticated user. Rejects with 401.
pub struct RequireAuth(pub AuthenticatedUser);

#[async_trait]
impl<S> FromRequestParts<S> for RequireAuth
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .map(RequireAuth)
            .ok_or_else(|| auth_error_response(AuthError::Unauthenticated))
    }
}

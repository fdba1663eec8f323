//! OpenID Connect federation
//!
//! Bridges an external identity provider into local sessions: discovery,
//! PKCE authorization URLs, code exchange and ID token verification against
//! the provider's JWKS. The external tokens are handed back to the caller but
//! never authorize API calls here; the caller maps the verified subject to a
//! local user and issues local tokens.
//!
//! Every provider call is bounded by `request_timeout` and is cancelled when
//! the caller's future is dropped. Outages, timeouts, 5xx responses and
//! unusable metadata surface as [`AuthError::ServiceUnavailable`].

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use rand::RngCore;
use reqwest::Url;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::OidcConfig;
use crate::error::{AuthError, AuthResult};

const ALLOWED_ALGORITHMS: [Algorithm; 6] = [
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::ES256,
    Algorithm::ES384,
];

/// Clock skew tolerated on provider-issued tokens
const ID_TOKEN_LEEWAY_SECS: u64 = 60;

// =============================================================================
// Provider documents
// =============================================================================

/// Subset of the discovery document this bridge relies on
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
    #[serde(default)]
    pub end_session_endpoint: Option<String>,
}

/// JSON Web Key Set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    fn contains_kid(&self, kid: &str) -> bool {
        self.keys.iter().any(|k| k.kid.as_deref() == Some(kid))
    }
}

/// Public RSA or EC key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    pub kty: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default)]
    pub n: Option<String>,
    #[serde(default)]
    pub e: Option<String>,
    #[serde(default)]
    pub crv: Option<String>,
    #[serde(default)]
    pub x: Option<String>,
    #[serde(default)]
    pub y: Option<String>,
}

/// Tokens returned by the provider's token endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalTokenSet {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Verified identity claims from the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FederatedIdentity {
    pub subject: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub display_name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub picture: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<serde_json::Value>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    preferred_username: Option<String>,
    #[serde(default)]
    given_name: Option<String>,
    #[serde(default)]
    family_name: Option<String>,
    #[serde(default)]
    picture: Option<String>,
}

impl From<IdTokenClaims> for FederatedIdentity {
    fn from(claims: IdTokenClaims) -> Self {
        // Some providers send "true"/"false" strings
        let email_verified = match claims.email_verified {
            Some(serde_json::Value::Bool(b)) => b,
            Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };

        let display_name = claims.name.or(claims.preferred_username).or_else(|| {
            match (&claims.given_name, &claims.family_name) {
                (Some(given), Some(family)) => Some(format!("{} {}", given, family)),
                (Some(given), None) => Some(given.clone()),
                _ => None,
            }
        });

        Self {
            subject: claims.sub,
            email: claims.email,
            email_verified,
            display_name,
            given_name: claims.given_name,
            family_name: claims.family_name,
            picture: claims.picture,
        }
    }
}

/// Authorization URL plus the PKCE verifier the caller must hold on to
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    pub code_verifier: String,
}

/// Result of a successful code exchange
#[derive(Debug, Clone)]
pub struct FederatedLogin {
    pub tokens: ExternalTokenSet,
    pub identity: FederatedIdentity,
    pub raw_id_token: String,
}

// =============================================================================
// PKCE
// =============================================================================

/// Random PKCE code verifier (43 characters)
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// S256 code challenge for `verifier`
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

// =============================================================================
// Bridge
// =============================================================================

struct CachedJwks {
    jwks: Jwks,
    fetched_at: Instant,
}

/// Client for one external OpenID Connect provider
#[derive(Clone)]
pub struct OidcBridge {
    config: OidcConfig,
    metadata: ProviderMetadata,
    http: reqwest::Client,
    jwks: Arc<RwLock<Option<CachedJwks>>>,
    refetch: Arc<Mutex<()>>,
}

impl OidcBridge {
    /// Fetch the provider's discovery document and build a bridge from it
    pub async fn discover(config: OidcConfig) -> AuthResult<Self> {
        let http = build_client(&config)?;
        let issuer = config.issuer_url.trim_end_matches('/');
        let url = format!("{}/.well-known/openid-configuration", issuer);

        let metadata: ProviderMetadata =
            with_timeout(&config, "discovery", fetch_json(&http, &url)).await?;

        if metadata.issuer.trim_end_matches('/') != issuer {
            warn!(expected = %issuer, advertised = %metadata.issuer, "OIDC issuer mismatch");
            return Err(AuthError::ServiceUnavailable(format!(
                "discovery advertises issuer {}",
                metadata.issuer
            )));
        }

        info!(issuer = %metadata.issuer, "OIDC provider discovered");
        Self::with_client(config, metadata, http)
    }

    /// Build a bridge from already known metadata
    pub fn from_metadata(config: OidcConfig, metadata: ProviderMetadata) -> AuthResult<Self> {
        let http = build_client(&config)?;
        Self::with_client(config, metadata, http)
    }

    fn with_client(config: OidcConfig, metadata: ProviderMetadata, http: reqwest::Client) -> AuthResult<Self> {
        for endpoint in [&metadata.authorization_endpoint, &metadata.token_endpoint, &metadata.jwks_uri] {
            Url::parse(endpoint)
                .map_err(|e| AuthError::ServiceUnavailable(format!("unusable endpoint {}: {}", endpoint, e)))?;
        }

        Ok(Self {
            config,
            metadata,
            http,
            jwks: Arc::new(RwLock::new(None)),
            refetch: Arc::new(Mutex::new(())),
        })
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    /// Authorization URL carrying `state` and a fresh PKCE challenge.
    ///
    /// The verifier is returned to the caller; nothing is kept server-side.
    pub fn authorization_url(&self, state: &str) -> AuthResult<AuthorizationRequest> {
        let code_verifier = generate_code_verifier();
        let mut url = parse_endpoint(&self.metadata.authorization_endpoint)?;

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_url)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", state)
            .append_pair("code_challenge", &code_challenge(&code_verifier))
            .append_pair("code_challenge_method", "S256");

        Ok(AuthorizationRequest {
            url: url.into(),
            code_verifier,
        })
    }

    /// Exchange an authorization code and verify the returned ID token
    pub async fn exchange_code(&self, code: &str, code_verifier: &str) -> AuthResult<FederatedLogin> {
        if code.is_empty() || code_verifier.is_empty() {
            return Err(AuthError::Validation("code and code_verifier are required".to_string()));
        }

        let mut form = vec![
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_url.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];
        if let Some(secret) = &self.config.client_secret {
            form.push(("client_secret", secret.as_str()));
        }

        let request = async {
            let response = self
                .http
                .post(&self.metadata.token_endpoint)
                .form(&form)
                .send()
                .await?;

            let status = response.status();
            if status.is_server_error() {
                return Err(AuthError::ServiceUnavailable(format!("token endpoint returned {}", status)));
            }
            if !status.is_success() {
                warn!(status = %status, "OIDC provider rejected authorization code");
                return Err(AuthError::CodeRejected);
            }

            response
                .json::<ExternalTokenSet>()
                .await
                .map_err(|e| AuthError::ServiceUnavailable(format!("unreadable token response: {}", e)))
        };
        let tokens = with_timeout(&self.config, "code exchange", request).await?;

        let raw_id_token = tokens
            .id_token
            .clone()
            .ok_or_else(|| AuthError::InvalidIdToken("token response has no id_token".to_string()))?;
        let identity = self.verify_id_token(&raw_id_token).await?;

        info!(subject = %identity.subject, "OIDC code exchanged");

        Ok(FederatedLogin {
            tokens,
            identity,
            raw_id_token,
        })
    }

    /// Verify a provider-issued token held directly by a client
    pub async fn verify_bearer_token(&self, token: &str) -> AuthResult<FederatedIdentity> {
        self.verify_id_token(token).await
    }

    /// Provider end-session URL with optional redirect and ID token hint
    pub fn logout_url(&self, post_logout_redirect: Option<&str>, id_token_hint: Option<&str>) -> AuthResult<String> {
        let endpoint = self
            .metadata
            .end_session_endpoint
            .as_deref()
            .ok_or_else(|| AuthError::ServiceUnavailable("provider has no end_session_endpoint".to_string()))?;
        let mut url = parse_endpoint(endpoint)?;

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("client_id", &self.config.client_id);
            if let Some(redirect) = post_logout_redirect {
                query.append_pair("post_logout_redirect_uri", redirect);
            }
            if let Some(hint) = id_token_hint {
                query.append_pair("id_token_hint", hint);
            }
        }

        Ok(url.into())
    }

    /// Verify signature, issuer, audience and expiry of a provider JWT
    pub async fn verify_id_token(&self, token: &str) -> AuthResult<FederatedIdentity> {
        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| AuthError::InvalidIdToken(format!("bad header: {}", e)))?;

        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::InvalidIdToken(format!("algorithm {:?} not allowed", header.alg)));
        }

        let jwks = self.signing_keys(header.kid.as_deref()).await?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.metadata.issuer.as_str()]);
        validation.set_audience(&[self.config.client_id.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation.leeway = ID_TOKEN_LEEWAY_SECS;

        // A named kid must match; only kid-less tokens try every key
        let candidates: Vec<&Jwk> = match header.kid.as_deref() {
            Some(kid) => jwks.keys.iter().filter(|k| k.kid.as_deref() == Some(kid)).collect(),
            None => jwks.keys.iter().collect(),
        };

        let mut last_err = None;
        for jwk in candidates {
            let Ok(key) = decoding_key_from_jwk(jwk) else {
                continue;
            };
            match jsonwebtoken::decode::<IdTokenClaims>(token, &key, &validation) {
                Ok(data) => return Ok(FederatedIdentity::from(data.claims)),
                Err(e) => last_err = Some(e),
            }
        }

        let reason = last_err.map_or_else(|| "no usable signing key".to_string(), |e| e.to_string());
        debug!(reason = %reason, "ID token rejected");
        Err(AuthError::InvalidIdToken(reason))
    }

    /// Cached JWKS, refetched when stale or when `kid` is unknown.
    ///
    /// A `kid` miss refetches at most once per `jwks_min_refetch_interval`;
    /// within that interval the cached set is returned as is.
    async fn signing_keys(&self, kid: Option<&str>) -> AuthResult<Jwks> {
        if let Some(jwks) = self.cached_keys(kid).await {
            return Ok(jwks);
        }

        // One fetch at a time; waiters reuse its result
        let _guard = self.refetch.lock().await;
        if let Some(jwks) = self.cached_keys(kid).await {
            return Ok(jwks);
        }

        let jwks: Jwks = with_timeout(&self.config, "jwks", fetch_json(&self.http, &self.metadata.jwks_uri)).await?;
        debug!(keys = jwks.keys.len(), "Fetched provider signing keys");

        *self.jwks.write().await = Some(CachedJwks {
            jwks: jwks.clone(),
            fetched_at: Instant::now(),
        });

        Ok(jwks)
    }

    async fn cached_keys(&self, kid: Option<&str>) -> Option<Jwks> {
        let cache = self.jwks.read().await;
        let cached = cache.as_ref()?;

        let age = cached.fetched_at.elapsed();
        if age >= self.config.jwks_cache_ttl {
            return None;
        }

        match kid {
            Some(kid) if !cached.jwks.contains_kid(kid) => {
                if age < self.config.jwks_min_refetch_interval {
                    debug!(kid, "Unknown key id; refetch throttled");
                    Some(cached.jwks.clone())
                } else {
                    None
                }
            }
            _ => Some(cached.jwks.clone()),
        }
    }
}

fn build_client(config: &OidcConfig) -> AuthResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .map_err(|e| AuthError::Config(format!("HTTP client: {}", e)))
}

fn parse_endpoint(endpoint: &str) -> AuthResult<Url> {
    Url::parse(endpoint).map_err(|e| AuthError::ServiceUnavailable(format!("unusable endpoint {}: {}", endpoint, e)))
}

async fn with_timeout<T>(
    config: &OidcConfig,
    operation: &'static str,
    fut: impl Future<Output = AuthResult<T>>,
) -> AuthResult<T> {
    match tokio::time::timeout(config.request_timeout, fut).await {
        Ok(result) => {
            if let Err(AuthError::ServiceUnavailable(reason)) = &result {
                warn!(operation, reason = %reason, "OIDC provider unavailable");
            }
            result
        }
        Err(_) => {
            warn!(operation, "OIDC provider call timed out");
            Err(AuthError::ServiceUnavailable(format!("{} timed out", operation)))
        }
    }
}

async fn fetch_json<T: DeserializeOwned>(http: &reqwest::Client, url: &str) -> AuthResult<T> {
    let response = http.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(AuthError::ServiceUnavailable(format!("{} returned {}", url, status)));
    }

    response
        .json::<T>()
        .await
        .map_err(|e| AuthError::ServiceUnavailable(format!("unreadable document at {}: {}", url, e)))
}

fn decoding_key_from_jwk(jwk: &Jwk) -> AuthResult<DecodingKey> {
    let missing = |field: &str| AuthError::InvalidIdToken(format!("{} JWK missing {}", jwk.kty, field));

    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk.n.as_deref().ok_or_else(|| missing("n"))?;
            let e = jwk.e.as_deref().ok_or_else(|| missing("e"))?;
            Ok(DecodingKey::from_rsa_components(n, e)?)
        }
        "EC" => {
            let x = jwk.x.as_deref().ok_or_else(|| missing("x"))?;
            let y = jwk.y.as_deref().ok_or_else(|| missing("y"))?;
            Ok(DecodingKey::from_ec_components(x, y)?)
        }
        other => Err(AuthError::InvalidIdToken(format!("unsupported key type {}", other))),
    }
}

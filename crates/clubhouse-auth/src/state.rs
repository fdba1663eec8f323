//! OAuth state tokens and CSRF tokens
//!
//! A state token is `<nonce>.<unix seconds>.<hex signature>` where the
//! signature is HMAC-SHA256 over `nonce.timestamp.ip_hash`. It needs no
//! server-side storage: the callback recomputes the signature against the
//! caller's IP hash and checks the age. Every failure collapses into
//! [`AuthError::InvalidState`].

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::debug;

use crate::config::StateConfig;
use crate::error::{AuthError, AuthResult};

type HmacSha256 = Hmac<Sha256>;

const NONCE_BYTES: usize = 32;
const CSRF_TOKEN_BYTES: usize = 32;

/// Signs and validates OAuth state tokens
#[derive(Clone)]
pub struct StateSigner {
    secret: Vec<u8>,
    validity_secs: i64,
}

impl StateSigner {
    pub fn new(config: &StateConfig) -> Self {
        Self {
            secret: config.secret.as_bytes().to_vec(),
            validity_secs: config.validity.as_secs() as i64,
        }
    }

    /// Generate a state token bound to `ip_hash`
    pub fn generate(&self, ip_hash: &str) -> AuthResult<String> {
        self.generate_at(ip_hash, chrono::Utc::now().timestamp())
    }

    pub fn generate_at(&self, ip_hash: &str, now: i64) -> AuthResult<String> {
        let mut bytes = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        let nonce = hex::encode(bytes);

        let signature = self.sign(&nonce, &now.to_string(), ip_hash)?;
        Ok(format!("{}.{}.{}", nonce, now, hex::encode(signature)))
    }

    /// Validate `token` against `ip_hash`, returning its nonce
    pub fn validate(&self, token: &str, ip_hash: &str) -> AuthResult<String> {
        self.validate_at(token, ip_hash, chrono::Utc::now().timestamp())
    }

    pub fn validate_at(&self, token: &str, ip_hash: &str, now: i64) -> AuthResult<String> {
        self.check(token, ip_hash, now).map_err(|reason| {
            debug!(reason, "State token rejected");
            AuthError::InvalidState
        })
    }

    fn check(&self, token: &str, ip_hash: &str, now: i64) -> Result<String, &'static str> {
        let parts: Vec<&str> = token.split('.').collect();
        let [nonce, timestamp, signature] = parts.as_slice() else {
            return Err("malformed");
        };

        let issued_at: i64 = timestamp.parse().map_err(|_| "bad timestamp")?;
        let age = now - issued_at;
        if age < 0 {
            return Err("issued in the future");
        }
        if age > self.validity_secs {
            return Err("expired");
        }

        let presented = hex::decode(signature).map_err(|_| "bad signature encoding")?;
        let expected = self.sign(nonce, timestamp, ip_hash).map_err(|_| "signing failed")?;

        if bool::from(expected.ct_eq(&presented)) {
            Ok(nonce.to_string())
        } else {
            Err("signature mismatch")
        }
    }

    fn sign(&self, nonce: &str, timestamp: &str, ip_hash: &str) -> AuthResult<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AuthError::Crypto(format!("Invalid state secret: {}", e)))?;

        mac.update(nonce.as_bytes());
        mac.update(b".");
        mac.update(timestamp.as_bytes());
        mac.update(b".");
        mac.update(ip_hash.as_bytes());

        Ok(mac.finalize().into_bytes().to_vec())
    }
}

/// Hex SHA-256 of the requester IP, used to bind state tokens
pub fn hash_requester_ip(ip: &str) -> String {
    hex::encode(Sha256::digest(ip.as_bytes()))
}

/// Random general-purpose CSRF token.
///
/// Unsigned and unbound: validation only checks that it decodes to enough
/// random bytes.
pub fn generate_csrf_token() -> String {
    let mut bytes = [0u8; CSRF_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn validate_csrf_token(token: &str) -> bool {
    URL_SAFE_NO_PAD
        .decode(token)
        .is_ok_and(|bytes| bytes.len() >= CSRF_TOKEN_BYTES)
}

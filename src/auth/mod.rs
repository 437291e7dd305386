//! Passwords and bearer tokens.
//!
//! Users carry scrypt password hashes in PHC string format. Machines
//! (and machines-to-be) get short-lived bearer tokens: an
//! HMAC-SHA256-signed claim set that the API layer checks against the
//! scope/action/key triple of each request.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use rand::RngCore;
use scrypt::password_hash::rand_core::OsRng;
use scrypt::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use scrypt::Scrypt;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Default lifetime for tokens handed to unknown machines.
pub const DEFAULT_UNKNOWN_TOKEN_TIMEOUT: u64 = 600;
/// Default lifetime for tokens handed to known machines.
pub const DEFAULT_KNOWN_TOKEN_TIMEOUT: u64 = 3600;

/// Token handling failures.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("malformed token")]
    Malformed,
    #[error("bad token signature")]
    BadSignature,
    #[error("token expired")]
    Expired,
}

/// Hash a password with scrypt, producing a PHC string.
///
/// Parameters are pinned (N=2^14, r=8, p=1) rather than taken from the
/// crate default; verification reads them back out of the PHC string,
/// so they can be raised later without invalidating existing hashes.
pub fn hash_password(password: &str) -> Result<String, String> {
    let params = scrypt::Params::new(14, 8, 1, scrypt::Params::RECOMMENDED_LEN)
        .map_err(|e| e.to_string())?;
    let salt = SaltString::generate(&mut OsRng);
    Scrypt
        .hash_password_customized(password.as_bytes(), None, None, params, &salt)
        .map(|h| h.to_string())
        .map_err(|e| e.to_string())
}

/// Verify a password against a PHC hash string. Empty or unparseable
/// hashes match nothing.
pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Scrypt.verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

/// One capability: scope.action.specific, each part possibly `*`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    pub scope: String,
    pub action: String,
    pub specific: String,
}

impl Claim {
    pub fn new(scope: &str, action: &str, specific: &str) -> Self {
        Self {
            scope: scope.to_string(),
            action: action.to_string(),
            specific: specific.to_string(),
        }
    }

    fn matches(&self, scope: &str, action: &str, specific: &str) -> bool {
        let part = |have: &str, want: &str| have == "*" || have == want;
        part(&self.scope, scope) && part(&self.action, action) && part(&self.specific, specific)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Payload {
    claims: Vec<Claim>,
    expires_at: i64,
    nonce: u64,
}

/// A verified token's contents.
#[derive(Debug, Clone)]
pub struct TokenInfo {
    pub claims: Vec<Claim>,
    pub expires_at: i64,
}

impl TokenInfo {
    /// Whether any claim grants the scope/action/specific triple.
    pub fn matches(&self, scope: &str, action: &str, specific: &str) -> bool {
        self.claims.iter().any(|c| c.matches(scope, action, specific))
    }
}

/// Issues and verifies bearer tokens.
#[derive(Debug, Clone)]
pub struct TokenFactory {
    secret: [u8; 32],
    /// Lifetime in seconds for unknown-machine tokens.
    pub unknown_token_timeout: u64,
    /// Lifetime in seconds for known-machine tokens.
    pub known_token_timeout: u64,
}

impl TokenFactory {
    /// Create a factory with a fresh random signing secret.
    pub fn new() -> Self {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        Self {
            secret,
            unknown_token_timeout: DEFAULT_UNKNOWN_TOKEN_TIMEOUT,
            known_token_timeout: DEFAULT_KNOWN_TOKEN_TIMEOUT,
        }
    }

    /// Create a factory with a fixed secret (reload must not
    /// invalidate tokens already in the field).
    pub fn with_secret(secret: [u8; 32]) -> Self {
        Self {
            secret,
            unknown_token_timeout: DEFAULT_UNKNOWN_TOKEN_TIMEOUT,
            known_token_timeout: DEFAULT_KNOWN_TOKEN_TIMEOUT,
        }
    }

    fn sign(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }

    /// Issue a token carrying `claims` for `ttl_seconds`.
    pub fn issue(&self, claims: Vec<Claim>, ttl_seconds: u64) -> String {
        let payload = Payload {
            claims,
            expires_at: Utc::now().timestamp() + ttl_seconds as i64,
            nonce: rand::thread_rng().next_u64(),
        };
        let body = serde_json::to_vec(&payload).expect("payload always serialises");
        let sig = self.sign(&body);
        format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&body),
            URL_SAFE_NO_PAD.encode(sig)
        )
    }

    /// Verify a token and return its claims.
    pub fn verify(&self, token: &str) -> Result<TokenInfo, AuthError> {
        let (body_b64, sig_b64) = token.split_once('.').ok_or(AuthError::Malformed)?;
        let body = URL_SAFE_NO_PAD
            .decode(body_b64)
            .map_err(|_| AuthError::Malformed)?;
        let sig = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| AuthError::Malformed)?;
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(&body);
        mac.verify_slice(&sig).map_err(|_| AuthError::BadSignature)?;
        let payload: Payload =
            serde_json::from_slice(&body).map_err(|_| AuthError::Malformed)?;
        if payload.expires_at <= Utc::now().timestamp() {
            return Err(AuthError::Expired);
        }
        Ok(TokenInfo {
            claims: payload.claims,
            expires_at: payload.expires_at,
        })
    }

    /// Token for a machine that is not registered yet: it may register
    /// itself and read machine state.
    pub fn unknown_machine_token(&self) -> String {
        self.issue(
            vec![
                Claim::new("machines", "post", "*"),
                Claim::new("machines", "get", "*"),
            ],
            self.unknown_token_timeout,
        )
    }

    /// Token for a known machine: it may read and patch itself, and
    /// nothing else.
    pub fn known_machine_token(&self, uuid: Uuid) -> String {
        let id = uuid.to_string();
        self.issue(
            vec![
                Claim::new("machines", "get", &id),
                Claim::new("machines", "patch", &id),
            ],
            self.known_token_timeout,
        )
    }
}

impl Default for TokenFactory {
    fn default() -> Self {
        Self::new()
    }
}

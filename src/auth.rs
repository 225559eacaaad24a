//! Identity service: sealed bearer tokens, revocation, credentials.
//!
//! Tokens are XChaCha20-Poly1305-sealed JSON claims, base64url encoded:
//! `token = b64url(nonce(24) || ciphertext)`. Claims carry the opaque user
//! id, a unique token id for revocation, the token kind and expiry.
//!
//! The revocation set lives in process memory behind `revoke`/`is_revoked`
//! so a shared store can replace it for multi-instance deployments.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use chrono::Utc;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

const NONCE_LEN: usize = 24;
const ACCESS_TTL_SECS: i64 = 60 * 60;
const REFRESH_TTL_SECS: i64 = 30 * 24 * 60 * 60;

const HASH_ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Opaque user id.
    pub sub: String,
    /// Unique token id, target of revocation.
    pub jti: String,
    pub kind: TokenKind,
    pub iat: i64,
    pub exp: i64,
}

pub struct TokenService {
    key: [u8; 32],
    access_ttl_secs: i64,
    refresh_ttl_secs: i64,
    revoked: RwLock<HashSet<String>>,
}

impl TokenService {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key,
            access_ttl_secs: ACCESS_TTL_SECS,
            refresh_ttl_secs: REFRESH_TTL_SECS,
            revoked: RwLock::new(HashSet::new()),
        }
    }

    pub fn from_base64_key(encoded: &str) -> Result<Self, AppError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|_| AppError::Internal("token key is not valid base64".to_string()))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AppError::Internal("token key must be 32 bytes".to_string()))?;
        Ok(Self::new(key))
    }

    pub fn mint(&self, user_id: &str, kind: TokenKind) -> Result<String, AppError> {
        let now = Utc::now().timestamp();
        let ttl = match kind {
            TokenKind::Access => self.access_ttl_secs,
            TokenKind::Refresh => self.refresh_ttl_secs,
        };
        let claims = Claims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            kind,
            iat: now,
            exp: now + ttl,
        };

        let plaintext = serde_json::to_vec(&claims)?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill(&mut nonce);

        let cipher = XChaCha20Poly1305::new((&self.key).into());
        let ciphertext = cipher
            .encrypt(XNonce::from_slice(&nonce), plaintext.as_ref())
            .map_err(|e| AppError::Internal(format!("token sealing failed: {e}")))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(blob))
    }

    pub fn verify(&self, token: &str, expected: TokenKind) -> Result<Claims, AppError> {
        let invalid = || AppError::Auth("Invalid token".to_string());

        let blob = URL_SAFE_NO_PAD.decode(token).map_err(|_| invalid())?;
        if blob.len() <= NONCE_LEN {
            return Err(invalid());
        }
        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

        let cipher = XChaCha20Poly1305::new((&self.key).into());
        let plaintext = cipher
            .decrypt(XNonce::from_slice(nonce), ciphertext)
            .map_err(|_| invalid())?;
        let claims: Claims = serde_json::from_slice(&plaintext).map_err(|_| invalid())?;

        if claims.exp <= Utc::now().timestamp() {
            return Err(AppError::Auth("Token expired".to_string()));
        }
        if claims.kind != expected {
            return Err(AppError::Auth("Wrong token type".to_string()));
        }
        if self.is_revoked(&claims.jti) {
            return Err(AppError::Auth("Token revoked".to_string()));
        }
        Ok(claims)
    }

    pub fn revoke(&self, jti: &str) {
        self.revoked.write().unwrap().insert(jti.to_string());
    }

    pub fn is_revoked(&self, jti: &str) -> bool {
        self.revoked.read().unwrap().contains(jti)
    }
}

/// Authenticated requester, extracted from the `Authorization` header.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub jti: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(&parts.headers)?;
        let claims = state.tokens.verify(token, TokenKind::Access)?;
        Ok(AuthUser {
            user_id: claims.sub,
            jti: claims.jti,
        })
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?;
    header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Auth("Malformed authorization header".to_string()))
}

pub fn is_valid_email(email: &str) -> bool {
    Regex::new(r"^[\w.\-]+@[\w.\-]+\.\w+$").unwrap().is_match(email)
}

/// At least 8 characters with an uppercase letter, a lowercase letter and
/// a digit.
pub fn is_valid_password(password: &str) -> bool {
    password.len() >= 8
        && password.chars().any(|c| c.is_ascii_uppercase())
        && password.chars().any(|c| c.is_ascii_lowercase())
        && password.chars().any(|c| c.is_ascii_digit())
}

/// Salted, iterated SHA-256: `sha256$<iters>$<salt b64>$<digest b64>`.
pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::thread_rng().fill(&mut salt);
    let digest = derive(password, &salt, HASH_ITERATIONS);
    format!(
        "sha256${}${}${}",
        HASH_ITERATIONS,
        STANDARD.encode(salt),
        STANDARD.encode(digest)
    )
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let parts: Vec<&str> = stored.split('$').collect();
    if parts.len() != 4 || parts[0] != "sha256" {
        return false;
    }
    let Ok(iterations) = parts[1].parse::<u32>() else {
        return false;
    };
    let Ok(salt) = STANDARD.decode(parts[2]) else {
        return false;
    };
    let Ok(expected) = STANDARD.decode(parts[3]) else {
        return false;
    };
    derive(password, &salt, iterations).as_slice() == expected.as_slice()
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    let mut digest = hasher.finalize();
    for _ in 1..iterations {
        digest = Sha256::digest(digest);
    }
    digest.into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new([7u8; 32])
    }

    #[test]
    fn test_token_roundtrip() {
        let tokens = service();
        let token = tokens.mint("user-1", TokenKind::Access).unwrap();
        let claims = tokens.verify(&token, TokenKind::Access).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.kind, TokenKind::Access);
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let tokens = service();
        let refresh = tokens.mint("user-1", TokenKind::Refresh).unwrap();
        let err = tokens.verify(&refresh, TokenKind::Access).unwrap_err();
        assert!(matches!(err, AppError::Auth(_)));
    }

    #[test]
    fn test_tampered_token_rejected() {
        let tokens = service();
        let mut token = tokens.mint("user-1", TokenKind::Access).unwrap();
        token.replace_range(10..12, "AA");
        assert!(tokens.verify(&token, TokenKind::Access).is_err());
        assert!(tokens.verify("not-a-token", TokenKind::Access).is_err());
    }

    #[test]
    fn test_wrong_key_rejected() {
        let token = service().mint("user-1", TokenKind::Access).unwrap();
        let other = TokenService::new([9u8; 32]);
        assert!(other.verify(&token, TokenKind::Access).is_err());
    }

    #[test]
    fn test_expired_token_rejected() {
        let tokens = TokenService {
            key: [7u8; 32],
            access_ttl_secs: -10,
            refresh_ttl_secs: -10,
            revoked: RwLock::new(HashSet::new()),
        };
        let token = tokens.mint("user-1", TokenKind::Access).unwrap();
        let err = tokens.verify(&token, TokenKind::Access).unwrap_err();
        assert!(matches!(err, AppError::Auth(msg) if msg == "Token expired"));
    }

    #[test]
    fn test_revocation() {
        let tokens = service();
        let token = tokens.mint("user-1", TokenKind::Access).unwrap();
        let claims = tokens.verify(&token, TokenKind::Access).unwrap();
        tokens.revoke(&claims.jti);
        assert!(tokens.is_revoked(&claims.jti));
        let err = tokens.verify(&token, TokenKind::Access).unwrap_err();
        assert!(matches!(err, AppError::Auth(msg) if msg == "Token revoked"));
    }

    #[test]
    fn test_password_roundtrip() {
        let stored = hash_password("Abcd1234");
        assert!(verify_password("Abcd1234", &stored));
        assert!(!verify_password("Abcd1235", &stored));
        assert!(!verify_password("Abcd1234", "garbage"));
    }

    #[test]
    fn test_password_hashes_are_salted() {
        assert_ne!(hash_password("Abcd1234"), hash_password("Abcd1234"));
    }

    #[test]
    fn test_email_validation() {
        assert!(is_valid_email("student@example.com"));
        assert!(is_valid_email("first.last@uni.edu"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("missing@tld"));
        assert!(!is_valid_email("@example.com"));
    }

    #[test]
    fn test_password_strength() {
        assert!(is_valid_password("Abcd1234"));
        assert!(!is_valid_password("short1A"));
        assert!(!is_valid_password("alllowercase1"));
        assert!(!is_valid_password("ALLUPPERCASE1"));
        assert!(!is_valid_password("NoDigitsHere"));
    }
}

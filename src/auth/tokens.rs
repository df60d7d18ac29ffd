//! Token minting and validation
//!
//! Signed JSON-claim bearer tokens for every principal kind. The signing
//! key lives only in this module; when it is unconfigured outside dev the
//! service refuses to start (see `Config::validate`). Fingerprints are
//! bound into claims as BLAKE3 digests and compared in constant time.

use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::storage::{keys, Storage};

/// Principal role carried in every token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Agent,
    Temp,
    Scrape,
}

/// Token claims
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Principal id: admin username or agent id
    pub sub: String,
    pub role: Role,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
    /// Token id; admin tokens use it as the session id
    pub jti: String,
    /// BLAKE3 digest of the client fingerprint
    pub fingerprint_hash: String,
    /// Bound agent for agent/temp tokens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

/// Hash a client fingerprint for claim binding
#[must_use]
pub fn fingerprint_hash(fingerprint: &str) -> String {
    blake3::hash(fingerprint.as_bytes()).to_hex().to_string()
}

/// Constant-time comparison of a fingerprint against a stored digest
#[must_use]
pub fn fingerprint_matches(fingerprint: &str, stored_hex: &str) -> bool {
    // blake3::Hash equality is constant-time; hashing the hex side once
    // more folds both inputs to fixed width first.
    let presented = blake3::hash(fingerprint_hash(fingerprint).as_bytes());
    let stored = blake3::hash(stored_hex.as_bytes());
    presented == stored
}

/// Mints and validates bearer tokens
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    lifetime: Duration,
    storage: Storage,
}

impl TokenService {
    /// Build from configuration; generates a process-local random secret in
    /// dev when none is configured
    pub fn new(config: &AuthConfig, storage: Storage) -> Result<Self> {
        let algorithm = parse_algorithm(&config.jwt_algorithm)?;
        let secret = if config.jwt_secret.is_empty() {
            tracing::warn!("JWT_SECRET not set; using a random dev-only signing key");
            let mut bytes = [0u8; 32];
            rand::rng().fill_bytes(&mut bytes);
            bytes.to_vec()
        } else {
            config.jwt_secret.as_bytes().to_vec()
        };

        Ok(Self {
            encoding_key: EncodingKey::from_secret(&secret),
            decoding_key: DecodingKey::from_secret(&secret),
            algorithm,
            lifetime: config.token_lifetime(),
            storage,
        })
    }

    /// Default access-token lifetime
    #[must_use]
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Mint a token; `lifetime` falls back to the configured default
    pub fn mint(
        &self,
        sub: &str,
        role: Role,
        fingerprint: &str,
        agent_id: Option<&str>,
        lifetime: Option<Duration>,
    ) -> Result<(String, Claims)> {
        let now = Utc::now();
        let lifetime = lifetime.unwrap_or(self.lifetime);
        let claims = Claims {
            sub: sub.to_string(),
            role,
            iat: now.timestamp(),
            exp: now.timestamp() + lifetime.as_secs() as i64,
            jti: Uuid::new_v4().to_string(),
            fingerprint_hash: fingerprint_hash(fingerprint),
            agent_id: agent_id.map(str::to_string),
        };
        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)?;
        Ok((token, claims))
    }

    /// Decode and check a token against a presented fingerprint
    ///
    /// Failure modes map to stable codes: `token_expired`, `token_invalid`,
    /// `fingerprint_mismatch`, `token_revoked`. A token signed with a
    /// previous key fails as invalid, not expired.
    pub async fn validate(&self, token: &str, fingerprint: &str) -> Result<Claims> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.validate_exp = true;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                    Error::unauthorized("token_expired", "Token has expired")
                }
                _ => Error::unauthorized("token_invalid", "Token is invalid"),
            })?;

        if !fingerprint_matches(fingerprint, &claims.fingerprint_hash) {
            return Err(Error::unauthorized(
                "fingerprint_mismatch",
                "Token is bound to a different client",
            ));
        }

        if self
            .storage
            .active()
            .get(&keys::revoked(&claims.jti))
            .await?
            .is_some()
        {
            return Err(Error::unauthorized("token_revoked", "Token was revoked"));
        }

        Ok(claims)
    }

    /// Add a token id to the revocation set until its natural expiry
    pub async fn revoke(&self, claims: &Claims) -> Result<()> {
        let remaining = (claims.exp - Utc::now().timestamp()).max(1) as u64;
        self.storage
            .active()
            .set_ex(
                &keys::revoked(&claims.jti),
                b"1",
                Duration::from_secs(remaining),
            )
            .await
    }
}

fn parse_algorithm(alg: &str) -> Result<Algorithm> {
    match alg.to_uppercase().as_str() {
        "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        other => Err(Error::Config(Box::new(figment::Error::from(format!(
            "Unsupported JWT algorithm: {other}"
        ))))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        let config = AuthConfig {
            jwt_secret: "0123456789abcdef0123456789abcdef".into(),
            ..Default::default()
        };
        TokenService::new(&config, Storage::in_memory()).unwrap()
    }

    #[tokio::test]
    async fn test_mint_validate_roundtrip() {
        let tokens = service();
        let (token, minted) = tokens
            .mint("echo-1", Role::Agent, "fp-abc", Some("echo-1"), None)
            .unwrap();
        let claims = tokens.validate(&token, "fp-abc").await.unwrap();
        assert_eq!(claims.sub, "echo-1");
        assert_eq!(claims.role, Role::Agent);
        assert_eq!(claims.jti, minted.jti);
        assert_eq!(claims.agent_id.as_deref(), Some("echo-1"));
    }

    #[tokio::test]
    async fn test_fingerprint_mismatch() {
        let tokens = service();
        let (token, _) = tokens.mint("admin", Role::Admin, "fp-a", None, None).unwrap();
        let err = tokens.validate(&token, "fp-b").await.unwrap_err();
        assert_eq!(err.code(), "fingerprint_mismatch");
    }

    #[tokio::test]
    async fn test_expired_token() {
        let tokens = service();
        let (token, _) = tokens
            .mint(
                "admin",
                Role::Admin,
                "fp",
                None,
                Some(Duration::from_secs(0)),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let err = tokens.validate(&token, "fp").await.unwrap_err();
        assert_eq!(err.code(), "token_expired");
    }

    #[tokio::test]
    async fn test_key_change_invalidates_not_expires() {
        let storage = Storage::in_memory();
        let old = TokenService::new(
            &AuthConfig {
                jwt_secret: "old-secret-old-secret-old-secret".into(),
                ..Default::default()
            },
            storage.clone(),
        )
        .unwrap();
        let new = TokenService::new(
            &AuthConfig {
                jwt_secret: "new-secret-new-secret-new-secret".into(),
                ..Default::default()
            },
            storage,
        )
        .unwrap();

        let (token, _) = old.mint("admin", Role::Admin, "fp", None, None).unwrap();
        let err = new.validate(&token, "fp").await.unwrap_err();
        assert_eq!(err.code(), "token_invalid");
    }

    #[tokio::test]
    async fn test_revocation() {
        let tokens = service();
        let (token, claims) = tokens.mint("admin", Role::Admin, "fp", None, None).unwrap();
        tokens.revoke(&claims).await.unwrap();
        let err = tokens.validate(&token, "fp").await.unwrap_err();
        assert_eq!(err.code(), "token_revoked");
    }

    #[test]
    fn test_fingerprint_match_helper() {
        let digest = fingerprint_hash("fp-abc");
        assert!(fingerprint_matches("fp-abc", &digest));
        assert!(!fingerprint_matches("fp-xyz", &digest));
    }
}

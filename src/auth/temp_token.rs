//! Single-use registration tokens
//!
//! A temp token is a short-lived JWT plus a TTL-bound hash record
//! (`temptoken:{jti}`). Consumption claims the record's `consumed` field
//! atomically, so exactly one registration can spend a given token.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::storage::{keys, Storage};

use super::tokens::{Claims, Role, TokenService};

/// The facts a consumed temp token asserts about the registrant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempTokenGrant {
    pub agent_id: String,
    pub agent_type: String,
    pub fingerprint_hash: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Issues and consumes temp tokens
#[derive(Clone)]
pub struct TempTokenService {
    storage: Storage,
    tokens: TokenService,
    ttl: Duration,
}

impl TempTokenService {
    /// Service issuing tokens that live for `ttl` (≤ 15 minutes upstream)
    #[must_use]
    pub fn new(storage: Storage, tokens: TokenService, ttl: Duration) -> Self {
        Self {
            storage,
            tokens,
            ttl,
        }
    }

    /// Mint a temp token and persist its single-use record
    pub async fn issue(
        &self,
        agent_id: &str,
        agent_type: &str,
        fingerprint: &str,
    ) -> Result<(String, DateTime<Utc>)> {
        let (token, claims) = self.tokens.mint(
            agent_id,
            Role::Temp,
            fingerprint,
            Some(agent_id),
            Some(self.ttl),
        )?;

        let store = self.storage.active();
        let key = keys::temp_token(&claims.jti);
        store
            .hset_all(
                &key,
                &[
                    ("agent_id".into(), agent_id.to_string()),
                    ("agent_type".into(), agent_type.to_string()),
                    ("fingerprint_hash".into(), claims.fingerprint_hash.clone()),
                    ("issued_at".into(), claims.iat.to_string()),
                    ("expires_at".into(), claims.exp.to_string()),
                ],
            )
            .await?;
        store.expire(&key, self.ttl).await?;

        let expires_at = DateTime::<Utc>::from_timestamp(claims.exp, 0)
            .ok_or_else(|| Error::Internal("Token expiry out of range".into()))?;
        Ok((token, expires_at))
    }

    /// Spend a validated temp token exactly once
    ///
    /// The caller has already run `TokenService::validate`, so the JWT is
    /// live and fingerprint-bound; this claims the stored record.
    pub async fn consume(&self, claims: &Claims) -> Result<TempTokenGrant> {
        if claims.role != Role::Temp {
            return Err(Error::unauthorized(
                "token_invalid",
                "A temp token is required to register",
            ));
        }

        let store = self.storage.active();
        let key = keys::temp_token(&claims.jti);
        let fields = store.hget_all(&key).await?;
        if fields.is_empty() {
            // JWT outlived the record only if it was already spent and expired
            return Err(Error::unauthorized("token_expired", "Temp token expired"));
        }

        if !store
            .hset_nx(&key, "consumed", &Utc::now().timestamp().to_string())
            .await?
        {
            return Err(Error::conflict(
                "token_already_used",
                "Temp token was already consumed",
            ));
        }

        let field = |name: &str| -> Result<String> {
            fields
                .get(name)
                .cloned()
                .ok_or_else(|| Error::Storage(format!("temp token record missing '{name}'")))
        };

        Ok(TempTokenGrant {
            agent_id: field("agent_id")?,
            agent_type: field("agent_type")?,
            fingerprint_hash: field("fingerprint_hash")?,
            issued_at: field("issued_at")?.parse().unwrap_or(claims.iat),
            expires_at: field("expires_at")?.parse().unwrap_or(claims.exp),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;

    fn service() -> (TempTokenService, TokenService) {
        let storage = Storage::in_memory();
        let tokens = TokenService::new(
            &AuthConfig {
                jwt_secret: "0123456789abcdef0123456789abcdef".into(),
                ..Default::default()
            },
            storage.clone(),
        )
        .unwrap();
        (
            TempTokenService::new(storage, tokens.clone(), Duration::from_secs(900)),
            tokens,
        )
    }

    #[tokio::test]
    async fn test_issue_then_consume_once() {
        let (temp, tokens) = service();
        let (token, _) = temp.issue("echo-1", "testing", "fp-abc").await.unwrap();

        let claims = tokens.validate(&token, "fp-abc").await.unwrap();
        let grant = temp.consume(&claims).await.unwrap();
        assert_eq!(grant.agent_id, "echo-1");
        assert_eq!(grant.agent_type, "testing");

        let err = temp.consume(&claims).await.unwrap_err();
        assert_eq!(err.code(), "token_already_used");
    }

    #[tokio::test]
    async fn test_non_temp_role_rejected() {
        let (temp, tokens) = service();
        let (token, _) = tokens.mint("admin", Role::Admin, "fp", None, None).unwrap();
        let claims = tokens.validate(&token, "fp").await.unwrap();
        assert_eq!(temp.consume(&claims).await.unwrap_err().code(), "token_invalid");
    }

    #[tokio::test]
    async fn test_missing_record_reads_as_expired() {
        let (temp, tokens) = service();
        let (token, _) = tokens
            .mint("a", Role::Temp, "fp", Some("a"), Some(Duration::from_secs(900)))
            .unwrap();
        let claims = tokens.validate(&token, "fp").await.unwrap();
        // No stored record for this jti
        assert_eq!(temp.consume(&claims).await.unwrap_err().code(), "token_expired");
    }
}

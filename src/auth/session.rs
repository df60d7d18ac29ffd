//! Admin session records
//!
//! One hash per session (`session:{jti}`), TTL-bound to the configured
//! session timeout. PIN state lives inside the session and dies with it.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::storage::{keys, Storage};

/// One admin session
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AdminSession {
    /// Session id; equals the admin token's `jti`
    pub jti: String,
    pub user_id: String,
    pub fingerprint_hash: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub pin_hash: Option<String>,
    pub pin_verified_at: Option<DateTime<Utc>>,
    pub pin_attempts: u32,
    pub pin_locked_until: Option<DateTime<Utc>>,
}

impl AdminSession {
    /// Fresh session with no PIN state
    #[must_use]
    pub fn new(
        jti: String,
        user_id: String,
        fingerprint_hash: String,
        lifetime: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            jti,
            user_id,
            fingerprint_hash,
            issued_at: now,
            expires_at: now + chrono::Duration::seconds(lifetime.as_secs() as i64),
            pin_hash: None,
            pin_verified_at: None,
            pin_attempts: 0,
            pin_locked_until: None,
        }
    }

    fn to_fields(&self) -> Vec<(String, String)> {
        let mut fields = vec![
            ("jti".into(), self.jti.clone()),
            ("user_id".into(), self.user_id.clone()),
            ("fingerprint_hash".into(), self.fingerprint_hash.clone()),
            ("issued_at".into(), self.issued_at.to_rfc3339()),
            ("expires_at".into(), self.expires_at.to_rfc3339()),
            ("pin_attempts".into(), self.pin_attempts.to_string()),
        ];
        if let Some(pin_hash) = &self.pin_hash {
            fields.push(("pin_hash".into(), pin_hash.clone()));
        }
        if let Some(at) = self.pin_verified_at {
            fields.push(("pin_verified_at".into(), at.to_rfc3339()));
        }
        if let Some(until) = self.pin_locked_until {
            fields.push(("pin_locked_until".into(), until.to_rfc3339()));
        }
        fields
    }

    fn from_fields(fields: &HashMap<String, String>) -> Result<Self> {
        let time = |name: &str| -> Option<DateTime<Utc>> {
            fields
                .get(name)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc))
        };
        let jti = fields
            .get("jti")
            .cloned()
            .ok_or_else(|| Error::Storage("session record missing 'jti'".into()))?;
        Ok(Self {
            jti,
            user_id: fields.get("user_id").cloned().unwrap_or_default(),
            fingerprint_hash: fields.get("fingerprint_hash").cloned().unwrap_or_default(),
            issued_at: time("issued_at")
                .ok_or_else(|| Error::Storage("session record missing 'issued_at'".into()))?,
            expires_at: time("expires_at")
                .ok_or_else(|| Error::Storage("session record missing 'expires_at'".into()))?,
            pin_hash: fields.get("pin_hash").cloned(),
            pin_verified_at: time("pin_verified_at"),
            pin_attempts: fields
                .get("pin_attempts")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            pin_locked_until: time("pin_locked_until"),
        })
    }
}

/// Session persistence over the storage adapter
#[derive(Clone)]
pub struct SessionStore {
    storage: Storage,
    lifetime: Duration,
    max_sessions: usize,
}

impl SessionStore {
    /// Store enforcing the configured lifetime and session cap
    #[must_use]
    pub fn new(storage: Storage, lifetime: Duration, max_sessions: usize) -> Self {
        Self {
            storage,
            lifetime,
            max_sessions,
        }
    }

    /// Create and persist a session; evicts the oldest when at capacity
    pub async fn create(
        &self,
        jti: String,
        user_id: String,
        fingerprint_hash: String,
    ) -> Result<AdminSession> {
        let mut sessions = self.all().await?;
        if sessions.len() >= self.max_sessions {
            sessions.sort_by_key(|s| s.issued_at);
            if let Some(oldest) = sessions.first() {
                tracing::warn!(
                    evicted = %oldest.jti,
                    "Session cap reached, evicting oldest session"
                );
                self.delete(&oldest.jti).await?;
            }
        }

        let session = AdminSession::new(jti, user_id, fingerprint_hash, self.lifetime);
        self.save(&session).await?;
        Ok(session)
    }

    /// Fetch a live session
    pub async fn get(&self, jti: &str) -> Result<AdminSession> {
        let fields = self.storage.active().hget_all(&keys::session(jti)).await?;
        if fields.is_empty() {
            return Err(Error::unauthorized("token_invalid", "Session not found"));
        }
        let session = AdminSession::from_fields(&fields)?;
        if session.expires_at <= Utc::now() {
            self.delete(jti).await?;
            return Err(Error::unauthorized("token_expired", "Session expired"));
        }
        Ok(session)
    }

    /// Persist the full session state and refresh its TTL
    pub async fn save(&self, session: &AdminSession) -> Result<()> {
        let key = keys::session(&session.jti);
        let store = self.storage.active();
        // Optional fields may have been cleared; rewrite the hash whole.
        store.delete(&key).await?;
        store.hset_all(&key, &session.to_fields()).await?;
        store.expire(&key, self.lifetime).await?;
        Ok(())
    }

    /// Remove a session
    pub async fn delete(&self, jti: &str) -> Result<()> {
        self.storage.active().delete(&keys::session(jti)).await?;
        Ok(())
    }

    /// All live sessions
    pub async fn all(&self) -> Result<Vec<AdminSession>> {
        let keys_found = self.storage.active().scan_prefix("session:").await?;
        let now = Utc::now();
        let mut sessions = Vec::new();
        for key in keys_found {
            let fields = self.storage.active().hget_all(&key).await?;
            if fields.is_empty() {
                continue;
            }
            match AdminSession::from_fields(&fields) {
                Ok(session) if session.expires_at > now => sessions.push(session),
                Ok(_) | Err(_) => {}
            }
        }
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        SessionStore::new(Storage::in_memory(), Duration::from_secs(3600), 3)
    }

    #[tokio::test]
    async fn test_create_get_roundtrip() {
        let sessions = store();
        let created = sessions
            .create("jti-1".into(), "admin".into(), "fp-hash".into())
            .await
            .unwrap();
        let loaded = sessions.get("jti-1").await.unwrap();
        assert_eq!(loaded, created);
        assert!(loaded.pin_hash.is_none());
    }

    #[tokio::test]
    async fn test_missing_session_is_invalid() {
        let sessions = store();
        let err = sessions.get("nope").await.unwrap_err();
        assert_eq!(err.code(), "token_invalid");
    }

    #[tokio::test]
    async fn test_save_clears_dropped_fields() {
        let sessions = store();
        let mut session = sessions
            .create("jti-2".into(), "admin".into(), "fp".into())
            .await
            .unwrap();
        session.pin_hash = Some("$argon2id$x".into());
        session.pin_verified_at = Some(Utc::now());
        sessions.save(&session).await.unwrap();

        session.pin_verified_at = None;
        sessions.save(&session).await.unwrap();
        let loaded = sessions.get("jti-2").await.unwrap();
        assert!(loaded.pin_hash.is_some());
        assert!(loaded.pin_verified_at.is_none());
    }

    #[tokio::test]
    async fn test_session_cap_evicts_oldest() {
        let sessions = store();
        for i in 0..3 {
            sessions
                .create(format!("jti-{i}"), "admin".into(), "fp".into())
                .await
                .unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        sessions
            .create("jti-new".into(), "admin".into(), "fp".into())
            .await
            .unwrap();

        assert!(sessions.get("jti-0").await.is_err());
        assert!(sessions.get("jti-new").await.is_ok());
    }
}

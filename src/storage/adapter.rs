//! Storage adapter: primary backend + in-process fallback
//!
//! Composes the Redis and in-memory backends behind one façade. When the
//! primary is unreachable the adapter latches into degraded mode and serves
//! from the in-process store with identical semantics (at the cost of
//! durability). The registration path is compensated: on partial failure
//! every key written so far is rolled back before the error is reported.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::Config;
use crate::error::{Error, Result};

use super::{keys, KvStore, MemoryStore, RedisStore};

const EVENT_FANOUT_CAPACITY: usize = 1024;

/// Which backend is serving requests
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Redis is configured and healthy
    Primary,
    /// Redis was configured but is unreachable; serving from memory
    Degraded,
    /// No Redis configured; in-memory deployment
    Memory,
}

/// Storage façade used by every component
#[derive(Clone)]
pub struct Storage {
    primary: Option<Arc<RedisStore>>,
    fallback: Arc<MemoryStore>,
    degraded: Arc<AtomicBool>,
    events_tx: broadcast::Sender<(String, String)>,
}

impl Storage {
    /// Connect according to configuration
    ///
    /// A configured-but-unreachable Redis does not fail startup; the adapter
    /// begins life degraded and logs the condition.
    pub async fn connect(config: &Config) -> Self {
        let fallback = Arc::new(MemoryStore::new());
        let (events_tx, _) = broadcast::channel(EVENT_FANOUT_CAPACITY);

        // Publishes against the fallback surface on the same fan-out channel
        // as primary pub/sub, so subscribers never care which backend served.
        spawn_memory_forwarder(&fallback, events_tx.clone());

        let (primary, degraded) = match &config.redis {
            Some(redis_config) => match RedisStore::connect(redis_config).await {
                Ok(store) => {
                    if let Err(e) =
                        store.spawn_event_forwarder(keys::EVENTS_CHANNEL, events_tx.clone())
                    {
                        tracing::warn!(error = %e, "Redis event forwarder unavailable");
                    }
                    (Some(Arc::new(store)), false)
                }
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        "Redis unreachable, starting in degraded mode (in-memory fallback)"
                    );
                    (None, true)
                }
            },
            None => (None, false),
        };

        Self {
            primary,
            fallback,
            degraded: Arc::new(AtomicBool::new(degraded)),
            events_tx,
        }
    }

    /// In-memory deployment, used by tests and dev without Redis
    #[must_use]
    pub fn in_memory() -> Self {
        let fallback = Arc::new(MemoryStore::new());
        let (events_tx, _) = broadcast::channel(EVENT_FANOUT_CAPACITY);
        spawn_memory_forwarder(&fallback, events_tx.clone());
        Self {
            primary: None,
            fallback,
            degraded: Arc::new(AtomicBool::new(false)),
            events_tx,
        }
    }

    /// Current serving mode
    #[must_use]
    pub fn mode(&self) -> StorageMode {
        match (&self.primary, self.degraded.load(Ordering::Relaxed)) {
            (Some(_), false) => StorageMode::Primary,
            (Some(_), true) => StorageMode::Degraded,
            (None, true) => StorageMode::Degraded,
            (None, false) => StorageMode::Memory,
        }
    }

    /// The backend currently serving requests
    #[must_use]
    pub fn active(&self) -> &dyn KvStore {
        match (&self.primary, self.degraded.load(Ordering::Relaxed)) {
            (Some(primary), false) => primary.as_ref(),
            _ => self.fallback.as_ref(),
        }
    }

    /// Mark the primary unusable; subsequent operations use the fallback.
    /// The latch is one-way within a process lifetime: recovering silently
    /// would resurface stale primary state alongside newer fallback state.
    pub fn mark_degraded(&self, reason: &str) {
        if !self.degraded.swap(true, Ordering::Relaxed) {
            tracing::error!(reason = %reason, "Storage degraded: switching to in-memory fallback");
        }
    }

    /// Subscribe to the cross-component event channel
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<(String, String)> {
        self.events_tx.subscribe()
    }

    /// Publish a payload on the shared events channel
    pub async fn publish_event(&self, payload: &str) -> Result<()> {
        self.active().publish(keys::EVENTS_CHANNEL, payload).await
    }

    /// Non-blocking health probe of the primary backend
    pub async fn probe(&self) -> StorageHealth {
        let mode = self.mode();
        let primary_ok = match &self.primary {
            Some(primary) => primary.ping().await.is_ok(),
            None => false,
        };
        StorageHealth { mode, primary_ok }
    }

    /// Atomic-looking registration write
    ///
    /// Claims the agent id, then writes the record, metrics, indexes, and
    /// embedding. On any failure after the claim, every key written so far
    /// is removed before the error is returned, so readers observe either
    /// the whole agent or none of it.
    #[allow(clippy::too_many_arguments)]
    pub async fn register_txn(
        &self,
        agent_id: &str,
        record_fields: &[(String, String)],
        metrics_fields: &[(String, String)],
        agent_type: &str,
        capabilities: &[String],
        embedding: Option<&[u8]>,
    ) -> Result<()> {
        let store = self.active();
        let record_key = keys::agent(agent_id);

        if !store.hset_nx(&record_key, "agent_id", agent_id).await? {
            return Err(Error::conflict(
                "duplicate_agent_id",
                format!("Agent '{agent_id}' is already registered"),
            ));
        }

        let write = async {
            store.hset_all(&record_key, record_fields).await?;
            store
                .hset_all(&keys::metrics(agent_id), metrics_fields)
                .await?;
            store
                .sadd(&keys::type_index(agent_type), agent_id)
                .await?;
            for capability in capabilities {
                store
                    .sadd(&keys::capability_index(capability), agent_id)
                    .await?;
            }
            if let Some(blob) = embedding {
                store.set(&keys::embedding(agent_id), blob).await?;
            }
            Ok::<(), Error>(())
        }
        .await;

        if let Err(e) = write {
            tracing::error!(
                agent_id = %agent_id,
                error = %e,
                "Registration write failed, rolling back"
            );
            self.remove_agent_keys(agent_id, agent_type, capabilities)
                .await;
            return Err(e);
        }

        Ok(())
    }

    /// Remove every key belonging to an agent; best-effort, logs failures
    pub async fn remove_agent_keys(
        &self,
        agent_id: &str,
        agent_type: &str,
        capabilities: &[String],
    ) {
        let store = self.active();
        for key in [
            keys::agent(agent_id),
            keys::metrics(agent_id),
            keys::embedding(agent_id),
        ] {
            if let Err(e) = store.delete(&key).await {
                tracing::warn!(key = %key, error = %e, "Cleanup delete failed");
            }
        }
        if let Err(e) = store.srem(&keys::type_index(agent_type), agent_id).await {
            tracing::warn!(error = %e, "Cleanup type index removal failed");
        }
        for capability in capabilities {
            if let Err(e) = store
                .srem(&keys::capability_index(capability), agent_id)
                .await
            {
                tracing::warn!(error = %e, "Cleanup capability index removal failed");
            }
        }
    }
}

/// Result of [`Storage::probe`]
#[derive(Debug, Clone, serde::Serialize)]
pub struct StorageHealth {
    pub mode: StorageMode,
    pub primary_ok: bool,
}

fn spawn_memory_forwarder(store: &Arc<MemoryStore>, tx: broadcast::Sender<(String, String)>) {
    let mut rx = store.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(pair) => {
                    let _ = tx.send(pair);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Event forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_in_memory_mode() {
        let storage = Storage::in_memory();
        assert_eq!(storage.mode(), StorageMode::Memory);
        assert!(!storage.probe().await.primary_ok);
    }

    #[tokio::test]
    async fn test_register_txn_visible_atomically() {
        let storage = Storage::in_memory();
        storage
            .register_txn(
                "echo-1",
                &fields(&[("agent_type", "testing"), ("name", "Echo")]),
                &fields(&[("total_requests", "0")]),
                "testing",
                &["echo".to_string()],
                Some(&[0u8; 8]),
            )
            .await
            .unwrap();

        let store = storage.active();
        let record = store.hget_all(&keys::agent("echo-1")).await.unwrap();
        assert_eq!(record.get("agent_id"), Some(&"echo-1".to_string()));
        assert_eq!(
            store.smembers(&keys::type_index("testing")).await.unwrap(),
            vec!["echo-1"]
        );
        assert_eq!(
            store
                .smembers(&keys::capability_index("echo"))
                .await
                .unwrap(),
            vec!["echo-1"]
        );
        assert!(store.get(&keys::embedding("echo-1")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_register_txn_duplicate_rejected() {
        let storage = Storage::in_memory();
        let record = fields(&[("agent_type", "testing")]);
        let metrics = fields(&[("total_requests", "0")]);
        storage
            .register_txn("dup", &record, &metrics, "testing", &[], None)
            .await
            .unwrap();

        let err = storage
            .register_txn("dup", &record, &metrics, "testing", &[], None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "duplicate_agent_id");

        // The original record is untouched
        let stored = storage.active().hget_all(&keys::agent("dup")).await.unwrap();
        assert_eq!(stored.get("agent_type"), Some(&"testing".to_string()));
    }

    #[tokio::test]
    async fn test_remove_agent_keys_clears_indexes() {
        let storage = Storage::in_memory();
        let caps = vec!["echo".to_string(), "analysis".to_string()];
        storage
            .register_txn(
                "gone",
                &fields(&[("agent_type", "testing")]),
                &fields(&[("total_requests", "0")]),
                "testing",
                &caps,
                None,
            )
            .await
            .unwrap();

        storage.remove_agent_keys("gone", "testing", &caps).await;

        let store = storage.active();
        assert!(store.hget_all(&keys::agent("gone")).await.unwrap().is_empty());
        assert!(store
            .smembers(&keys::type_index("testing"))
            .await
            .unwrap()
            .is_empty());
        assert!(store
            .smembers(&keys::capability_index("analysis"))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_degraded_latch() {
        let storage = Storage::in_memory();
        storage.mark_degraded("test");
        assert_eq!(storage.mode(), StorageMode::Degraded);
    }

    #[tokio::test]
    async fn test_publish_event_fans_out() {
        let storage = Storage::in_memory();
        let mut rx = storage.subscribe_events();
        storage.publish_event("{\"type\":\"registered\"}").await.unwrap();
        let (channel, payload) = rx.recv().await.unwrap();
        assert_eq!(channel, keys::EVENTS_CHANNEL);
        assert!(payload.contains("registered"));
    }
}

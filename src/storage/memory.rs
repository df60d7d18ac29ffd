//! In-process storage backend
//!
//! Mirrors the Redis backend's observable semantics (including TTLs and
//! capped lists) at the cost of durability. Used directly in dev and tests,
//! and as the degraded-mode fallback when Redis is unreachable.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use crate::error::Result;

use super::KvStore;

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Default)]
struct Tables {
    blobs: HashMap<String, Vec<u8>>,
    hashes: HashMap<String, HashMap<String, String>>,
    sets: HashMap<String, HashSet<String>>,
    zsets: HashMap<String, Vec<(f64, String)>>,
    lists: HashMap<String, VecDeque<String>>,
    deadlines: HashMap<String, Instant>,
}

impl Tables {
    fn remove_key(&mut self, key: &str) -> bool {
        let existed = self.blobs.remove(key).is_some()
            | self.hashes.remove(key).is_some()
            | self.sets.remove(key).is_some()
            | self.zsets.remove(key).is_some()
            | self.lists.remove(key).is_some();
        self.deadlines.remove(key);
        existed
    }

    /// Drop the key if its TTL has passed
    fn purge_if_expired(&mut self, key: &str) {
        let expired = self
            .deadlines
            .get(key)
            .is_some_and(|deadline| *deadline <= Instant::now());
        if expired {
            self.remove_key(key);
        }
    }

    fn live_keys(&self) -> Vec<String> {
        let now = Instant::now();
        self.blobs
            .keys()
            .chain(self.hashes.keys())
            .chain(self.sets.keys())
            .chain(self.zsets.keys())
            .chain(self.lists.keys())
            .filter(|k| match self.deadlines.get(*k) {
                Some(deadline) => *deadline > now,
                None => true,
            })
            .cloned()
            .collect()
    }
}

/// In-memory [`KvStore`] backed by `tokio::sync::RwLock` tables
pub struct MemoryStore {
    tables: RwLock<Tables>,
    events: broadcast::Sender<(String, String)>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tables: RwLock::new(Tables::default()),
            events,
        }
    }

    /// Subscribe to the in-process pub/sub channel
    ///
    /// Receives `(channel, payload)` pairs for every [`KvStore::publish`].
    pub fn subscribe(&self) -> broadcast::Receiver<(String, String)> {
        self.events.subscribe()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut tables = self.tables.write().await;
        tables.purge_if_expired(key);
        Ok(tables.blobs.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.deadlines.remove(key);
        tables.blobs.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.blobs.insert(key.to_string(), value.to_vec());
        tables
            .deadlines
            .insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn get_del(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut tables = self.tables.write().await;
        tables.purge_if_expired(key);
        let value = tables.blobs.remove(key);
        tables.deadlines.remove(key);
        Ok(value)
    }

    async fn incr_ex(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut tables = self.tables.write().await;
        tables.purge_if_expired(key);
        let tables = &mut *tables;
        let fresh = !tables.blobs.contains_key(key);
        let slot = tables
            .blobs
            .entry(key.to_string())
            .or_insert_with(|| b"0".to_vec());
        let current: u64 = std::str::from_utf8(slot)
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let next = current + 1;
        *slot = next.to_string().into_bytes();
        if fresh {
            tables
                .deadlines
                .insert(key.to_string(), Instant::now() + ttl);
        }
        Ok(next)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        tables.purge_if_expired(key);
        Ok(tables.remove_key(key))
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        tables.purge_if_expired(key);
        let hash = tables.hashes.entry(key.to_string()).or_default();
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.purge_if_expired(key);
        tables
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.purge_if_expired(key);
        let hash = tables.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut tables = self.tables.write().await;
        tables.purge_if_expired(key);
        Ok(tables
            .hashes
            .get(key)
            .and_then(|hash| hash.get(field).cloned()))
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.purge_if_expired(key);
        if let Some(hash) = tables.hashes.get_mut(key) {
            hash.remove(field);
        }
        Ok(())
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut tables = self.tables.write().await;
        tables.purge_if_expired(key);
        Ok(tables.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.purge_if_expired(key);
        tables
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.purge_if_expired(key);
        let now_empty = match tables.sets.get_mut(key) {
            Some(set) => {
                set.remove(member);
                set.is_empty()
            }
            None => false,
        };
        if now_empty {
            tables.sets.remove(key);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut tables = self.tables.write().await;
        tables.purge_if_expired(key);
        Ok(tables
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let tables = self.tables.read().await;
        Ok(tables
            .live_keys()
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.purge_if_expired(key);
        let zset = tables.zsets.entry(key.to_string()).or_default();
        zset.retain(|(_, m)| m != member);
        zset.push((score, member.to_string()));
        Ok(())
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let mut tables = self.tables.write().await;
        tables.purge_if_expired(key);
        Ok(tables
            .zsets
            .get(key)
            .map(|zset| {
                zset.iter()
                    .filter(|(score, _)| *score >= min && *score <= max)
                    .count() as u64
            })
            .unwrap_or(0))
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.purge_if_expired(key);
        if let Some(zset) = tables.zsets.get_mut(key) {
            zset.retain(|(score, _)| *score < min || *score > max);
        }
        Ok(())
    }

    async fn lpush_capped(&self, key: &str, value: &str, cap: usize) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.purge_if_expired(key);
        let list = tables.lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        list.truncate(cap);
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut tables = self.tables.write().await;
        tables.purge_if_expired(key);
        let Some(list) = tables.lists.get(key) else {
            return Ok(Vec::new());
        };
        let len = list.len() as isize;
        let norm = |i: isize| -> usize {
            if i < 0 {
                (len + i).max(0) as usize
            } else {
                i.min(len) as usize
            }
        };
        let (start, stop) = (norm(start), norm(stop));
        if start > stop {
            return Ok(Vec::new());
        }
        Ok(list
            .iter()
            .skip(start)
            .take(stop - start + 1)
            .cloned()
            .collect())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .deadlines
            .insert(key.to_string(), Instant::now() + ttl);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        // Send fails only when nobody is subscribed, which is fine.
        let _ = self
            .events
            .send((channel.to_string(), payload.to_string()));
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::keys;

    #[tokio::test]
    async fn test_blob_roundtrip() {
        let store = MemoryStore::new();
        store.set("k", b"v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(store.delete("k").await.unwrap());
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_get_del_is_single_use() {
        let store = MemoryStore::new();
        store.set("token", b"once").await.unwrap();
        assert_eq!(store.get_del("token").await.unwrap(), Some(b"once".to_vec()));
        assert_eq!(store.get_del("token").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set_ex("k", b"v", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incr_ex_counts_and_expires() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_ex("c", Duration::from_millis(10)).await.unwrap(), 1);
        assert_eq!(store.incr_ex("c", Duration::from_millis(10)).await.unwrap(), 2);
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(store.incr_ex("c", Duration::from_millis(10)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_hset_nx_claims_once() {
        let store = MemoryStore::new();
        assert!(store.hset_nx("agent:a", "agent_id", "a").await.unwrap());
        assert!(!store.hset_nx("agent:a", "agent_id", "a").await.unwrap());
    }

    #[tokio::test]
    async fn test_hash_fields() {
        let store = MemoryStore::new();
        store
            .hset_all(
                "h",
                &[("a".into(), "1".into()), ("b".into(), "2".into())],
            )
            .await
            .unwrap();
        assert_eq!(store.hget("h", "a").await.unwrap(), Some("1".into()));
        store.hdel("h", "a").await.unwrap();
        let all = store.hget_all("h").await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all.get("b"), Some(&"2".to_string()));
    }

    #[tokio::test]
    async fn test_set_membership() {
        let store = MemoryStore::new();
        let key = keys::type_index("testing");
        store.sadd(&key, "a").await.unwrap();
        store.sadd(&key, "b").await.unwrap();
        store.sadd(&key, "a").await.unwrap();
        let mut members = store.smembers(&key).await.unwrap();
        members.sort();
        assert_eq!(members, vec!["a", "b"]);
        store.srem(&key, "a").await.unwrap();
        assert_eq!(store.smembers(&key).await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_scan_prefix() {
        let store = MemoryStore::new();
        store.set("agent:a", b"1").await.unwrap();
        store.set("agent:b", b"1").await.unwrap();
        store.set("metrics:a", b"1").await.unwrap();
        let mut keys = store.scan_prefix("agent:").await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["agent:a", "agent:b"]);
    }

    #[tokio::test]
    async fn test_zset_window() {
        let store = MemoryStore::new();
        store.zadd("w", 10.0, "a").await.unwrap();
        store.zadd("w", 20.0, "b").await.unwrap();
        store.zadd("w", 30.0, "c").await.unwrap();
        assert_eq!(store.zcount("w", 15.0, 35.0).await.unwrap(), 2);
        store.zremrangebyscore("w", 0.0, 20.0).await.unwrap();
        assert_eq!(store.zcount("w", 0.0, 100.0).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_capped_list_keeps_newest() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .lpush_capped("l", &format!("m{i}"), 3)
                .await
                .unwrap();
        }
        let items = store.lrange("l", 0, -1).await.unwrap();
        assert_eq!(items, vec!["m4", "m3", "m2"]);
    }

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();
        store.publish("arcp:events", "{\"type\":\"x\"}").await.unwrap();
        let (channel, payload) = rx.recv().await.unwrap();
        assert_eq!(channel, "arcp:events");
        assert!(payload.contains("\"x\""));
    }
}

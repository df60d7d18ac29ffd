//! Storage port and backends
//!
//! The registry, auth core, and monitors persist through the [`KvStore`]
//! trait: string-keyed blobs, hashes, sets, sorted sets (sliding windows),
//! capped lists, and an optional pub/sub channel. Two backends implement
//! identical observable semantics: Redis (durable, cross-process) and an
//! in-process store (fallback). The [`Storage`] adapter composes them and
//! carries the degraded-mode flag.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

mod adapter;
pub mod keys;
mod memory;
mod redis_store;

pub use adapter::{Storage, StorageHealth, StorageMode};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Key/hash/set store with optional pub/sub
///
/// All operations are atomic per key. Multi-key sequences are composed by
/// the [`Storage`] adapter, which compensates on partial failure.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch a blob
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store a blob
    async fn set(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Store a blob with a time-to-live
    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    /// Atomically fetch and delete a blob; the backbone of single-use tokens
    async fn get_del(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Atomically increment a counter, setting `ttl` when the key is created;
    /// returns the new value. Used by fixed-window rate limiting.
    async fn incr_ex(&self, key: &str, ttl: Duration) -> Result<u64>;

    /// Delete a key of any kind; returns whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Set a hash field only if it does not exist; returns whether it was set
    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool>;

    /// Set a single hash field
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Set many hash fields at once
    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// Fetch a single hash field
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Delete a hash field
    async fn hdel(&self, key: &str, field: &str) -> Result<()>;

    /// Fetch all fields of a hash; empty map when the key is absent
    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Add a member to a set
    async fn sadd(&self, key: &str, member: &str) -> Result<()>;

    /// Remove a member from a set
    async fn srem(&self, key: &str, member: &str) -> Result<()>;

    /// All members of a set; empty when absent
    async fn smembers(&self, key: &str) -> Result<Vec<String>>;

    /// Keys matching `prefix*`
    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// Add a scored member to a sorted set
    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()>;

    /// Count members with score in `[min, max]`
    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64>;

    /// Remove members with score in `[min, max]`
    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<()>;

    /// Push to the head of a list, trimming to `cap` newest entries
    async fn lpush_capped(&self, key: &str, value: &str, cap: usize) -> Result<()>;

    /// Inclusive range from a list (0 is newest after `lpush_capped`)
    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>>;

    /// Set a time-to-live on an existing key
    async fn expire(&self, key: &str, ttl: Duration) -> Result<()>;

    /// Publish a payload on a channel; no-op when pub/sub is unsupported
    async fn publish(&self, channel: &str, payload: &str) -> Result<()>;

    /// Non-blocking health probe
    async fn ping(&self) -> Result<()>;
}

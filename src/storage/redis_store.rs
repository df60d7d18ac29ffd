//! Redis storage backend
//!
//! Pooled via deadpool with exponential-backoff connection retries at
//! startup. Every operation maps 1:1 onto a Redis command so the in-memory
//! backend can mirror the semantics exactly.

use std::collections::HashMap;
use std::ops::DerefMut;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{redis::AsyncCommands, Config as DeadpoolConfig, Pool, Runtime};
use futures::StreamExt;
use tokio::sync::broadcast;

use crate::config::RedisConfig;
use crate::error::{Error, Result};

use super::KvStore;

/// Redis-backed [`KvStore`]
pub struct RedisStore {
    pool: Pool,
    url: String,
}

impl RedisStore {
    /// Connect with retry; fails after `config.max_retries` attempts
    pub async fn connect(config: &RedisConfig) -> Result<Self> {
        let pool = create_pool_with_retries(config).await?;
        Ok(Self {
            pool,
            url: config.url.clone(),
        })
    }

    async fn conn(&self) -> Result<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| Error::Storage(format!("Failed to get Redis connection: {e}")))
    }

    /// Spawn a task that forwards pub/sub messages on `channel` into `tx`
    ///
    /// Uses a dedicated connection; the pool is multiplexed and cannot block
    /// on a subscription. The task ends when every receiver is dropped.
    pub fn spawn_event_forwarder(
        &self,
        channel: &str,
        tx: broadcast::Sender<(String, String)>,
    ) -> Result<()> {
        let client = redis::Client::open(self.url.as_str())
            .map_err(|e| Error::Storage(format!("Invalid Redis URL: {e}")))?;
        let channel = channel.to_string();

        tokio::spawn(async move {
            let mut pubsub = match client.get_async_pubsub().await {
                Ok(pubsub) => pubsub,
                Err(e) => {
                    tracing::warn!(error = %e, "Redis pub/sub connection failed");
                    return;
                }
            };
            if let Err(e) = pubsub.subscribe(&channel).await {
                tracing::warn!(error = %e, channel = %channel, "Redis subscribe failed");
                return;
            }
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::debug!(error = %e, "Dropping undecodable pub/sub payload");
                        continue;
                    }
                };
                if tx.send((channel.clone(), payload)).is_err() {
                    break;
                }
            }
            tracing::debug!(channel = %channel, "Redis event forwarder stopped");
        });

        Ok(())
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn get_del(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn().await?;
        let value: Option<Vec<u8>> = redis::cmd("GETDEL")
            .arg(key)
            .query_async(conn.deref_mut())
            .await?;
        Ok(value)
    }

    async fn incr_ex(&self, key: &str, ttl: Duration) -> Result<u64> {
        let mut conn = self.conn().await?;
        let value: u64 = conn.incr(key, 1).await?;
        if value == 1 {
            conn.expire::<_, ()>(key, ttl.as_secs().max(1) as i64)
                .await?;
        }
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        let removed: u64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn hset_nx(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn().await?;
        Ok(conn.hset_nx::<_, _, _, bool>(key, field, value).await?)
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.hset::<_, _, _, ()>(key, field, value).await?;
        Ok(())
    }

    async fn hset_all(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn().await?;
        conn.hset_multiple::<_, _, _, ()>(key, fields).await?;
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.hget::<_, _, Option<String>>(key, field).await?)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.hdel::<_, _, ()>(key, field).await?;
        Ok(())
    }

    async fn hget_all(&self, key: &str) -> Result<HashMap<String, String>> {
        let mut conn = self.conn().await?;
        Ok(conn.hgetall::<_, HashMap<String, String>>(key).await?)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.sadd::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.srem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.smembers::<_, Vec<String>>(key).await?)
    }

    async fn scan_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn
            .keys::<_, Vec<String>>(format!("{prefix}*"))
            .await?)
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.zadd::<_, _, _, ()>(key, member, score).await?;
        Ok(())
    }

    async fn zcount(&self, key: &str, min: f64, max: f64) -> Result<u64> {
        let mut conn = self.conn().await?;
        Ok(conn.zcount::<_, _, _, u64>(key, min, max).await?)
    }

    async fn zremrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.zrembyscore::<_, _, _, ()>(key, min, max).await?;
        Ok(())
    }

    async fn lpush_capped(&self, key: &str, value: &str, cap: usize) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.lpush::<_, _, ()>(key, value).await?;
        conn.ltrim::<_, ()>(key, 0, cap as isize - 1).await?;
        Ok(())
    }

    async fn lrange(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>> {
        let mut conn = self.conn().await?;
        Ok(conn.lrange::<_, Vec<String>>(key, start, stop).await?)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.expire::<_, ()>(key, ttl.as_secs().max(1) as i64)
            .await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        let mut conn = self.conn().await?;
        conn.publish::<_, _, ()>(channel, payload).await?;
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(conn.deref_mut())
            .await?;
        Ok(())
    }
}

/// Create a Redis connection pool with exponential-backoff retries
async fn create_pool_with_retries(config: &RedisConfig) -> Result<Pool> {
    let mut attempt = 0;
    let base_delay = Duration::from_secs(config.retry_delay_secs);

    loop {
        match try_create_pool(config).await {
            Ok(pool) => {
                tracing::info!(
                    max_connections = config.max_connections,
                    "Redis connection pool created"
                );
                return Ok(pool);
            }
            Err(e) => {
                attempt += 1;
                if attempt > config.max_retries {
                    tracing::error!(
                        attempts = attempt,
                        error = %e,
                        "Failed to connect to Redis"
                    );
                    return Err(e);
                }
                let delay = base_delay * 2_u32.pow(attempt.saturating_sub(1));
                tracing::warn!(
                    attempt,
                    error = %e,
                    "Redis connection failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn try_create_pool(config: &RedisConfig) -> Result<Pool> {
    let cfg = DeadpoolConfig::from_url(&config.url);
    let pool = cfg
        .builder()
        .map_err(|e| Error::Storage(format!("Failed to build Redis pool: {e}")))?
        .max_size(config.max_connections)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| Error::Storage(format!("Failed to create Redis pool: {e}")))?;

    // Probe the connection before declaring the pool usable
    let mut conn = pool
        .get()
        .await
        .map_err(|e| Error::Storage(format!("Failed to get Redis connection: {e}")))?;
    redis::cmd("PING")
        .query_async::<String>(conn.deref_mut())
        .await?;
    drop(conn);

    Ok(pool)
}

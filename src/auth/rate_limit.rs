//! Request rate limiting
//!
//! Fixed-window RPM for coarse throttling combined with a token bucket for
//! burst shaping. Both live in storage so limits hold across processes when
//! Redis is primary.

use chrono::Utc;
use std::time::Duration;

use crate::config::RateLimitConfig;
use crate::error::{Error, Result};
use crate::storage::{keys, Storage};

const WINDOW_SECS: u64 = 60;

/// Combined fixed-window + token-bucket limiter
#[derive(Clone)]
pub struct RateLimiter {
    storage: Storage,
    config: RateLimitConfig,
}

impl RateLimiter {
    /// Limiter with the configured RPM and burst size
    #[must_use]
    pub fn new(storage: Storage, config: RateLimitConfig) -> Self {
        Self { storage, config }
    }

    /// Admit or reject one request for `principal`
    ///
    /// Returns `Error::RateLimited` with a `retry_after` when either the
    /// window or the bucket is exhausted.
    pub async fn acquire(&self, principal: &str) -> Result<()> {
        let store = self.storage.active();
        let now = Utc::now().timestamp();

        // Coarse fixed window
        let window = now as u64 / WINDOW_SECS;
        let count = store
            .incr_ex(
                &keys::rate_window(principal, window),
                Duration::from_secs(WINDOW_SECS * 2),
            )
            .await?;
        if count > u64::from(self.config.rpm) {
            let retry_after_secs = WINDOW_SECS - (now as u64 % WINDOW_SECS);
            return Err(Error::RateLimited { retry_after_secs });
        }

        // Burst-shaping token bucket
        let bucket_key = keys::rate_bucket(principal);
        let state = store.hget_all(&bucket_key).await?;
        let burst = f64::from(self.config.burst.max(1));
        let refill_per_sec = f64::from(self.config.rpm) / WINDOW_SECS as f64;

        let mut tokens: f64 = state
            .get("tokens")
            .and_then(|v| v.parse().ok())
            .unwrap_or(burst);
        let last_refill: i64 = state
            .get("last_refill")
            .and_then(|v| v.parse().ok())
            .unwrap_or(now);

        let elapsed = (now - last_refill).max(0) as f64;
        tokens = (tokens + elapsed * refill_per_sec).min(burst);

        if tokens < 1.0 {
            let deficit = 1.0 - tokens;
            let retry_after_secs = (deficit / refill_per_sec).ceil().max(1.0) as u64;
            return Err(Error::RateLimited { retry_after_secs });
        }

        tokens -= 1.0;
        store
            .hset_all(
                &bucket_key,
                &[
                    ("tokens".to_string(), tokens.to_string()),
                    ("last_refill".to_string(), now.to_string()),
                ],
            )
            .await?;
        store
            .expire(&bucket_key, Duration::from_secs(WINDOW_SECS * 5))
            .await?;
        Ok(())
    }
}

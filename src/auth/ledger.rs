//! Login attempt ledger
//!
//! Tracks failed attempts per principal (and per source IP) in a sliding
//! window, derives the next allowed delay via exponential backoff with
//! jitter, and locks the principal out after repeated failures.

use chrono::Utc;
use rand::Rng;
use std::time::Duration;

use crate::config::RateLimitConfig;
use crate::error::Result;
use crate::storage::{keys, Storage};

/// Outcome of a ledger consultation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptStatus {
    /// A lockout window is in effect
    pub locked: bool,
    /// Seconds until the caller may try again (0 when allowed now)
    pub retry_after_secs: u64,
    /// Consecutive failures on record
    pub failures: u32,
}

impl AttemptStatus {
    /// Whether an attempt is allowed right now
    #[must_use]
    pub fn allowed(&self) -> bool {
        self.retry_after_secs == 0
    }
}

/// Sliding-window attempt ledger over the storage adapter
#[derive(Clone)]
pub struct LoginAttemptLedger {
    storage: Storage,
    config: RateLimitConfig,
}

impl LoginAttemptLedger {
    /// Ledger with the configured backoff/lockout tuning
    #[must_use]
    pub fn new(storage: Storage, config: RateLimitConfig) -> Self {
        Self { storage, config }
    }

    /// Check whether `principal` may attempt now, without recording anything
    pub async fn check(&self, principal: &str) -> Result<AttemptStatus> {
        let store = self.storage.active();
        let state = store.hget_all(&keys::attempt_state(principal)).await?;
        let now = Utc::now().timestamp();

        let failures: u32 = state
            .get("failures")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if let Some(locked_until) = state.get("locked_until").and_then(|v| v.parse::<i64>().ok()) {
            if locked_until > now {
                return Ok(AttemptStatus {
                    locked: true,
                    retry_after_secs: (locked_until - now) as u64,
                    failures,
                });
            }
        }

        if failures > 0 {
            if let Some(last_failure) =
                state.get("last_failure").and_then(|v| v.parse::<i64>().ok())
            {
                let next_allowed = last_failure + self.delay_secs(failures) as i64;
                if next_allowed > now {
                    return Ok(AttemptStatus {
                        locked: false,
                        retry_after_secs: (next_allowed - now) as u64,
                        failures,
                    });
                }
            }
        }

        Ok(AttemptStatus {
            locked: false,
            retry_after_secs: 0,
            failures,
        })
    }

    /// Record a failed attempt; returns the status the caller should report
    pub async fn record_failure(&self, principal: &str) -> Result<AttemptStatus> {
        let store = self.storage.active();
        let now = Utc::now().timestamp();
        let window = self.config.attempt_window_secs as i64;

        // Sliding window of raw attempt timestamps
        let attempts_key = keys::attempts(principal);
        store
            .zremrangebyscore(&attempts_key, 0.0, (now - window) as f64)
            .await?;
        store
            .zadd(&attempts_key, now as f64, &format!("{now}-{}", rand_suffix()))
            .await?;
        store
            .expire(&attempts_key, Duration::from_secs(self.config.attempt_window_secs))
            .await?;

        let state_key = keys::attempt_state(principal);
        let failures: u32 = store
            .hget(&state_key, "failures")
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
            + 1;

        let mut fields = vec![
            ("failures".to_string(), failures.to_string()),
            ("last_failure".to_string(), now.to_string()),
        ];

        let locked = failures >= self.config.lockout_threshold;
        if locked {
            let locked_until = now + self.config.lockout_secs as i64;
            fields.push(("locked_until".to_string(), locked_until.to_string()));
            tracing::warn!(
                principal = %principal,
                failures,
                lockout_secs = self.config.lockout_secs,
                "Lockout window started"
            );
        }

        store.hset_all(&state_key, &fields).await?;
        store
            .expire(
                &state_key,
                Duration::from_secs(self.config.attempt_window_secs.max(self.config.lockout_secs)),
            )
            .await?;

        Ok(AttemptStatus {
            locked,
            retry_after_secs: if locked {
                self.config.lockout_secs
            } else {
                self.delay_secs(failures)
            },
            failures,
        })
    }

    /// Clear the ledger after a successful attempt
    pub async fn record_success(&self, principal: &str) -> Result<()> {
        let store = self.storage.active();
        store.delete(&keys::attempt_state(principal)).await?;
        store.delete(&keys::attempts(principal)).await?;
        Ok(())
    }

    /// Attempts on record inside the sliding window
    pub async fn window_count(&self, principal: &str) -> Result<u64> {
        let now = Utc::now().timestamp();
        let window = self.config.attempt_window_secs as i64;
        self.storage
            .active()
            .zcount(
                &keys::attempts(principal),
                (now - window) as f64,
                now as f64,
            )
            .await
    }

    /// `min(base · 2^(n-1), cap)` plus up to one second of jitter
    fn delay_secs(&self, failures: u32) -> u64 {
        let exponent = failures.saturating_sub(1).min(32);
        let base = self
            .config
            .backoff_base_secs
            .saturating_mul(1u64 << exponent)
            .min(self.config.backoff_cap_secs);
        base + rand::rng().random_range(0..=1)
    }
}

fn rand_suffix() -> u32 {
    rand::rng().random()
}

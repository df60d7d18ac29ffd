//! Bounded log ring buffer streamed to the dashboard hub

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

const DEFAULT_CAPACITY: usize = 10_000;
const MAX_MESSAGE_CHARS: usize = 2_000;

/// Log severity as rendered on the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    #[serde(rename = "DEBUG")]
    Debug,
    #[serde(rename = "INFO")]
    Info,
    /// Success outcome, distinct from plain info on the dashboard
    #[serde(rename = "SUCS")]
    Success,
    #[serde(rename = "WARN")]
    Warn,
    #[serde(rename = "ERR")]
    Error,
    #[serde(rename = "CRIT")]
    Critical,
}

/// One dashboard log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub source: String,
}

/// Ring buffer of the most recent log entries
///
/// Messages longer than the per-message cap are truncated on insert. With a
/// storage handle attached, entries are also written behind to the capped
/// `logs` list.
pub struct LogBuffer {
    entries: RwLock<VecDeque<LogEntry>>,
    capacity: usize,
    storage: Option<crate::storage::Storage>,
}

impl LogBuffer {
    /// Buffer holding at most `capacity` entries
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            storage: None,
        }
    }

    /// Attach a storage handle for write-behind persistence
    #[must_use]
    pub fn persisted(mut self, storage: crate::storage::Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Append an entry, evicting the oldest when full
    pub async fn push(&self, level: LogLevel, source: impl Into<String>, message: impl Into<String>) {
        let mut message = message.into();
        if message.chars().count() > MAX_MESSAGE_CHARS {
            message = message.chars().take(MAX_MESSAGE_CHARS).collect();
        }
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            message,
            source: source.into(),
        };
        {
            let mut entries = self.entries.write().await;
            if entries.len() == self.capacity {
                entries.pop_front();
            }
            entries.push_back(entry.clone());
        }

        if let Some(storage) = &self.storage {
            if let Ok(payload) = serde_json::to_string(&entry) {
                if let Err(e) = storage
                    .active()
                    .lpush_capped(crate::storage::keys::LOGS_KEY, &payload, self.capacity)
                    .await
                {
                    tracing::debug!(error = %e, "Log write-behind failed");
                }
            }
        }
    }

    /// The newest `n` entries, newest first
    pub async fn tail(&self, n: usize) -> Vec<LogEntry> {
        let entries = self.entries.read().await;
        entries.iter().rev().take(n).cloned().collect()
    }

    /// Number of buffered entries
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the buffer is empty
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Drop all entries
    pub async fn clear(&self) {
        self.entries.write().await.clear();
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.active().delete(crate::storage::keys::LOGS_KEY).await {
                tracing::debug!(error = %e, "Log list clear failed");
            }
        }
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

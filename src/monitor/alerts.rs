//! Bounded alert ring with duplicate suppression

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 500;
const DEFAULT_SUPPRESSION_SECS: i64 = 300;

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
}

/// One alert as streamed to the dashboard
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    /// Alert kind, e.g. `agent_dead`, `slow_consumer`, `sweeper_failing`
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl Alert {
    /// Build an alert stamped with the current time
    #[must_use]
    pub fn new(
        kind: impl Into<String>,
        severity: AlertSeverity,
        title: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            severity,
            title: title.into(),
            message: message.into(),
            timestamp: Utc::now(),
            source: source.into(),
        }
    }

    /// Key used for duplicate suppression: kind plus source
    #[must_use]
    pub fn suppression_key(&self) -> String {
        format!("{}:{}", self.kind, self.source)
    }
}

struct Inner {
    alerts: VecDeque<Alert>,
    last_emitted: HashMap<String, DateTime<Utc>>,
}

/// Ring of the most recent alerts, newest first
///
/// An alert whose suppression key fired within its window is dropped.
/// Windows are per alert kind; unknown kinds use the default.
/// With a storage handle attached, admitted alerts are also written behind
/// to the capped `alerts` list so other processes can read them.
pub struct AlertLog {
    inner: RwLock<Inner>,
    capacity: usize,
    windows: HashMap<String, Duration>,
    storage: Option<crate::storage::Storage>,
}

impl AlertLog {
    /// Ring holding at most `capacity` alerts
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let mut windows = HashMap::new();
        // Liveness flapping is noisy; give it a longer window than one sweep.
        windows.insert("agent_dead".to_string(), Duration::seconds(600));
        windows.insert("slow_consumer".to_string(), Duration::seconds(60));
        Self {
            inner: RwLock::new(Inner {
                alerts: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
                last_emitted: HashMap::new(),
            }),
            capacity,
            windows,
            storage: None,
        }
    }

    /// Attach a storage handle for write-behind persistence
    #[must_use]
    pub fn persisted(mut self, storage: crate::storage::Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    fn window_for(&self, kind: &str) -> Duration {
        self.windows
            .get(kind)
            .copied()
            .unwrap_or_else(|| Duration::seconds(DEFAULT_SUPPRESSION_SECS))
    }

    /// Record an alert unless a duplicate fired within its window
    ///
    /// Returns the alert when it was admitted, so callers can fan it out.
    pub async fn push(&self, alert: Alert) -> Option<Alert> {
        let key = alert.suppression_key();
        let window = self.window_for(&alert.kind);
        let mut inner = self.inner.write().await;

        if let Some(last) = inner.last_emitted.get(&key) {
            if alert.timestamp - *last < window {
                return None;
            }
        }

        inner.last_emitted.insert(key, alert.timestamp);
        if inner.alerts.len() == self.capacity {
            inner.alerts.pop_back();
        }
        inner.alerts.push_front(alert.clone());
        drop(inner);

        if let Some(storage) = &self.storage {
            if let Ok(payload) = serde_json::to_string(&alert) {
                if let Err(e) = storage
                    .active()
                    .lpush_capped(crate::storage::keys::ALERTS_KEY, &payload, self.capacity)
                    .await
                {
                    tracing::debug!(error = %e, "Alert write-behind failed");
                }
            }
        }
        Some(alert)
    }

    /// The newest `n` alerts, newest first
    pub async fn recent(&self, n: usize) -> Vec<Alert> {
        let inner = self.inner.read().await;
        inner.alerts.iter().take(n).cloned().collect()
    }

    /// Number of buffered alerts
    pub async fn len(&self) -> usize {
        self.inner.read().await.alerts.len()
    }

    /// Whether the ring is empty
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.alerts.is_empty()
    }

    /// Drop all alerts; suppression state survives so cleared duplicates do
    /// not immediately reappear
    pub async fn clear(&self) {
        self.inner.write().await.alerts.clear();
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.active().delete(crate::storage::keys::ALERTS_KEY).await {
                tracing::debug!(error = %e, "Alert list clear failed");
            }
        }
    }
}

impl Default for AlertLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alert(kind: &str, source: &str) -> Alert {
        Alert::new(kind, AlertSeverity::Warning, "t", "m", source)
    }

    #[tokio::test]
    async fn test_newest_first() {
        let log = AlertLog::default();
        let _ = log.push(alert("a", "s1")).await;
        let _ = log.push(alert("b", "s2")).await;
        let recent = log.recent(10).await;
        assert_eq!(recent[0].kind, "b");
        assert_eq!(recent[1].kind, "a");
    }

    #[tokio::test]
    async fn test_duplicate_suppressed_within_window() {
        let log = AlertLog::default();
        assert!(log.push(alert("agent_dead", "echo-1")).await.is_some());
        assert!(log.push(alert("agent_dead", "echo-1")).await.is_none());
        // A different source is not a duplicate
        assert!(log.push(alert("agent_dead", "echo-2")).await.is_some());
        assert_eq!(log.len().await, 2);
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let log = AlertLog::with_capacity(2);
        let _ = log.push(alert("a", "1")).await;
        let _ = log.push(alert("b", "2")).await;
        let _ = log.push(alert("c", "3")).await;
        let recent = log.recent(10).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, "c");
        assert_eq!(recent[1].kind, "b");
    }

    #[tokio::test]
    async fn test_write_behind_persists_admitted_alerts() {
        let storage = crate::storage::Storage::in_memory();
        let log = AlertLog::with_capacity(10).persisted(storage.clone());
        assert!(log.push(alert("agent_dead", "echo-1")).await.is_some());
        // Suppressed duplicates never reach storage
        assert!(log.push(alert("agent_dead", "echo-1")).await.is_none());

        let stored = storage
            .active()
            .lrange(crate::storage::keys::ALERTS_KEY, 0, -1)
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].contains("agent_dead"));

        log.clear().await;
        let stored = storage
            .active()
            .lrange(crate::storage::keys::ALERTS_KEY, 0, -1)
            .await
            .unwrap();
        assert!(stored.is_empty());
    }

    #[tokio::test]
    async fn test_clear_keeps_suppression() {
        let log = AlertLog::default();
        let _ = log.push(alert("x", "s")).await;
        log.clear().await;
        assert!(log.is_empty().await);
        assert!(log.push(alert("x", "s")).await.is_none());
    }
}

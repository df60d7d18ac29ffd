//! Monitoring primitives
//!
//! Bounded in-process buffers for logs and alerts, a counter/gauge registry
//! with Prometheus text exposition, and OS resource probes. The sweeper and
//! the dashboard hub are the main producers/consumers.

mod alerts;
mod logs;
mod metrics;
mod resources;

pub use alerts::{Alert, AlertLog, AlertSeverity};
pub use logs::{LogBuffer, LogEntry, LogLevel};
pub use metrics::SystemMetrics;
pub use resources::{ResourceProbe, ResourceUtilization};

use std::sync::Arc;

/// Bundle of monitoring facilities shared across components
#[derive(Clone)]
pub struct Monitors {
    pub logs: Arc<LogBuffer>,
    pub alerts: Arc<AlertLog>,
    pub metrics: Arc<SystemMetrics>,
}

impl Monitors {
    /// Buffers with the default capacities (10 000 logs, 500 alerts)
    #[must_use]
    pub fn new() -> Self {
        Self {
            logs: Arc::new(LogBuffer::default()),
            alerts: Arc::new(AlertLog::default()),
            metrics: Arc::new(SystemMetrics::new()),
        }
    }

    /// Buffers that also write behind to the storage adapter's capped
    /// `alerts` and `logs` lists
    #[must_use]
    pub fn with_storage(storage: crate::storage::Storage) -> Self {
        Self {
            logs: Arc::new(LogBuffer::default().persisted(storage.clone())),
            alerts: Arc::new(AlertLog::default().persisted(storage)),
            metrics: Arc::new(SystemMetrics::new()),
        }
    }
}

impl Default for Monitors {
    fn default() -> Self {
        Self::new()
    }
}

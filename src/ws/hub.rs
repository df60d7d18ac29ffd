//! Hub: a bounded broadcaster for one WebSocket audience
//!
//! Holds the connection table, enforces the connection cap, fans frames out
//! at-most-once per connection without ever blocking the producer, and runs
//! the ping/pong liveness accounting.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::config::HubConfig;
use crate::monitor::{Alert, AlertLog, AlertSeverity, SystemMetrics};

use super::connection::{
    ConnectionHandle, ConnectionId, Enqueued, CLOSE_PING_TIMEOUT, CLOSE_SLOW_CONSUMER,
};

/// A broadcaster for one audience (public, agent, or dashboard)
pub struct Hub {
    name: &'static str,
    config: HubConfig,
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    metrics: Arc<SystemMetrics>,
    alerts: Arc<AlertLog>,
    /// Keepalive payload: plain text on the public hub, JSON elsewhere
    ping_payload: &'static str,
}

impl Hub {
    /// Hub with its per-audience configuration
    #[must_use]
    pub fn new(
        name: &'static str,
        config: HubConfig,
        metrics: Arc<SystemMetrics>,
        alerts: Arc<AlertLog>,
        ping_payload: &'static str,
    ) -> Self {
        Self {
            name,
            config,
            connections: DashMap::new(),
            metrics,
            alerts,
            ping_payload,
        }
    }

    /// Hub name (`public`, `agent`, `dashboard`)
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// This hub's configuration
    #[must_use]
    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Admit a connection; `None` when the hub is at capacity
    #[must_use]
    pub fn register(&self) -> Option<Arc<ConnectionHandle>> {
        if self.connections.len() >= self.config.max_connections {
            tracing::warn!(hub = self.name, "Connection rejected: hub at capacity");
            return None;
        }
        let handle = Arc::new(ConnectionHandle::new(self.config.queue_capacity));
        self.connections.insert(handle.id, handle.clone());
        self.metrics.ws_connected(self.name);
        tracing::debug!(hub = self.name, connection = %handle.id, "Connection registered");
        Some(handle)
    }

    /// Remove a connection from the table
    pub fn unregister(&self, id: ConnectionId) {
        if self.connections.remove(&id).is_some() {
            self.metrics.ws_disconnected(self.name);
            tracing::debug!(hub = self.name, connection = %id, "Connection unregistered");
        }
    }

    /// Current connection count
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Fan a frame out to every connection
    ///
    /// `critical` frames close slow consumers instead of being shed.
    pub fn broadcast(&self, text: &str, critical: bool) {
        for entry in self.connections.iter() {
            self.deliver(entry.value(), text, critical);
        }
    }

    /// Fan out a periodic monitoring frame, skipping paused connections
    pub fn broadcast_monitoring(&self, text: &str) {
        for entry in self.connections.iter() {
            if entry.value().is_paused() {
                continue;
            }
            self.deliver(entry.value(), text, false);
        }
    }

    /// Send to one connection
    pub fn send_to(&self, id: ConnectionId, text: &str, critical: bool) {
        if let Some(entry) = self.connections.get(&id) {
            self.deliver(entry.value(), text, critical);
        }
    }

    fn deliver(&self, handle: &Arc<ConnectionHandle>, text: &str, critical: bool) {
        match handle.queue.push(text.to_string(), critical) {
            Enqueued::Ok => {}
            Enqueued::Dropped => {
                self.metrics.inc("ws_frames_dropped_total");
            }
            Enqueued::Overflow => {
                tracing::warn!(
                    hub = self.name,
                    connection = %handle.id,
                    "Critical frame overflow, closing slow consumer"
                );
                self.metrics.inc("ws_slow_consumer_closes_total");
                let alerts = self.alerts.clone();
                let source = format!("{}:{}", self.name, handle.id);
                tokio::spawn(async move {
                    let _ = alerts
                        .push(Alert::new(
                            "slow_consumer",
                            AlertSeverity::Warning,
                            "Slow WebSocket consumer closed",
                            "Outbound queue overflowed on a critical frame",
                            source,
                        ))
                        .await;
                });
                handle.close(CLOSE_SLOW_CONSUMER, "slow consumer");
            }
        }
    }

    /// Run the keepalive loop until `cancel` fires
    ///
    /// Every interval each connection is charged one missed pong and sent a
    /// ping. The warning threshold emits an alert; the close threshold
    /// closes the connection.
    pub async fn run_pinger(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.ping_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                () = cancel.cancelled() => return,
            }

            for entry in self.connections.iter() {
                let handle = entry.value();
                let missed = handle.miss_pong();
                if missed >= self.config.pong_close_threshold {
                    tracing::warn!(
                        hub = self.name,
                        connection = %handle.id,
                        missed,
                        "Closing connection after missed pongs"
                    );
                    handle.close(CLOSE_PING_TIMEOUT, "ping timeout");
                    continue;
                }
                if missed == self.config.pong_warn_threshold {
                    let _ = self
                        .alerts
                        .push(Alert::new(
                            "ws_unresponsive",
                            AlertSeverity::Warning,
                            "Unresponsive WebSocket client",
                            format!("{missed} consecutive pings unanswered"),
                            format!("{}:{}", self.name, handle.id),
                        ))
                        .await;
                }
                self.deliver(handle, self.ping_payload, false);
            }
        }
    }

    /// Close every connection with a going-away code and drain briefly
    pub async fn shutdown(&self) {
        for entry in self.connections.iter() {
            entry.value().close(1001, "server shutting down");
        }
        let grace = Duration::from_millis(500);
        let deadline = tokio::time::Instant::now() + grace;
        while tokio::time::Instant::now() < deadline {
            if self
                .connections
                .iter()
                .all(|entry| entry.value().queue.is_empty())
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;

    fn hub(max_connections: usize, queue_capacity: usize) -> Hub {
        let mut config = HubConfig::public_default();
        config.max_connections = max_connections;
        config.queue_capacity = queue_capacity;
        Hub::new(
            "public",
            config,
            Arc::new(SystemMetrics::new()),
            Arc::new(AlertLog::default()),
            "ping",
        )
    }

    #[test]
    fn test_connection_cap() {
        let hub = hub(2, 8);
        let _a = hub.register().unwrap();
        let _b = hub.register().unwrap();
        assert!(hub.register().is_none());
        assert_eq!(hub.connection_count(), 2);
    }

    #[test]
    fn test_unregister_frees_slot() {
        let hub = hub(1, 8);
        let a = hub.register().unwrap();
        hub.unregister(a.id);
        assert!(hub.register().is_some());
    }

    #[test]
    fn test_broadcast_reaches_all() {
        let hub = hub(4, 8);
        let a = hub.register().unwrap();
        let b = hub.register().unwrap();
        hub.broadcast("{\"type\":\"x\"}", false);
        assert_eq!(a.queue.len(), 1);
        assert_eq!(b.queue.len(), 1);
    }

    #[test]
    fn test_monitoring_skips_paused() {
        let hub = hub(4, 8);
        let a = hub.register().unwrap();
        let b = hub.register().unwrap();
        a.set_paused(true);
        hub.broadcast_monitoring("{\"type\":\"monitoring\"}");
        assert_eq!(a.queue.len(), 0);
        assert_eq!(b.queue.len(), 1);

        a.set_paused(false);
        hub.broadcast_monitoring("{\"type\":\"monitoring\"}");
        assert_eq!(a.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_critical_overflow_closes_consumer() {
        let hub = hub(4, 2);
        let slow = hub.register().unwrap();
        hub.broadcast("{\"type\":\"alert\"}", true);
        hub.broadcast("{\"type\":\"alert\"}", true);
        assert!(!slow.cancel.is_cancelled());
        // Queue is all-critical; the next critical frame cannot fit
        hub.broadcast("{\"type\":\"alert\"}", true);
        assert!(slow.cancel.is_cancelled());
        let (code, _) = slow.take_close_reason().unwrap();
        assert_eq!(code, CLOSE_SLOW_CONSUMER);
    }

    #[tokio::test]
    async fn test_other_connections_unaffected_by_slow_consumer() {
        let hub = hub(4, 2);
        let slow = hub.register().unwrap();
        let healthy = hub.register().unwrap();
        let cancel = CancellationToken::new();
        // Healthy consumer drains; slow one never does
        for _ in 0..3 {
            hub.broadcast("{\"type\":\"alert\"}", true);
            while !healthy.queue.is_empty() {
                let _ = healthy.queue.pop(&cancel).await;
            }
        }
        assert!(slow.cancel.is_cancelled());
        assert!(!healthy.cancel.is_cancelled());
    }
}

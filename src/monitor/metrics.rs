//! Counter/gauge registry with Prometheus text exposition
//!
//! The collector scrapes `/metrics/scrape`; long-term retention is its job,
//! so this registry only holds current values.

use dashmap::DashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Process-wide metrics registry
pub struct SystemMetrics {
    /// `arcp_http_requests_total{path, status}`
    http_requests: DashMap<(String, u16), u64>,
    /// `arcp_ws_connections{hub}` (current)
    ws_connections: DashMap<&'static str, AtomicI64>,
    /// Named monotonic counters
    counters: DashMap<&'static str, AtomicU64>,
    /// Named gauges
    gauges: DashMap<&'static str, f64>,
}

impl SystemMetrics {
    /// Empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            http_requests: DashMap::new(),
            ws_connections: DashMap::new(),
            counters: DashMap::new(),
            gauges: DashMap::new(),
        }
    }

    /// Count one HTTP request by normalized path and status
    pub fn observe_http(&self, path: &str, status: u16) {
        *self
            .http_requests
            .entry((path.to_string(), status))
            .or_insert(0) += 1;
    }

    /// Track a hub connection opening
    pub fn ws_connected(&self, hub: &'static str) {
        self.ws_connections
            .entry(hub)
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Track a hub connection closing
    pub fn ws_disconnected(&self, hub: &'static str) {
        self.ws_connections
            .entry(hub)
            .or_insert_with(|| AtomicI64::new(0))
            .fetch_sub(1, Ordering::Relaxed);
    }

    /// Current connection count for a hub
    #[must_use]
    pub fn ws_connection_count(&self, hub: &str) -> i64 {
        self.ws_connections
            .get(hub)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Increment a named counter
    pub fn inc(&self, name: &'static str) {
        self.counters
            .entry(name)
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Current value of a named counter
    #[must_use]
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Set a named gauge
    pub fn set_gauge(&self, name: &'static str, value: f64) {
        self.gauges.insert(name, value);
    }

    /// Current value of a named gauge
    #[must_use]
    pub fn gauge(&self, name: &str) -> f64 {
        self.gauges.get(name).map(|g| *g).unwrap_or(0.0)
    }

    /// Render the registry in Prometheus text exposition format
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(2048);

        out.push_str("# TYPE arcp_http_requests_total counter\n");
        let mut requests: Vec<_> = self
            .http_requests
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        requests.sort();
        for ((path, status), count) in requests {
            let _ = writeln!(
                out,
                "arcp_http_requests_total{{path=\"{path}\",status=\"{status}\"}} {count}"
            );
        }

        out.push_str("# TYPE arcp_ws_connections gauge\n");
        let mut hubs: Vec<_> = self
            .ws_connections
            .iter()
            .map(|entry| (*entry.key(), entry.value().load(Ordering::Relaxed)))
            .collect();
        hubs.sort();
        for (hub, count) in hubs {
            let _ = writeln!(out, "arcp_ws_connections{{hub=\"{hub}\"}} {count}");
        }

        let mut counters: Vec<_> = self
            .counters
            .iter()
            .map(|entry| (*entry.key(), entry.value().load(Ordering::Relaxed)))
            .collect();
        counters.sort();
        for (name, value) in counters {
            let _ = writeln!(out, "# TYPE arcp_{name} counter\narcp_{name} {value}");
        }

        let mut gauges: Vec<_> = self
            .gauges
            .iter()
            .map(|entry| (*entry.key(), *entry.value()))
            .collect();
        gauges.sort_by(|a, b| a.0.cmp(b.0));
        for (name, value) in gauges {
            let _ = writeln!(out, "# TYPE arcp_{name} gauge\narcp_{name} {value}");
        }

        out
    }
}

impl Default for SystemMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_counter_accumulates() {
        let metrics = SystemMetrics::new();
        metrics.observe_http("/agents", 200);
        metrics.observe_http("/agents", 200);
        metrics.observe_http("/agents", 404);
        let text = metrics.render();
        assert!(text.contains("arcp_http_requests_total{path=\"/agents\",status=\"200\"} 2"));
        assert!(text.contains("arcp_http_requests_total{path=\"/agents\",status=\"404\"} 1"));
    }

    #[test]
    fn test_ws_gauge_tracks_connections() {
        let metrics = SystemMetrics::new();
        metrics.ws_connected("public");
        metrics.ws_connected("public");
        metrics.ws_disconnected("public");
        assert_eq!(metrics.ws_connection_count("public"), 1);
        assert!(metrics
            .render()
            .contains("arcp_ws_connections{hub=\"public\"} 1"));
    }

    #[test]
    fn test_named_counters_and_gauges() {
        let metrics = SystemMetrics::new();
        metrics.inc("sweeper_ticks_total");
        metrics.inc("sweeper_ticks_total");
        metrics.set_gauge("agents_alive", 4.0);
        assert_eq!(metrics.counter("sweeper_ticks_total"), 2);
        assert_eq!(metrics.gauge("agents_alive"), 4.0);
        let text = metrics.render();
        assert!(text.contains("arcp_sweeper_ticks_total 2"));
        assert!(text.contains("arcp_agents_alive 4"));
    }
}

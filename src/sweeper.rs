//! Heartbeat and liveness sweeper
//!
//! A single-owner periodic task. Each tick ages out agents whose heartbeat
//! is overdue, aggregates system metrics, samples OS resource utilization,
//! evaluates alert rules, and publishes `monitoring`/`health` frames to the
//! dashboard hub and `stats_update` to the public hub.

use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::monitor::{Alert, AlertSeverity, Monitors, ResourceProbe};
use crate::registry::{Registry, SweepReport};
use crate::storage::Storage;
use crate::ws::{frames, Hubs};

/// Consecutive failed ticks before the sweeper raises a critical alert
const FAILED_TICK_ALERT_THRESHOLD: u32 = 3;

/// CPU / memory / storage utilization alert thresholds, percent
const CPU_ALERT_PERCENT: f32 = 90.0;
const MEMORY_ALERT_PERCENT: f32 = 90.0;
const STORAGE_ALERT_PERCENT: f32 = 95.0;

/// The periodic liveness and monitoring task
pub struct Sweeper {
    registry: Registry,
    storage: Storage,
    hubs: Hubs,
    monitors: Monitors,
}

impl Sweeper {
    /// Build the sweeper over its collaborators
    #[must_use]
    pub fn new(registry: Registry, storage: Storage, hubs: Hubs, monitors: Monitors) -> Self {
        Self {
            registry,
            storage,
            hubs,
            monitors,
        }
    }

    /// Spawn the periodic task; it stops when `cancel` fires
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let interval_duration = self.registry.config().sweep_interval();
            tracing::info!(interval = ?interval_duration, "Sweeper started");

            let mut interval = tokio::time::interval(interval_duration);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut probe = ResourceProbe::new();
            let mut previous_requests: Option<u64> = None;
            let mut consecutive_failures: u32 = 0;

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    () = cancel.cancelled() => {
                        tracing::info!("Sweeper stopped");
                        return;
                    }
                }

                let report = self.registry.sweep().await;
                self.monitors.metrics.inc("sweeper_ticks_total");

                // A tick that could not observe any agent counts as failed
                let tick_failed = report.total == 0 && report.read_failures > 0;
                if tick_failed {
                    consecutive_failures += 1;
                    self.monitors.metrics.inc("sweeper_failed_ticks_total");
                    tracing::error!(
                        consecutive = consecutive_failures,
                        "Sweeper tick failed to read the registry"
                    );
                    if consecutive_failures >= FAILED_TICK_ALERT_THRESHOLD {
                        self.raise(Alert::new(
                            "sweeper_failing",
                            AlertSeverity::Critical,
                            "Sweeper cannot read the registry",
                            format!("{consecutive_failures} consecutive failed ticks"),
                            "sweeper",
                        ))
                        .await;
                    }
                    continue;
                }
                consecutive_failures = 0;

                for agent_id in &report.newly_dead {
                    self.raise(Alert::new(
                        "agent_dead",
                        AlertSeverity::Warning,
                        "Agent missed its heartbeat",
                        format!("Agent '{agent_id}' transitioned to dead"),
                        agent_id.clone(),
                    ))
                    .await;
                }

                let request_rate = self.request_rate(&report, &mut previous_requests, interval_duration);
                let resources = probe.sample();
                self.update_gauges(&report, request_rate, &resources);
                self.evaluate_resource_rules(&resources).await;

                if self.storage.mode() == crate::storage::StorageMode::Degraded {
                    self.raise(Alert::new(
                        "storage_degraded",
                        AlertSeverity::Warning,
                        "Storage in degraded mode",
                        "Serving from the in-memory fallback; data is not durable",
                        "storage",
                    ))
                    .await;
                }

                self.publish_frames(&report, request_rate, &resources).await;
            }
        })
    }

    fn request_rate(
        &self,
        report: &SweepReport,
        previous: &mut Option<u64>,
        interval: std::time::Duration,
    ) -> f64 {
        let rate = match previous {
            Some(prev) => {
                report.total_requests.saturating_sub(*prev) as f64 / interval.as_secs_f64()
            }
            None => 0.0,
        };
        *previous = Some(report.total_requests);
        rate
    }

    fn update_gauges(
        &self,
        report: &SweepReport,
        request_rate: f64,
        resources: &crate::monitor::ResourceUtilization,
    ) {
        let metrics = &self.monitors.metrics;
        metrics.set_gauge("agents_alive", report.alive as f64);
        metrics.set_gauge("agents_dead", report.dead as f64);
        metrics.set_gauge("agents_total", report.total as f64);
        metrics.set_gauge("agent_request_rate", request_rate);
        metrics.set_gauge("agent_avg_response_time_s", report.avg_response_time_s);
        metrics.set_gauge("cpu_percent", f64::from(resources.cpu_percent));
        metrics.set_gauge("memory_percent", f64::from(resources.memory_percent));
        metrics.set_gauge("storage_percent", f64::from(resources.storage_percent));
    }

    async fn evaluate_resource_rules(&self, resources: &crate::monitor::ResourceUtilization) {
        let rules = [
            (
                resources.cpu_percent,
                CPU_ALERT_PERCENT,
                "cpu_high",
                "CPU utilization high",
            ),
            (
                resources.memory_percent,
                MEMORY_ALERT_PERCENT,
                "memory_high",
                "Memory utilization high",
            ),
            (
                resources.storage_percent,
                STORAGE_ALERT_PERCENT,
                "storage_high",
                "Disk utilization high",
            ),
        ];
        for (value, threshold, kind, title) in rules {
            if value > threshold {
                self.raise(Alert::new(
                    kind,
                    AlertSeverity::Warning,
                    title,
                    format!("{value:.1}% exceeds the {threshold:.0}% threshold"),
                    "sweeper",
                ))
                .await;
            }
        }
    }

    async fn publish_frames(
        &self,
        report: &SweepReport,
        request_rate: f64,
        resources: &crate::monitor::ResourceUtilization,
    ) {
        let monitoring = json!({
            "agents": {
                "total": report.total,
                "alive": report.alive,
                "dead": report.dead,
                "per_type": &report.per_type,
            },
            "requests": {
                "total": report.total_requests,
                "rate_per_sec": request_rate,
                "avg_response_time_s": report.avg_response_time_s,
            },
            "resources": resources,
        });
        self.hubs
            .dashboard
            .broadcast_monitoring(&frames::server_frame("monitoring", Some(monitoring)));

        let storage_health = self.storage.probe().await;
        let health = json!({
            "components": {
                "storage": storage_health,
                "registry": { "healthy": true, "agents": report.total },
                "hubs": {
                    "public": self.hubs.public.connection_count(),
                    "agent": self.hubs.agent.connection_count(),
                    "dashboard": self.hubs.dashboard.connection_count(),
                },
            },
        });
        self.hubs
            .dashboard
            .broadcast_monitoring(&frames::server_frame("health", Some(health)));

        if let Ok(stats) = self.registry.stats().await {
            self.hubs.public.broadcast(
                &frames::server_frame("stats_update", serde_json::to_value(&stats).ok()),
                false,
            );
        }
    }

    async fn raise(&self, alert: Alert) {
        if let Some(admitted) = self.monitors.alerts.push(alert).await {
            self.hubs.publish_alert(&admitted);
        }
    }
}

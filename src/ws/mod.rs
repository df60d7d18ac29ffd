//! Real-time broadcast core
//!
//! Three hubs with distinct audiences and authentication policies:
//! public (anonymous discovery), agent (token handshake), and dashboard
//! (admin + fingerprint). Each connection is a reader/writer task pair
//! sharing a bounded outbound queue and one cancellation token.

use std::sync::Arc;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::SinkExt;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WebSocketConfig;
use crate::monitor::{Alert, AlertSeverity, Monitors};
use crate::pagination::{paginate, PageParams};
use crate::registry::{ListFilter, PublicAgentView, Registry, RegistryEvent};

pub mod agent;
pub mod connection;
pub mod dashboard;
pub mod frames;
pub mod hub;
pub mod public;

pub use connection::{ConnectionHandle, ConnectionId, OutboundQueue};
pub use hub::Hub;

/// The three hubs plus their shared fan-out entry points
#[derive(Clone)]
pub struct Hubs {
    pub public: Arc<Hub>,
    pub agent: Arc<Hub>,
    pub dashboard: Arc<Hub>,
}

impl Hubs {
    /// Build all hubs from configuration
    #[must_use]
    pub fn new(config: &WebSocketConfig, monitors: &Monitors) -> Self {
        Self {
            public: Arc::new(Hub::new(
                "public",
                config.public.clone(),
                monitors.metrics.clone(),
                monitors.alerts.clone(),
                "ping",
            )),
            agent: Arc::new(Hub::new(
                "agent",
                config.agent.clone(),
                monitors.metrics.clone(),
                monitors.alerts.clone(),
                r#"{"type":"ping"}"#,
            )),
            dashboard: Arc::new(Hub::new(
                "dashboard",
                config.dashboard.clone(),
                monitors.metrics.clone(),
                monitors.alerts.clone(),
                r#"{"type":"ping"}"#,
            )),
        }
    }

    /// Spawn the pingers, the registry event pump, and the periodic
    /// broadcasters; all stop when `cancel` fires
    pub fn spawn_background(
        &self,
        registry: Registry,
        monitors: Monitors,
        cancel: CancellationToken,
    ) {
        for hub in [&self.public, &self.agent, &self.dashboard] {
            let hub = hub.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { hub.run_pinger(cancel).await });
        }

        // Registry change events fan out to every audience
        {
            let hubs = self.clone();
            let mut events = registry.events().subscribe();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let event = tokio::select! {
                        event = events.recv() => match event {
                            Ok(event) => event,
                            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                                tracing::debug!(skipped = n, "Hub event pump lagged");
                                continue;
                            }
                            Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                        },
                        () = cancel.cancelled() => return,
                    };
                    hubs.publish_registry_event(&event);
                }
            });
        }

        // Public hub: stats_update + discovery_data on a cadence
        {
            let hub = self.public.clone();
            let registry = registry.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(hub.config().broadcast_interval());
                loop {
                    tokio::select! {
                        _ = interval.tick() => {}
                        () = cancel.cancelled() => return,
                    }
                    if hub.connection_count() == 0 {
                        continue;
                    }
                    if let Ok(stats) = registry.stats().await {
                        hub.broadcast(
                            &frames::server_frame("stats_update", serde_json::to_value(&stats).ok()),
                            false,
                        );
                    }
                    if let Ok(payload) = discovery_payload(&registry, PageParams::default()).await {
                        hub.broadcast(&frames::server_frame("discovery_data", Some(payload)), false);
                    }
                }
            });
        }

        // Dashboard hub: agents + logs on a cadence (monitoring/health come
        // from the sweeper)
        {
            let hub = self.dashboard.clone();
            let registry = registry.clone();
            let monitors = monitors.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(hub.config().broadcast_interval());
                loop {
                    tokio::select! {
                        _ = interval.tick() => {}
                        () = cancel.cancelled() => return,
                    }
                    if hub.connection_count() == 0 {
                        continue;
                    }
                    if let Ok(payload) = agents_payload(&registry).await {
                        hub.broadcast_monitoring(&frames::server_frame("agents", Some(payload)));
                    }
                    let logs = monitors.logs.tail(100).await;
                    if let Ok(logs) = serde_json::to_value(&logs) {
                        hub.broadcast_monitoring(&frames::server_frame(
                            "logs",
                            Some(json!({ "entries": logs })),
                        ));
                    }
                }
            });
        }
    }

    /// Push an admitted alert to the dashboard audience
    ///
    /// Critical alerts are critical frames: a consumer too slow to take
    /// them is closed rather than skipped.
    pub fn publish_alert(&self, alert: &Alert) {
        let critical = alert.severity == AlertSeverity::Critical;
        if let Ok(payload) = serde_json::to_value(alert) {
            self.dashboard
                .broadcast(&frames::server_frame("alert", Some(payload)), critical);
        }
    }

    /// Translate a registry event into per-audience update frames
    pub fn publish_registry_event(&self, event: &RegistryEvent) {
        let Ok(payload) = serde_json::to_value(event) else {
            return;
        };
        let frame = frames::server_frame("agents_update", Some(payload));
        self.public.broadcast(&frame, false);
        self.agent.broadcast(&frame, false);
        self.dashboard.broadcast_monitoring(&frame);
    }

    /// Graceful close across all hubs
    pub async fn shutdown(&self) {
        futures::join!(
            self.public.shutdown(),
            self.agent.shutdown(),
            self.dashboard.shutdown()
        );
    }
}

/// Discovery payload: public view of alive agents, paginated
pub async fn discovery_payload(
    registry: &Registry,
    page: PageParams,
) -> crate::error::Result<serde_json::Value> {
    let records = registry
        .list(&ListFilter {
            status: Some(crate::registry::AgentStatus::Alive),
            ..Default::default()
        })
        .await?;
    let views: Vec<PublicAgentView> = records.iter().map(PublicAgentView::from).collect();
    let (items, info) = paginate(views, page.clamped(100));
    Ok(json!({ "agents": items, "pagination": info }))
}

/// Full agent list payload for authenticated audiences
pub async fn agents_payload(registry: &Registry) -> crate::error::Result<serde_json::Value> {
    let records = registry.list(&ListFilter::default()).await?;
    let count = records.len();
    Ok(json!({ "agents": records, "count": count }))
}

/// Drain the outbound queue into the socket until cancellation, then send
/// the recorded close frame
pub(crate) fn spawn_writer(
    mut sink: SplitSink<WebSocket, Message>,
    handle: Arc<ConnectionHandle>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(text) = handle.queue.pop(&handle.cancel).await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                handle.cancel.cancel();
                break;
            }
        }
        let close = handle
            .take_close_reason()
            .map(|(code, reason)| CloseFrame {
                code,
                reason: reason.into(),
            });
        let _ = sink.send(Message::Close(close)).await;
    })
}

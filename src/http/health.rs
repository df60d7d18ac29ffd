//! Health endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use crate::state::AppState;
use crate::storage::StorageHealth;

/// Health summary body
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: String,
    pub version: &'static str,
    pub storage: StorageHealth,
    pub hubs: HubCounts,
    pub alerts_buffered: usize,
}

#[derive(Debug, Serialize)]
pub struct HubCounts {
    pub public: usize,
    pub agent: usize,
    pub dashboard: usize,
}

/// `GET /health` — liveness plus component summary, no authentication
///
/// Always 200 while the process serves requests; degraded storage shows in
/// the body, not the status code.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let storage = state.storage.probe().await;
    Json(HealthResponse {
        status: "healthy",
        service: state.config.service.name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        storage,
        hubs: HubCounts {
            public: state.hubs.public.connection_count(),
            agent: state.hubs.agent.connection_count(),
            dashboard: state.hubs.dashboard.connection_count(),
        },
        alerts_buffered: state.monitors.alerts.len().await,
    })
}

//! Metrics and monitoring endpoints

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::error::Result;
use crate::monitor::{Alert, LogEntry};
use crate::state::AppState;

use super::extract::{bearer_token, AdminPrincipal};

/// `GET /metrics/scrape` — Prometheus text exposition, scrape-token gated
pub async fn scrape(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse> {
    let token = bearer_token(&headers)?;
    state.auth.verify_scrape(token)?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.monitors.metrics.render(),
    ))
}

/// `GET /metrics` — the same exposition, admin + PIN gated
pub async fn admin_metrics(
    State(state): State<AppState>,
    principal: AdminPrincipal,
) -> Result<impl IntoResponse> {
    state.auth.require_pin(&principal.claims).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.monitors.metrics.render(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct TailQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
}

const fn default_limit() -> usize {
    100
}

/// `GET /alerts` — REST fallback for the dashboard alert stream
pub async fn alerts(
    State(state): State<AppState>,
    Query(query): Query<TailQuery>,
    _principal: AdminPrincipal,
) -> Result<Json<Vec<Alert>>> {
    Ok(Json(state.monitors.alerts.recent(query.limit.min(500)).await))
}

/// `GET /logs` — REST fallback for the dashboard log stream
pub async fn logs(
    State(state): State<AppState>,
    Query(query): Query<TailQuery>,
    _principal: AdminPrincipal,
) -> Result<Json<Vec<LogEntry>>> {
    Ok(Json(state.monitors.logs.tail(query.limit.min(1000)).await))
}

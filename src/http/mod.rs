//! HTTP surface
//!
//! Route table per the external interface: health, metrics, auth, agent
//! lifecycle, public discovery, and the three WebSocket endpoints. Handlers
//! return `Result<_, Error>`; the problem-details translation lives on the
//! error type.

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};

use crate::state::AppState;
use crate::ws;

pub mod agents;
pub mod auth;
pub mod extract;
pub mod health;
pub mod metrics;
pub mod public;

/// Assemble the full router over the application state
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/metrics", get(metrics::admin_metrics))
        .route("/metrics/scrape", get(metrics::scrape))
        .route("/alerts", get(metrics::alerts))
        .route("/logs", get(metrics::logs))
        .route("/auth/login", post(auth::login))
        .route("/auth/logout", post(auth::logout))
        .route("/auth/session_status", get(auth::session_status))
        .route("/auth/set_pin", post(auth::set_pin))
        .route("/auth/verify_pin", post(auth::verify_pin))
        .route("/auth/pin_status", get(auth::pin_status))
        .route("/auth/agent/request_temp_token", post(auth::request_temp_token))
        .route("/agents", get(agents::list))
        .route("/agents/register", post(agents::register))
        .route("/agents/search", post(agents::search))
        .route("/agents/ws", get(ws::agent::ws_handler))
        .route("/agents/{id}", get(agents::get).delete(agents::unregister))
        .route("/agents/{id}/heartbeat", post(agents::heartbeat))
        .route(
            "/agents/{id}/metrics",
            get(agents::get_metrics).post(agents::report_metrics),
        )
        .route("/agents/report-metrics/{id}", post(agents::report_metrics))
        .route("/public/discover", get(public::discover))
        .route("/public/search", post(public::search))
        .route("/public/connect/{id}", post(public::connect))
        .route("/public/ws", get(ws::public::ws_handler))
        .route("/dashboard/ws", get(ws::dashboard::ws_handler))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            track_requests,
        ))
        .with_state(state)
}

/// IP admission plus per-route request counting
async fn track_requests(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let meta = extract::ClientMeta::from_headers(request.headers());
    let service = &state.config.service;
    let denied = service.ip_denylist.iter().any(|ip| *ip == meta.source_ip)
        || (!service.ip_allowlist.is_empty()
            && !service.ip_allowlist.iter().any(|ip| *ip == meta.source_ip));
    if denied {
        tracing::warn!(source_ip = %meta.source_ip, "Request rejected by IP policy");
        return crate::error::Error::Forbidden("Source address not permitted".into())
            .into_response();
    }

    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let response = next.run(request).await;
    state
        .monitors
        .metrics
        .observe_http(&path, response.status().as_u16());
    response
}

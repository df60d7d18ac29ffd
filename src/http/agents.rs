//! Agent lifecycle endpoints

use axum::{
    extract::{Path, Query, State},
    http::HeaderMap,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::pagination::{paginate, PageInfo, PageParams};
use crate::registry::{
    AgentMetrics, AgentRecord, AgentStatus, ListFilter, RegistrationRequest,
};
use crate::search::{SearchRequest, SearchResponse};
use crate::state::AppState;

use super::extract::{bearer_token, AdminPrincipal, ClientMeta, Principal};

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub status: &'static str,
    pub agent: AgentRecord,
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_at: DateTime<Utc>,
}

/// `POST /agents/register` — consumes a temp token, creates the agent
pub async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    meta: ClientMeta,
    Json(body): Json<RegistrationRequest>,
) -> Result<Json<RegisterResponse>> {
    let token = bearer_token(&headers)?;
    let grant = state
        .auth
        .consume_temp_token(token, &meta.fingerprint)
        .await?;

    if grant.agent_id != body.agent_id || grant.agent_type != body.agent_type {
        tracing::warn!(
            token_agent = %grant.agent_id,
            submitted_agent = %body.agent_id,
            "Temp token does not match the submitted record"
        );
        return Err(Error::unauthorized(
            "token_invalid",
            "Temp token was issued for a different agent",
        ));
    }

    let agent = state.registry.register(body).await?;
    let (access_token, claims) = state
        .auth
        .mint_agent_token(&agent.agent_id, &meta.fingerprint)?;

    Ok(Json(RegisterResponse {
        status: "registered",
        agent,
        access_token,
        token_type: "bearer",
        expires_at: DateTime::<Utc>::from_timestamp(claims.exp, 0).unwrap_or_else(Utc::now),
    }))
}

#[derive(Debug, Serialize)]
pub struct HeartbeatResponse {
    pub status: AgentStatus,
    pub timestamp: DateTime<Utc>,
}

/// `POST /agents/{id}/heartbeat`
pub async fn heartbeat(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    principal: Principal,
) -> Result<Json<HeartbeatResponse>> {
    state.auth.authorize_agent(&principal.claims, &agent_id)?;
    state.registry.heartbeat(&agent_id).await?;
    Ok(Json(HeartbeatResponse {
        status: AgentStatus::Alive,
        timestamp: Utc::now(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct MetricsReport {
    pub response_time_s: f64,
    pub success: bool,
}

/// `POST /agents/{id}/metrics` (also served as
/// `/agents/report-metrics/{id}` for older agents)
pub async fn report_metrics(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    principal: Principal,
    Json(body): Json<MetricsReport>,
) -> Result<Json<AgentMetrics>> {
    state.auth.authorize_agent(&principal.claims, &agent_id)?;
    if !body.response_time_s.is_finite() || body.response_time_s < 0.0 {
        return Err(Error::Validation(
            "response_time_s must be a non-negative number".into(),
        ));
    }
    let metrics = state
        .registry
        .report_metrics(&agent_id, body.response_time_s, body.success)
        .await?;
    Ok(Json(metrics))
}

#[derive(Debug, Deserialize)]
pub struct GetQuery {
    #[serde(default)]
    pub include_metrics: bool,
}

#[derive(Debug, Serialize)]
pub struct AgentResponse {
    #[serde(flatten)]
    pub agent: AgentRecord,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<AgentMetrics>,
}

/// `GET /agents/{id}`
pub async fn get(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    Query(query): Query<GetQuery>,
    principal: Principal,
) -> Result<Json<AgentResponse>> {
    state.auth.authorize_agent(&principal.claims, &agent_id)?;
    let agent = state.registry.get(&agent_id).await?;
    let metrics = if query.include_metrics {
        Some(state.registry.get_metrics(&agent_id).await?)
    } else {
        None
    };
    Ok(Json(AgentResponse { agent, metrics }))
}

/// `GET /agents/{id}/metrics`
pub async fn get_metrics(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    principal: Principal,
) -> Result<Json<AgentMetrics>> {
    state.auth.authorize_agent(&principal.claims, &agent_id)?;
    Ok(Json(state.registry.get_metrics(&agent_id).await?))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub capability: Option<String>,
    #[serde(default)]
    pub status: Option<AgentStatus>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub agents: Vec<AgentRecord>,
    pub pagination: PageInfo,
}

/// `GET /agents` — admin-only paginated list
pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
    _principal: AdminPrincipal,
) -> Result<Json<ListResponse>> {
    let records = state
        .registry
        .list(&ListFilter {
            agent_type: query.agent_type,
            capability: query.capability,
            status: query.status,
        })
        .await?;
    let params = PageParams {
        page: query.page.unwrap_or(1),
        page_size: query.page_size.unwrap_or(20),
    }
    .clamped(100);
    let (agents, pagination) = paginate(records, params);
    Ok(Json(ListResponse { agents, pagination }))
}

#[derive(Debug, Serialize)]
pub struct UnregisterResponse {
    pub status: &'static str,
    pub agent_id: String,
}

/// `DELETE /agents/{id}` — destructive, requires PIN admission
pub async fn unregister(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    principal: AdminPrincipal,
) -> Result<Json<UnregisterResponse>> {
    state.auth.require_pin(&principal.claims).await?;
    state.registry.unregister(&agent_id).await?;
    tracing::info!(
        agent_id = %agent_id,
        principal = %principal.claims.sub,
        "Agent evicted by admin"
    );
    Ok(Json(UnregisterResponse {
        status: "unregistered",
        agent_id,
    }))
}

/// `POST /agents/search` — authenticated semantic search
pub async fn search(
    State(state): State<AppState>,
    _principal: Principal,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    Ok(Json(state.search.search(request).await?))
}

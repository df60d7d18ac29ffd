//! Anonymous public endpoints

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::pagination::{paginate, PageInfo, PageParams};
use crate::registry::{AgentStatus, ListFilter, PublicAgentView};
use crate::search::{SearchRequest, SearchResponse};
use crate::state::AppState;

use super::extract::ClientMeta;

#[derive(Debug, Deserialize)]
pub struct DiscoverQuery {
    #[serde(default)]
    pub page: Option<usize>,
    #[serde(default)]
    pub page_size: Option<usize>,
    #[serde(default)]
    pub agent_type: Option<String>,
    #[serde(default)]
    pub capability: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DiscoverResponse {
    pub agents: Vec<PublicAgentView>,
    pub pagination: PageInfo,
}

/// `GET /public/discover` — paginated public view of alive agents
pub async fn discover(
    State(state): State<AppState>,
    meta: ClientMeta,
    Query(query): Query<DiscoverQuery>,
) -> Result<Json<DiscoverResponse>> {
    state
        .auth
        .limiter()
        .acquire(&format!("public:{}", meta.source_ip))
        .await?;

    let records = state
        .registry
        .list(&ListFilter {
            agent_type: query.agent_type,
            capability: query.capability,
            status: Some(AgentStatus::Alive),
        })
        .await?;
    let views: Vec<PublicAgentView> = records.iter().map(PublicAgentView::from).collect();
    let params = PageParams {
        page: query.page.unwrap_or(1),
        page_size: query.page_size.unwrap_or(20),
    }
    .clamped(100);
    let (agents, pagination) = paginate(views, params);
    Ok(Json(DiscoverResponse { agents, pagination }))
}

/// `POST /public/search` — anonymous semantic search
pub async fn search(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(mut request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    state
        .auth
        .limiter()
        .acquire(&format!("public:{}", meta.source_ip))
        .await?;
    // Anonymous callers only ever see alive agents
    request.status = Some(AgentStatus::Alive);
    Ok(Json(state.search.search(request).await?))
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_endpoint: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub additional_info: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub status: &'static str,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_response: Option<Value>,
}

/// `POST /public/connect/{id}` — forward a connection request to the agent
///
/// The control plane only brokers the handoff; whether to accept the caller
/// is the target agent's decision.
pub async fn connect(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    meta: ClientMeta,
    Json(body): Json<ConnectRequest>,
) -> Result<Json<ConnectResponse>> {
    state
        .auth
        .limiter()
        .acquire(&format!("connect:{}", meta.source_ip))
        .await?;

    let agent = state.registry.get(&agent_id).await?;
    if agent.status != AgentStatus::Alive {
        return Err(Error::Conflict {
            code: "agent_unavailable",
            detail: format!("Agent '{agent_id}' is not alive"),
        });
    }

    let url = format!("{}/connect", agent.endpoint.trim_end_matches('/'));
    let response = state
        .http_client
        .post(&url)
        .json(&body)
        .send()
        .await
        .map_err(|e| Error::External(format!("Agent unreachable: {e}")))?;

    if !response.status().is_success() {
        return Err(Error::External(format!(
            "Agent rejected the connection request with {}",
            response.status()
        )));
    }

    let agent_response = response.json::<Value>().await.ok();
    Ok(Json(ConnectResponse {
        status: "forwarded",
        agent_id,
        agent_response,
    }))
}

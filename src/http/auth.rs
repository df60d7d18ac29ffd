//! Authentication endpoints

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::state::AppState;

use super::extract::{AdminPrincipal, ClientMeta};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// `POST /auth/login`
pub async fn login(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(body): Json<LoginRequest>,
) -> Result<Json<crate::auth::LoginGrant>> {
    let grant = state
        .auth
        .admin_login(&body.username, &body.password, &meta.fingerprint, &meta.source_ip)
        .await?;
    Ok(Json(grant))
}

/// `POST /auth/logout`
pub async fn logout(
    State(state): State<AppState>,
    principal: AdminPrincipal,
) -> Result<StatusCode> {
    state.auth.logout(&principal.claims).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /auth/session_status`
pub async fn session_status(
    State(state): State<AppState>,
    principal: AdminPrincipal,
) -> Result<Json<crate::auth::SessionStatus>> {
    Ok(Json(state.auth.session_status(&principal.claims).await?))
}

#[derive(Debug, Deserialize)]
pub struct PinRequest {
    pub pin: String,
}

#[derive(Debug, Serialize)]
pub struct PinResponse {
    pub status: &'static str,
}

/// `POST /auth/set_pin`
pub async fn set_pin(
    State(state): State<AppState>,
    principal: AdminPrincipal,
    Json(body): Json<PinRequest>,
) -> Result<Json<PinResponse>> {
    state.auth.set_pin(&principal.claims, &body.pin).await?;
    Ok(Json(PinResponse { status: "pin_set" }))
}

/// `POST /auth/verify_pin`
pub async fn verify_pin(
    State(state): State<AppState>,
    principal: AdminPrincipal,
    Json(body): Json<PinRequest>,
) -> Result<Json<PinResponse>> {
    state.auth.verify_pin(&principal.claims, &body.pin).await?;
    Ok(Json(PinResponse {
        status: "pin_verified",
    }))
}

/// `GET /auth/pin_status`
pub async fn pin_status(
    State(state): State<AppState>,
    principal: AdminPrincipal,
) -> Result<Json<crate::auth::PinStatus>> {
    Ok(Json(state.auth.pin_status(&principal.claims).await?))
}

#[derive(Debug, Deserialize)]
pub struct TempTokenRequest {
    pub agent_id: String,
    pub agent_type: String,
    pub agent_key: String,
    pub fingerprint: String,
}

#[derive(Debug, Serialize)]
pub struct TempTokenResponse {
    pub temp_token: String,
    pub expires_at: DateTime<Utc>,
}

/// `POST /auth/agent/request_temp_token`
pub async fn request_temp_token(
    State(state): State<AppState>,
    meta: ClientMeta,
    Json(body): Json<TempTokenRequest>,
) -> Result<Json<TempTokenResponse>> {
    let (temp_token, expires_at) = state
        .auth
        .request_temp_token(
            &body.agent_id,
            &body.agent_type,
            &body.agent_key,
            &body.fingerprint,
            &meta.source_ip,
        )
        .await?;
    Ok(Json(TempTokenResponse {
        temp_token,
        expires_at,
    }))
}

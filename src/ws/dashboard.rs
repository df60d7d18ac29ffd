//! Dashboard hub: admin monitoring stream
//!
//! The first client frame must carry an admin token plus fingerprint. An
//! authenticated dashboard receives `monitoring`, `health`, `agents`,
//! `logs`, and `alert` frames at their configured cadences and may send
//! control frames, each acknowledged with a `{type}_ack`.

use axum::{
    extract::{ws::Message, State, WebSocketUpgrade},
    response::Response,
};
use futures::StreamExt;
use serde_json::json;

use crate::monitor::{Alert, AlertSeverity, LogLevel};
use crate::state::AppState;

use super::connection::{ConnectionHandle, CLOSE_AUTH_FAILED};
use super::frames::{self, ack_name, ClientFrame, Inbound};
use super::{agents_payload, spawn_writer};

/// `GET /dashboard/ws`
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: axum::extract::ws::WebSocket) {
    let hub = state.hubs.dashboard.clone();
    let Some(handle) = hub.register() else {
        let mut socket = socket;
        let _ = socket
            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                code: 1013,
                reason: "hub at capacity".into(),
            })))
            .await;
        return;
    };

    let (sink, mut stream) = socket.split();
    let writer = spawn_writer(sink, handle.clone());

    // The opening frame must authenticate as an admin with a live session
    let deadline = hub.config().auth_deadline();
    let authenticated = tokio::time::timeout(deadline, async {
        while let Some(Ok(message)) = stream.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            if let Inbound::Frame(ClientFrame::Auth { token, fingerprint }) =
                frames::parse_inbound(&text)
            {
                let claims = match state.auth.validate(&token, &fingerprint).await {
                    Ok(claims) => claims,
                    Err(_) => return None,
                };
                return state
                    .auth
                    .authorize_admin(&claims)
                    .await
                    .ok()
                    .map(|_| claims);
            }
        }
        None
    })
    .await
    .ok()
    .flatten();

    let Some(claims) = authenticated else {
        tracing::warn!(connection = %handle.id, "Dashboard handshake failed");
        handle.close(CLOSE_AUTH_FAILED, "admin authentication required");
        hub.unregister(handle.id);
        let _ = writer.await;
        return;
    };

    tracing::info!(
        connection = %handle.id,
        principal = %claims.sub,
        "Dashboard connection authenticated"
    );
    handle.queue.push(
        frames::server_frame("auth_ok", Some(json!({"sub": claims.sub}))),
        true,
    );
    send_snapshot(&state, &handle).await;

    loop {
        let message = tokio::select! {
            message = stream.next() => message,
            () = handle.cancel.cancelled() => break,
        };
        let Some(Ok(message)) = message else { break };

        match message {
            Message::Text(text) => match frames::parse_inbound(&text) {
                Inbound::TextPing => {
                    handle.queue.push("pong".to_string(), false);
                }
                Inbound::TextPong | Inbound::Frame(ClientFrame::Pong) => {
                    handle.pong_received();
                }
                Inbound::Frame(ClientFrame::Ping) => {
                    handle
                        .queue
                        .push(frames::server_frame("pong", None), false);
                }
                Inbound::Frame(frame) => {
                    handle_control_frame(&state, &handle, frame).await;
                }
                Inbound::Unknown(kind) => {
                    tracing::debug!(kind = %kind, "Unknown frame type on dashboard hub");
                }
                Inbound::Garbage => {}
            },
            Message::Pong(_) => handle.pong_received(),
            Message::Close(_) => break,
            Message::Ping(_) | Message::Binary(_) => {}
        }
    }

    hub.unregister(handle.id);
    handle.cancel.cancel();
    let _ = writer.await;
}

async fn handle_control_frame(state: &AppState, handle: &ConnectionHandle, frame: ClientFrame) {
    let ack = ack_name(&frame);
    match frame {
        ClientFrame::PauseMonitoring => handle.set_paused(true),
        ClientFrame::ResumeMonitoring => handle.set_paused(false),
        ClientFrame::RefreshRequest | ClientFrame::AgentsRequest => {
            send_snapshot(state, handle).await;
        }
        ClientFrame::ClearLogs => state.monitors.logs.clear().await,
        ClientFrame::ClearAlerts => state.monitors.alerts.clear().await,
        ClientFrame::DashboardLog { level, message } => {
            let level = match level.as_deref() {
                Some("DEBUG") => LogLevel::Debug,
                Some("SUCS") => LogLevel::Success,
                Some("WARN") => LogLevel::Warn,
                Some("ERR") => LogLevel::Error,
                Some("CRIT") => LogLevel::Critical,
                _ => LogLevel::Info,
            };
            state.monitors.logs.push(level, "dashboard", message).await;
        }
        ClientFrame::DashboardAlert {
            severity,
            title,
            message,
        } => {
            let severity = match severity.as_deref() {
                Some("critical") => AlertSeverity::Critical,
                Some("warning") => AlertSeverity::Warning,
                _ => AlertSeverity::Info,
            };
            let alert = Alert::new("dashboard", severity, title, message, "dashboard");
            if let Some(admitted) = state.monitors.alerts.push(alert).await {
                state.hubs.publish_alert(&admitted);
            }
        }
        // Auth retransmits, ping, pong never reach here
        _ => return,
    }
    if let Some(name) = ack {
        handle.queue.push(frames::ack_frame(name), true);
    }
}

/// Push a fresh agents + alerts snapshot to one connection
async fn send_snapshot(state: &AppState, handle: &ConnectionHandle) {
    if let Ok(payload) = agents_payload(&state.registry).await {
        handle
            .queue
            .push(frames::server_frame("agents", Some(payload)), false);
    }
    let alerts = state.monitors.alerts.recent(50).await;
    if let Ok(alerts) = serde_json::to_value(&alerts) {
        handle.queue.push(
            frames::server_frame("alerts_snapshot", Some(json!({ "alerts": alerts }))),
            false,
        );
    }
}

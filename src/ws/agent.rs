//! Agent hub: authenticated agent stream
//!
//! After accept the server sends `{type: auth_required}`; the client must
//! reply with its token within the handshake deadline or be disconnected.
//! Authenticated agents receive the current agent list and incremental
//! updates as the registry changes.

use axum::{
    extract::{ws::Message, State, WebSocketUpgrade},
    response::Response,
};
use futures::StreamExt;
use serde_json::json;

use crate::auth::Role;
use crate::state::AppState;

use super::connection::CLOSE_AUTH_FAILED;
use super::frames::{self, ClientFrame, Inbound};
use super::{agents_payload, spawn_writer};

/// `GET /agents/ws`
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: axum::extract::ws::WebSocket) {
    let hub = state.hubs.agent.clone();
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

    handle
        .queue
        .push(frames::server_frame("auth_required", None), true);

    let (sink, mut stream) = socket.split();
    let writer = spawn_writer(sink, handle.clone());

    // Handshake: the first meaningful frame must be a valid token
    let deadline = hub.config().auth_deadline();
    let authenticated = tokio::time::timeout(deadline, async {
        while let Some(Ok(message)) = stream.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            if let Inbound::Frame(ClientFrame::Auth { token, fingerprint }) =
                frames::parse_inbound(&text)
            {
                return match state.auth.validate(&token, &fingerprint).await {
                    Ok(claims) if matches!(claims.role, Role::Agent | Role::Admin) => {
                        Some(claims)
                    }
                    Ok(_) | Err(_) => None,
                };
            }
        }
        None
    })
    .await
    .ok()
    .flatten();

    let Some(claims) = authenticated else {
        tracing::debug!(connection = %handle.id, "Agent hub handshake failed");
        handle.close(CLOSE_AUTH_FAILED, "authentication required");
        hub.unregister(handle.id);
        let _ = writer.await;
        return;
    };

    tracing::info!(
        connection = %handle.id,
        principal = %claims.sub,
        "Agent hub connection authenticated"
    );
    handle.queue.push(
        frames::server_frame("auth_ok", Some(json!({"sub": claims.sub}))),
        true,
    );
    if let Ok(payload) = agents_payload(&state.registry).await {
        handle
            .queue
            .push(frames::server_frame("agents_list", Some(payload)), false);
    }

    // Steady state: keepalives in, updates out (pushed by the hub pump)
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
                Inbound::Frame(ClientFrame::AgentsRequest) => {
                    if let Ok(payload) = agents_payload(&state.registry).await {
                        handle
                            .queue
                            .push(frames::server_frame("agents_list", Some(payload)), false);
                    }
                }
                Inbound::Frame(other) => {
                    tracing::debug!(frame = ?other, "Ignoring frame not valid on agent hub");
                }
                Inbound::Unknown(kind) => {
                    tracing::debug!(kind = %kind, "Unknown frame type on agent hub");
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

//! Public hub: anonymous discovery stream
//!
//! No authentication. Connecting clients get a welcome frame, periodic
//! `stats_update` and `discovery_data` frames, and `agents_update` frames
//! on registry change. `get_discovery` request frames are answered with a
//! paginated snapshot. Keepalive is plain-text `"ping"`/`"pong"`.

use axum::{
    extract::{ws::Message, State, WebSocketUpgrade},
    response::Response,
};
use futures::StreamExt;
use serde_json::json;

use crate::pagination::PageParams;
use crate::state::AppState;

use super::frames::{self, ClientFrame, Inbound};
use super::{discovery_payload, spawn_writer};

/// `GET /public/ws`
pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, socket))
}

async fn handle_socket(state: AppState, socket: axum::extract::ws::WebSocket) {
    let hub = state.hubs.public.clone();
    let Some(handle) = hub.register() else {
        // At capacity; close immediately with "try again later"
        let mut socket = socket;
        let _ = socket
            .send(Message::Close(Some(axum::extract::ws::CloseFrame {
                code: 1013,
                reason: "hub at capacity".into(),
            })))
            .await;
        return;
    };

    handle.queue.push(
        frames::server_frame(
            "welcome",
            Some(json!({
                "service": state.config.service.name.clone(),
                "endpoints": ["get_discovery"],
            })),
        ),
        true,
    );

    let (sink, mut stream) = socket.split();
    let writer = spawn_writer(sink, handle.clone());

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
                Inbound::Frame(ClientFrame::GetDiscovery { page, page_size }) => {
                    let params = PageParams {
                        page: page.unwrap_or(1),
                        page_size: page_size.unwrap_or(20),
                    };
                    match discovery_payload(&state.registry, params).await {
                        Ok(payload) => handle.queue.push(
                            frames::server_frame("discovery_data", Some(payload)),
                            false,
                        ),
                        Err(e) => {
                            tracing::warn!(error = %e, "Discovery snapshot failed");
                            handle.queue.push(
                                frames::server_frame(
                                    "error",
                                    Some(json!({"detail": "discovery unavailable"})),
                                ),
                                false,
                            )
                        }
                    };
                }
                Inbound::Frame(other) => {
                    tracing::debug!(frame = ?other, "Ignoring frame not valid on public hub");
                }
                Inbound::Unknown(kind) => {
                    tracing::debug!(kind = %kind, "Unknown frame type on public hub");
                }
                Inbound::Garbage => {
                    tracing::debug!("Undecodable text frame on public hub");
                }
            },
            Message::Pong(_) => handle.pong_received(),
            Message::Close(_) => break,
            // Protocol pings are answered by the transport layer
            Message::Ping(_) | Message::Binary(_) => {}
        }
    }

    hub.unregister(handle.id);
    handle.cancel.cancel();
    let _ = writer.await;
}

//! WebSocket frame vocabulary
//!
//! Every server frame is a JSON object with a `type` discriminator and a
//! fractional-epoch `timestamp`; payloads ride under `data`. Client frames
//! are parsed into a typed enum; unknown types are logged and ignored.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

/// Seconds since epoch with sub-second precision
#[must_use]
pub fn now_timestamp() -> f64 {
    let now = Utc::now();
    now.timestamp() as f64 + f64::from(now.timestamp_subsec_millis()) / 1000.0
}

/// Build a server frame with `type`, `timestamp`, and optional `data`
#[must_use]
pub fn server_frame(kind: &str, data: Option<Value>) -> String {
    let mut frame = json!({
        "type": kind,
        "timestamp": now_timestamp(),
    });
    if let Some(data) = data {
        frame["data"] = data;
    }
    frame.to_string()
}

/// Acknowledgement frame for a dashboard control frame
#[must_use]
pub fn ack_frame(kind: &str) -> String {
    server_frame(&format!("{kind}_ack"), None)
}

/// Frames a client may send, across all three hubs
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Authentication reply on the agent and dashboard hubs
    Auth {
        token: String,
        #[serde(default)]
        fingerprint: String,
    },
    /// Public hub discovery request with pagination
    GetDiscovery {
        #[serde(default)]
        page: Option<usize>,
        #[serde(default)]
        page_size: Option<usize>,
    },
    PauseMonitoring,
    ResumeMonitoring,
    RefreshRequest,
    AgentsRequest,
    ClearLogs,
    ClearAlerts,
    /// Dashboard-originated log line
    DashboardLog {
        #[serde(default)]
        level: Option<String>,
        #[serde(default)]
        message: String,
    },
    /// Dashboard-originated alert
    DashboardAlert {
        #[serde(default)]
        severity: Option<String>,
        #[serde(default)]
        title: String,
        #[serde(default)]
        message: String,
    },
    Ping,
    Pong,
}

/// Outcome of parsing one inbound text payload
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Plain-text keepalive probe
    TextPing,
    /// Plain-text keepalive reply
    TextPong,
    Frame(ClientFrame),
    /// Valid JSON with an unrecognized `type`
    Unknown(String),
    /// Not JSON, not a keepalive
    Garbage,
}

/// Parse one inbound text payload
///
/// Plain-text `"ping"`/`"pong"` are honored alongside their JSON forms.
#[must_use]
pub fn parse_inbound(text: &str) -> Inbound {
    match text.trim() {
        "ping" => return Inbound::TextPing,
        "pong" => return Inbound::TextPong,
        _ => {}
    }
    let Ok(value) = serde_json::from_str::<Value>(text) else {
        return Inbound::Garbage;
    };
    match serde_json::from_value::<ClientFrame>(value.clone()) {
        Ok(frame) => Inbound::Frame(frame),
        Err(_) => {
            // Bare {token} is accepted as an auth reply on the agent hub
            if let Some(token) = value.get("token").and_then(Value::as_str) {
                return Inbound::Frame(ClientFrame::Auth {
                    token: token.to_string(),
                    fingerprint: value
                        .get("fingerprint")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                });
            }
            let kind = value
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("<missing>")
                .to_string();
            Inbound::Unknown(kind)
        }
    }
}

/// The control-frame name used for its `_ack`, when one is expected
#[must_use]
pub fn ack_name(frame: &ClientFrame) -> Option<&'static str> {
    match frame {
        ClientFrame::PauseMonitoring => Some("pause_monitoring"),
        ClientFrame::ResumeMonitoring => Some("resume_monitoring"),
        ClientFrame::RefreshRequest => Some("refresh_request"),
        ClientFrame::AgentsRequest => Some("agents_request"),
        ClientFrame::ClearLogs => Some("clear_logs"),
        ClientFrame::ClearAlerts => Some("clear_alerts"),
        ClientFrame::DashboardLog { .. } => Some("dashboard_log"),
        ClientFrame::DashboardAlert { .. } => Some("dashboard_alert"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_frame_shape() {
        let frame: Value = serde_json::from_str(&server_frame(
            "stats_update",
            Some(json!({"alive": 3})),
        ))
        .unwrap();
        assert_eq!(frame["type"], "stats_update");
        assert!(frame["timestamp"].as_f64().unwrap() > 0.0);
        assert_eq!(frame["data"]["alive"], 3);
    }

    #[test]
    fn test_ack_frame() {
        let frame: Value = serde_json::from_str(&ack_frame("clear_logs")).unwrap();
        assert_eq!(frame["type"], "clear_logs_ack");
    }

    #[test]
    fn test_parse_text_keepalives() {
        assert_eq!(parse_inbound("ping"), Inbound::TextPing);
        assert_eq!(parse_inbound(" pong "), Inbound::TextPong);
    }

    #[test]
    fn test_parse_json_frames() {
        assert_eq!(
            parse_inbound(r#"{"type":"pause_monitoring"}"#),
            Inbound::Frame(ClientFrame::PauseMonitoring)
        );
        assert_eq!(
            parse_inbound(r#"{"type":"ping"}"#),
            Inbound::Frame(ClientFrame::Ping)
        );
        match parse_inbound(r#"{"type":"get_discovery","page":2}"#) {
            Inbound::Frame(ClientFrame::GetDiscovery { page, .. }) => {
                assert_eq!(page, Some(2));
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_bare_token_is_auth() {
        match parse_inbound(r#"{"token":"abc","fingerprint":"fp"}"#) {
            Inbound::Frame(ClientFrame::Auth { token, fingerprint }) => {
                assert_eq!(token, "abc");
                assert_eq!(fingerprint, "fp");
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_and_garbage() {
        assert_eq!(
            parse_inbound(r#"{"type":"warp_drive"}"#),
            Inbound::Unknown("warp_drive".into())
        );
        assert_eq!(parse_inbound("not json"), Inbound::Garbage);
    }
}

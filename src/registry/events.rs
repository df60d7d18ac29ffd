//! Registry event bus
//!
//! One interface, two backends: an in-process broadcast channel for the
//! hubs and sweeper, mirrored onto the storage pub/sub channel for other
//! processes. Subscribers must tolerate missed events and reconcile by
//! re-reading the registry.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::registry::model::AgentStatus;
use crate::storage::Storage;

const EVENT_CAPACITY: usize = 512;

/// Typed registry event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEvent {
    Registered {
        agent_id: String,
        agent_type: String,
    },
    Heartbeat {
        agent_id: String,
    },
    StatusChange {
        agent_id: String,
        status: AgentStatus,
    },
    Unregistered {
        agent_id: String,
    },
}

impl RegistryEvent {
    /// The agent this event concerns
    #[must_use]
    pub fn agent_id(&self) -> &str {
        match self {
            Self::Registered { agent_id, .. }
            | Self::Heartbeat { agent_id }
            | Self::StatusChange { agent_id, .. }
            | Self::Unregistered { agent_id } => agent_id,
        }
    }
}

/// Fan-out for registry events
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<RegistryEvent>,
    storage: Storage,
}

impl EventBus {
    /// Bus publishing to in-process subscribers and the storage channel
    #[must_use]
    pub fn new(storage: Storage) -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx, storage }
    }

    /// Subscribe to in-process events
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to both backends; never fails the caller
    pub async fn emit(&self, event: RegistryEvent) {
        // In-process send fails only with zero subscribers.
        let _ = self.tx.send(event.clone());

        match serde_json::to_string(&event) {
            Ok(payload) => {
                if let Err(e) = self.storage.publish_event(&payload).await {
                    tracing::debug!(error = %e, "Event publish to storage channel failed");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Event serialization failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_reaches_subscriber() {
        let bus = EventBus::new(Storage::in_memory());
        let mut rx = bus.subscribe();
        bus.emit(RegistryEvent::Heartbeat {
            agent_id: "echo-1".into(),
        })
        .await;
        let event = rx.recv().await.unwrap();
        assert_eq!(event.agent_id(), "echo-1");
    }

    #[test]
    fn test_event_wire_format() {
        let event = RegistryEvent::StatusChange {
            agent_id: "a".into(),
            status: AgentStatus::Dead,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status_change");
        assert_eq!(json["status"], "dead");
    }
}

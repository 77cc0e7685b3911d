//! Event infrastructure.
//!
//! Events are immutable, data-only records. The kernel emits the built-in
//! lifecycle kinds (Initialize, Destroy, AgentSpawned, AgentKilled); embedding
//! applications define their own kinds via [`EventKind::Custom`]. During
//! dispatch an event is shared as `Arc<Event>` between guard evaluation and
//! the behavior units it selects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::AgentId;

/// Event classification used as the key into an agent's behavior registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Delivered once to every agent right after spawn.
    Initialize,
    /// Delivered exactly once to an agent when its destruction is accepted.
    Destroy,
    /// Broadcast to a space when a new member agent has been spawned.
    AgentSpawned,
    /// Broadcast to a space after a member agent has been destroyed.
    AgentKilled,
    /// Application-defined event kind.
    Custom(String),
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Initialize => write!(f, "initialize"),
            EventKind::Destroy => write!(f, "destroy"),
            EventKind::AgentSpawned => write!(f, "agent_spawned"),
            EventKind::AgentKilled => write!(f, "agent_killed"),
            EventKind::Custom(name) => write!(f, "{}", name),
        }
    }
}

/// An immutable occurrence routed to agents through spaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,

    /// Agent the event concerns or originates from. `None` for events the
    /// embedding application submits on its own behalf.
    pub source: Option<AgentId>,

    pub payload: serde_json::Value,

    pub occurred_at: DateTime<Utc>,
}

impl Event {
    /// Create a new event with an arbitrary kind and payload.
    pub fn new(kind: EventKind, source: Option<AgentId>, payload: serde_json::Value) -> Self {
        Self {
            kind,
            source,
            payload,
            occurred_at: Utc::now(),
        }
    }

    /// Application-defined event with a named kind.
    pub fn custom(
        name: impl Into<String>,
        source: Option<AgentId>,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(EventKind::Custom(name.into()), source, payload)
    }

    /// Built-in Initialize event for `agent`.
    pub fn initialize(agent: AgentId) -> Self {
        Self::new(EventKind::Initialize, Some(agent), serde_json::Value::Null)
    }

    /// Built-in Destroy event for `agent`.
    pub fn destroy(agent: AgentId) -> Self {
        Self::new(EventKind::Destroy, Some(agent), serde_json::Value::Null)
    }

    /// Built-in AgentSpawned broadcast; `source` identifies the new agent.
    pub fn agent_spawned(agent: AgentId) -> Self {
        Self::new(EventKind::AgentSpawned, Some(agent), serde_json::Value::Null)
    }

    /// Built-in AgentKilled broadcast; `source` identifies the destroyed agent.
    pub fn agent_killed(agent: AgentId) -> Self {
        Self::new(EventKind::AgentKilled, Some(agent), serde_json::Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_constructors_set_kind_and_source() {
        let agent = AgentId::new();

        let init = Event::initialize(agent);
        assert_eq!(init.kind, EventKind::Initialize);
        assert_eq!(init.source, Some(agent));

        let destroy = Event::destroy(agent);
        assert_eq!(destroy.kind, EventKind::Destroy);
        assert_eq!(destroy.source, Some(agent));
    }

    #[test]
    fn custom_kind_displays_its_name() {
        let event = Event::custom("ping", None, serde_json::json!({"seq": 1}));
        assert_eq!(event.kind.to_string(), "ping");
        assert_eq!(event.payload["seq"], 1);
    }

    #[test]
    fn event_kind_roundtrips_through_serde() {
        let kind = EventKind::Custom("sensor_reading".to_string());
        let json = serde_json::to_string(&kind).unwrap();
        let back: EventKind = serde_json::from_str(&json).unwrap();
        assert_eq!(kind, back);
    }
}

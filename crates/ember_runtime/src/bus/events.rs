//! Bus Events
//!
//! Component change events are published on `<entity>:<component>`, so the
//! bus namespaces them as `<instance>:<entity>:<component>`. Connection
//! events use dotted `player.` topics that never contain a `:`.

use ember_types::ComponentValue;
use serde::{Deserialize, Serialize};

use super::BusEvent;

// ─────────────────────────────────────────────────────────────────────────────
// Component Events
// ─────────────────────────────────────────────────────────────────────────────

/// Which change a [`ComponentEvent`] reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Updated,
    Removed,
}

/// Semantic change to one component of one entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ComponentEvent {
    Added {
        entity_id: String,
        component_name: String,
        value: ComponentValue,
    },
    Updated {
        entity_id: String,
        component_name: String,
        value: ComponentValue,
        previous_value: ComponentValue,
    },
    /// `value` is the last value seen before removal
    Removed {
        entity_id: String,
        component_name: String,
        value: ComponentValue,
    },
}

impl ComponentEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ComponentEvent::Added { .. } => ChangeKind::Added,
            ComponentEvent::Updated { .. } => ChangeKind::Updated,
            ComponentEvent::Removed { .. } => ChangeKind::Removed,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            ComponentEvent::Added { entity_id, .. }
            | ComponentEvent::Updated { entity_id, .. }
            | ComponentEvent::Removed { entity_id, .. } => entity_id,
        }
    }

    pub fn component_name(&self) -> &str {
        match self {
            ComponentEvent::Added { component_name, .. }
            | ComponentEvent::Updated { component_name, .. }
            | ComponentEvent::Removed { component_name, .. } => component_name,
        }
    }

    pub fn value(&self) -> &ComponentValue {
        match self {
            ComponentEvent::Added { value, .. }
            | ComponentEvent::Updated { value, .. }
            | ComponentEvent::Removed { value, .. } => value,
        }
    }

    pub fn previous_value(&self) -> Option<&ComponentValue> {
        match self {
            ComponentEvent::Updated { previous_value, .. } => Some(previous_value),
            _ => None,
        }
    }
}

impl BusEvent for ComponentEvent {
    fn topic(&self) -> String {
        format!("{}:{}", self.entity_id(), self.component_name())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection Events
// ─────────────────────────────────────────────────────────────────────────────

/// A connection was accepted by the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerConnected {
    pub id: String,
}

impl PlayerConnected {
    pub const TOPIC: &'static str = "player.connected";
}

impl BusEvent for PlayerConnected {
    fn topic(&self) -> String {
        Self::TOPIC.to_string()
    }
}

/// One line of input from a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInput {
    pub id: String,
    pub line: String,
}

impl PlayerInput {
    /// Matches input from every connection
    pub const PATTERN: &'static str = "player.*.input";

    pub fn topic_for(id: &str) -> String {
        format!("player.{}.input", id)
    }
}

impl BusEvent for PlayerInput {
    fn topic(&self) -> String {
        Self::topic_for(&self.id)
    }
}

/// The transport layer lost a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerDisconnected {
    pub id: String,
}

impl PlayerDisconnected {
    pub const TOPIC: &'static str = "player.disconnected";
}

impl BusEvent for PlayerDisconnected {
    fn topic(&self) -> String {
        Self::TOPIC.to_string()
    }
}

/// One line of output for a connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerOutput {
    pub id: String,
    pub line: String,
}

impl PlayerOutput {
    pub fn topic_for(id: &str) -> String {
        format!("player.{}.output", id)
    }
}

impl BusEvent for PlayerOutput {
    fn topic(&self) -> String {
        Self::topic_for(&self.id)
    }
}

/// The engine ended a session; the transport should drop the connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClosed {
    pub id: String,
}

impl SessionClosed {
    pub const TOPIC: &'static str = "session.closed";
}

impl BusEvent for SessionClosed {
    fn topic(&self) -> String {
        Self::TOPIC.to_string()
    }
}

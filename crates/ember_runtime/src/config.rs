//! Engine Configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::store::DEFAULT_KEYSPACE_PREFIX;

/// Configuration for one engine instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Namespace prefix for every key and bus topic
    pub instance_id: String,

    /// Channel prefix the store publishes keyspace notifications under
    pub keyspace_prefix: String,

    /// Controller bound to newly connected sessions
    pub initial_controller: String,

    /// Entity type used for session entities
    pub session_entity_type: String,

    /// Upper bound on engine shutdown
    pub shutdown_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            instance_id: "ember".to_string(),
            keyspace_prefix: DEFAULT_KEYSPACE_PREFIX.to_string(),
            initial_controller: "login".to_string(),
            session_entity_type: "session".to_string(),
            shutdown_timeout_ms: 5_000,
        }
    }
}

impl EngineConfig {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            ..Default::default()
        }
    }

    pub fn with_initial_controller(mut self, controller: impl Into<String>) -> Self {
        self.initial_controller = controller.into();
        self
    }

    pub fn with_keyspace_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.keyspace_prefix = prefix.into();
        self
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

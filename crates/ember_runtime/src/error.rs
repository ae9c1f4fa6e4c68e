//! Engine error types

use ember_types::{ScalarKind, ValueError, ValueKind};

use crate::store::StoreError;

/// Errors returned by engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ========================================
    // Entity Errors
    // ========================================
    #[error("Entity '{0}' not found")]
    EntityNotFound(String),

    #[error("Entity '{0}' already exists")]
    EntityExists(String),

    #[error("Entity '{0}' has no 'type' component")]
    EntityTypeRequired(String),

    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    #[error("Entity '{entity}' is a '{expected}', not a '{actual}'")]
    TypeConflict {
        entity: String,
        expected: String,
        actual: String,
    },

    #[error("Invalid {what} '{name}'")]
    InvalidName { what: &'static str, name: String },

    // ========================================
    // Component Errors
    // ========================================
    #[error("Component '{component}' not found on entity '{entity}'")]
    MissingComponent { entity: String, component: String },

    #[error("Component '{component}' on entity '{entity}' is {expected}, not {actual}")]
    TypeMismatch {
        entity: String,
        component: String,
        expected: ValueKind,
        actual: ValueKind,
    },

    #[error("Set '{component}' on entity '{entity}' holds {expected} members, not {actual}")]
    SetMemberMismatch {
        entity: String,
        component: String,
        expected: ScalarKind,
        actual: ScalarKind,
    },

    #[error("Key '{key}' already exists in map '{component}' on entity '{entity}'")]
    MapKeyExists {
        entity: String,
        component: String,
        key: String,
    },

    #[error("Key '{key}' not found in map '{component}' on entity '{entity}'")]
    MapKeyMissing {
        entity: String,
        component: String,
        key: String,
    },

    // ========================================
    // Controller Errors
    // ========================================
    #[error("Controller '{0}' not registered")]
    ControllerNotFound(String),

    // ========================================
    // Transport and Encoding Errors
    // ========================================
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid value: {0}")]
    Value(#[from] ValueError),

    #[error("Shutdown timed out")]
    ShutdownTimeout,

    #[error("{0}")]
    Other(String),
}

impl EngineError {
    pub(crate) fn missing(entity: &str, component: &str) -> Self {
        EngineError::MissingComponent {
            entity: entity.to_string(),
            component: component.to_string(),
        }
    }

    pub(crate) fn mismatch(entity: &str, component: &str, expected: ValueKind, actual: ValueKind) -> Self {
        EngineError::TypeMismatch {
            entity: entity.to_string(),
            component: component.to_string(),
            expected,
            actual,
        }
    }

    /// Whether this error reports something absent rather than a failure
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::EntityNotFound(_) | EngineError::MissingComponent { .. }
        )
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

//! Registry
//!
//! Named entity types, systems and controllers for one engine. The registry
//! is constructed once and shared by reference; registering a name that is
//! already taken replaces the previous entry.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::entity::EntityType;
use crate::session::Controller;
use crate::system::System;
use crate::{EngineError, EngineResult};

#[derive(Default)]
pub struct Registry {
    entity_types: DashMap<String, Arc<dyn EntityType>>,
    systems: DashMap<String, Arc<dyn System>>,
    controllers: DashMap<String, Arc<dyn Controller>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Entity Types
    // ─────────────────────────────────────────────────────────────────────────

    pub fn register_entity_type(&self, entity_type: impl EntityType) {
        let name = entity_type.name().to_string();
        if self
            .entity_types
            .insert(name.clone(), Arc::new(entity_type))
            .is_some()
        {
            info!(entity_type = %name, "Entity type overridden");
        } else {
            info!(entity_type = %name, "Entity type registered");
        }
    }

    /// Register unless the name is taken; returns whether it was registered
    pub fn register_entity_type_if_absent(&self, entity_type: impl EntityType) -> bool {
        let name = entity_type.name().to_string();
        if self.entity_types.contains_key(&name) {
            return false;
        }
        self.entity_types.insert(name, Arc::new(entity_type));
        true
    }

    pub fn entity_type(&self, name: &str) -> EngineResult<Arc<dyn EntityType>> {
        self.entity_types
            .get(name)
            .map(|t| Arc::clone(t.value()))
            .ok_or_else(|| EngineError::UnknownEntityType(name.to_string()))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Systems
    // ─────────────────────────────────────────────────────────────────────────

    pub fn register_system(&self, system: impl System) {
        let name = system.name().to_string();
        if self.systems.insert(name.clone(), Arc::new(system)).is_some() {
            info!(system = %name, "System overridden");
        } else {
            info!(system = %name, "System registered");
        }
    }

    pub fn register_system_if_absent(&self, system: impl System) -> bool {
        let name = system.name().to_string();
        if self.systems.contains_key(&name) {
            return false;
        }
        self.systems.insert(name, Arc::new(system));
        true
    }

    pub fn system(&self, name: &str) -> Option<Arc<dyn System>> {
        self.systems.get(name).map(|s| Arc::clone(s.value()))
    }

    /// Snapshot of all systems ordered by name
    pub fn systems(&self) -> Vec<Arc<dyn System>> {
        let mut systems: Vec<_> = self
            .systems
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        systems.sort_by(|a, b| a.name().cmp(b.name()));
        systems
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Controllers
    // ─────────────────────────────────────────────────────────────────────────

    pub fn register_controller(&self, controller: impl Controller) {
        let name = controller.name().to_string();
        if self
            .controllers
            .insert(name.clone(), Arc::new(controller))
            .is_some()
        {
            info!(controller = %name, "Controller overridden");
        } else {
            info!(controller = %name, "Controller registered");
        }
    }

    pub fn controller(&self, name: &str) -> EngineResult<Arc<dyn Controller>> {
        self.controllers
            .get(name)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| EngineError::ControllerNotFound(name.to_string()))
    }

    pub fn controller_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.controllers.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("entity_types", &self.entity_types.len())
            .field("systems", &self.systems.len())
            .field("controllers", &self.controllers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Defaults;
    use ember_types::ComponentValue;

    struct Named(&'static str, &'static str);

    #[async_trait::async_trait]
    impl System for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn component(&self) -> &str {
            self.1
        }
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = Registry::new();
        registry.register_entity_type(Defaults::new("char").with("hp", 10));
        registry.register_entity_type(Defaults::new("char").with("hp", 20));

        let char_type = registry.entity_type("char").unwrap();
        let defaults = char_type.defaults(&Default::default()).unwrap();
        assert_eq!(defaults.get("hp"), Some(&ComponentValue::Int(20)));
    }

    #[test]
    fn test_if_absent_keeps_existing() {
        let registry = Registry::new();
        registry.register_system(Named("health", "hp"));
        assert!(!registry.register_system_if_absent(Named("health", "mp")));
        assert_eq!(registry.system("health").unwrap().component(), "hp");
        assert!(registry.register_system_if_absent(Named("mana", "mp")));
    }

    #[test]
    fn test_systems_snapshot_sorted() {
        let registry = Registry::new();
        registry.register_system(Named("zeta", "a"));
        registry.register_system(Named("alpha", "b"));
        let names: Vec<_> = registry
            .systems()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_unknown_lookups() {
        let registry = Registry::new();
        assert!(matches!(
            registry.entity_type("ghost"),
            Err(EngineError::UnknownEntityType(_))
        ));
        assert!(matches!(
            registry.controller("ghost"),
            Err(EngineError::ControllerNotFound(_))
        ));
    }
}

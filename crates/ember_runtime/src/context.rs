//! Shared handles passed to systems and controllers

use std::sync::Arc;

use crate::bus::EventBus;
use crate::component::ComponentStore;
use crate::config::EngineConfig;
use crate::entity::EntityRegistry;
use crate::keys::Keyspace;
use crate::registry::Registry;
use crate::session::Session;
use crate::store::BackingStore;

/// Everything a callback needs to read and change the world
#[derive(Clone)]
pub struct Context {
    config: Arc<EngineConfig>,
    store: Arc<dyn BackingStore>,
    bus: EventBus,
    entities: EntityRegistry,
    registry: Arc<Registry>,
}

impl Context {
    pub fn new(config: EngineConfig, store: Arc<dyn BackingStore>, registry: Arc<Registry>) -> Self {
        let keyspace = Keyspace::new(config.instance_id.clone());
        let bus = EventBus::new(Arc::clone(&store), &config.instance_id);
        let components = ComponentStore::new(Arc::clone(&store), keyspace);
        let entities = EntityRegistry::new(components, Arc::clone(&registry));
        Self {
            config: Arc::new(config),
            store,
            bus,
            entities,
            registry,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn components(&self) -> &ComponentStore {
        self.entities.components()
    }

    pub fn entities(&self) -> &EntityRegistry {
        &self.entities
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn keyspace(&self) -> &Keyspace {
        self.components().keyspace()
    }

    /// Handle to the session entity `id`; the entity need not exist yet
    pub fn session(&self, id: impl Into<String>) -> Session {
        Session::new(self.clone(), id.into())
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("instance", &self.config.instance_id)
            .field("registry", &self.registry)
            .finish()
    }
}

//! Ember Runtime
//!
//! The reactive core of a multiplayer text-game engine:
//!
//! - a typed [`ComponentStore`] and an [`EntityRegistry`] layered over a
//!   key-value [`BackingStore`]
//! - a [`ChangeBridge`] turning the store's keyspace notifications into
//!   [`ComponentEvent`]s
//! - an instance-scoped [`EventBus`]
//! - [`System`]s driven by a [`SystemRunner`]
//! - per-connection [`Session`]s switched between named [`Controller`]s
//!
//! An [`Engine`] wires these together for one instance.

pub mod bridge;
pub mod bus;
pub mod component;
pub mod config;
pub mod context;
pub mod engine;
pub mod entity;
pub mod error;
pub mod keys;
pub mod registry;
pub mod session;
pub mod source;
pub mod store;
pub mod system;

pub use ember_types;

pub use bridge::ChangeBridge;
pub use bus::{
    BusEvent, BusMessage, ChangeKind, ComponentEvent, EventBus, PlayerConnected,
    PlayerDisconnected, PlayerInput, PlayerOutput, SessionClosed, Subscription,
};
pub use component::ComponentStore;
pub use config::EngineConfig;
pub use context::Context;
pub use engine::Engine;
pub use entity::{ComponentMap, Defaults, EntityRegistry, EntityType};
pub use error::{EngineError, EngineResult};
pub use registry::Registry;
pub use session::{Controller, ControllerSystem, Session, SessionManager, SessionRecord, SessionType};
pub use source::{DataSource, Documents, MemorySource};
pub use store::{BackingStore, MemoryStore, StoreError, StoreResult};
pub use system::{System, SystemRunner};

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use crate::bus::{ComponentEvent, Subscription};
    use crate::{Context, Engine, EngineConfig, MemoryStore, Registry};

    /// Poll `condition` until it holds, panicking after two seconds
    pub async fn eventually<F: Fn() -> bool>(condition: F) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while !condition() {
            if tokio::time::Instant::now() >= deadline {
                panic!("condition not met within 2s");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    pub fn context() -> (Context, MemoryStore) {
        let store = MemoryStore::new();
        let ctx = Context::new(
            EngineConfig::new("test"),
            Arc::new(store.clone()),
            Arc::new(Registry::new()),
        );
        (ctx, store)
    }

    /// Record every component event published on the bus
    pub async fn collect_events(ctx: &Context) -> (Subscription, Arc<Mutex<Vec<ComponentEvent>>>) {
        let events: Arc<Mutex<Vec<ComponentEvent>>> = Arc::default();
        let sink = Arc::clone(&events);
        let subscription = ctx
            .bus()
            .psubscribe("*:*", move |message| {
                let sink = Arc::clone(&sink);
                async move {
                    sink.lock().push(message.parse()?);
                    Ok(())
                }
            })
            .await
            .unwrap();
        (subscription, events)
    }

    /// Engine on a fresh memory store, started after `configure` ran
    pub async fn running_engine(configure: impl FnOnce(&Registry)) -> Engine {
        let engine = Engine::new(EngineConfig::new("test"), Arc::new(MemoryStore::new()));
        configure(engine.registry().as_ref());
        engine.start().await.unwrap();
        engine
    }
}

//! Engine
//!
//! Wires the store, registry, bridge, system runner and session manager of
//! one engine instance together and runs their lifecycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::bridge::ChangeBridge;
use crate::config::EngineConfig;
use crate::context::Context;
use crate::registry::Registry;
use crate::session::{ControllerSystem, Session, SessionManager, SessionType};
use crate::source::DataSource;
use crate::store::BackingStore;
use crate::system::SystemRunner;
use crate::{EngineError, EngineResult};

pub struct Engine {
    ctx: Context,
    bridge: ChangeBridge,
    systems: SystemRunner,
    sessions: SessionManager,
    running: AtomicBool,
}

impl Engine {
    pub fn new(config: EngineConfig, store: Arc<dyn BackingStore>) -> Self {
        Self::with_registry(config, store, Arc::new(Registry::new()))
    }

    /// Build an engine over a pre-populated registry
    ///
    /// The built-in session type and controller system are only added when
    /// the registry has nothing under their names.
    pub fn with_registry(
        config: EngineConfig,
        store: Arc<dyn BackingStore>,
        registry: Arc<Registry>,
    ) -> Self {
        registry.register_entity_type_if_absent(SessionType::new(
            config.session_entity_type.clone(),
            config.initial_controller.clone(),
        ));
        registry.register_system_if_absent(ControllerSystem);

        let ctx = Context::new(config, store, registry);
        Self {
            bridge: ChangeBridge::new(ctx.clone()),
            systems: SystemRunner::new(ctx.clone()),
            sessions: SessionManager::new(ctx.clone()),
            ctx,
            running: AtomicBool::new(false),
        }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn registry(&self) -> &Arc<Registry> {
        self.ctx.registry()
    }

    pub fn config(&self) -> &EngineConfig {
        self.ctx.config()
    }

    pub fn session(&self, id: impl Into<String>) -> Session {
        self.ctx.session(id)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the bridge, then systems, then sessions
    ///
    /// Once everything listens, removals made while the engine was down are
    /// reported. Systems must be registered before this call.
    pub async fn start(&self) -> EngineResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let started = async {
            self.bridge.start().await?;
            self.systems.start().await?;
            self.sessions.start().await?;
            self.bridge.reconcile().await.map(|_| ())
        }
        .await;

        if let Err(e) = started {
            warn!(error = %e, "Engine failed to start");
            self.shutdown().await;
            self.running.store(false, Ordering::SeqCst);
            return Err(e);
        }

        info!(
            instance = %self.ctx.config().instance_id,
            systems = self.registry().systems().len(),
            controllers = self.registry().controller_names().len(),
            "Engine started"
        );
        Ok(())
    }

    /// Stop in reverse start order, bounded by the shutdown timeout
    pub async fn stop(&self) -> EngineResult<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let timeout = self.ctx.config().shutdown_timeout();
        match tokio::time::timeout(timeout, self.shutdown()).await {
            Ok(()) => {
                info!(instance = %self.ctx.config().instance_id, "Engine stopped");
                Ok(())
            }
            Err(_) => {
                warn!(instance = %self.ctx.config().instance_id, "Engine shutdown timed out");
                Err(EngineError::ShutdownTimeout)
            }
        }
    }

    async fn shutdown(&self) {
        if let Err(e) = self.sessions.stop().await {
            warn!(error = %e, "Failed to stop session manager");
        }
        if let Err(e) = self.systems.stop().await {
            warn!(error = %e, "Failed to stop systems");
        }
        if let Err(e) = self.bridge.stop().await {
            warn!(error = %e, "Failed to stop change bridge");
        }
    }

    /// Copy every document of `source` into the store
    ///
    /// Existing entities are updated in place, new ones added.
    pub async fn seed(&self, source: &dyn DataSource) -> EngineResult<usize> {
        source.start().await?;
        let documents = source.load_all().await;
        let documents = match documents {
            Ok(documents) => documents,
            Err(e) => {
                let _ = source.stop().await;
                return Err(e);
            }
        };

        let count = documents.len();
        let mut result = Ok(count);
        for (id, components) in documents {
            if let Err(e) = self.ctx.entities().update_or_add(&id, components).await {
                warn!(source = %source.name(), entity = %id, error = %e, "Failed to seed entity");
                result = Err(e);
                break;
            }
        }
        source.stop().await?;

        if let Ok(count) = result {
            info!(source = %source.name(), entities = count, "Seeded entities");
        }
        result
    }

    /// Resume every stored session after a restart
    ///
    /// Sessions whose controller fails to resume are stopped and skipped.
    pub async fn resume_sessions(&self) -> EngineResult<usize> {
        let sessions = self
            .ctx
            .entities()
            .all_entities_by_type(&self.ctx.config().session_entity_type)
            .await?;

        let mut resumed = 0;
        for id in sessions.keys() {
            match self.ctx.session(id.as_str()).resume().await {
                Ok(()) => resumed += 1,
                Err(e) => warn!(session = %id, error = %e, "Failed to resume session"),
            }
        }
        info!(sessions = resumed, "Sessions resumed");
        Ok(resumed)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("instance", &self.ctx.config().instance_id)
            .field("running", &self.is_running())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Defaults;
    use crate::session::Controller;
    use crate::source::MemorySource;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use ember_types::{ComponentValue, Components};
    use parking_lot::Mutex;

    fn engine() -> (Engine, MemoryStore) {
        let store = MemoryStore::new();
        let engine = Engine::new(EngineConfig::new("test"), Arc::new(store.clone()));
        (engine, store)
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let (engine, store) = engine();
        engine.start().await.unwrap();
        engine.start().await.unwrap();
        assert!(engine.is_running());
        // bridge, catch-all, controller system, three session topics
        assert_eq!(store.listener_count(), 6);

        engine.stop().await.unwrap();
        engine.stop().await.unwrap();
        assert!(!engine.is_running());
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_start_fails_on_closed_store() {
        let (engine, store) = engine();
        store.close();
        assert!(matches!(engine.start().await, Err(EngineError::Store(_))));
        assert!(!engine.is_running());
    }

    #[tokio::test]
    async fn test_builtins_can_be_overridden() {
        let registry = Arc::new(Registry::new());
        registry.register_entity_type(Defaults::new("session").with("controller", "menu"));
        let engine = Engine::with_registry(
            EngineConfig::new("test"),
            Arc::new(MemoryStore::new()),
            Arc::clone(&registry),
        );

        let components = engine
            .context()
            .entities()
            .create("session", Components::new())
            .unwrap();
        assert_eq!(components.get("controller"), Some(&ComponentValue::from("menu")));
        assert!(engine.registry().system(ControllerSystem::NAME).is_some());
    }

    #[tokio::test]
    async fn test_seed_updates_or_adds() {
        let (engine, _) = engine();
        let entities = engine.context().entities();
        entities
            .add_with_id(
                "r1",
                Components::from([
                    ("type".to_string(), ComponentValue::from("room")),
                    ("name".to_string(), ComponentValue::from("Old Hall")),
                ]),
            )
            .await
            .unwrap();

        let source = MemorySource::from_json(
            "world",
            &serde_json::json!({
                "r1": {"type": "room", "name": "Hall"},
                "r2": {"type": "room", "name": "Cellar"},
            }),
        )
        .unwrap();
        assert_eq!(engine.seed(&source).await.unwrap(), 2);

        assert_eq!(entities.components().get_string("r1", "name").await.unwrap(), "Hall");
        assert_eq!(entities.entity_ids().await.unwrap(), vec!["r1", "r2"]);
    }

    struct Resumable(Arc<Mutex<Vec<String>>>);

    #[async_trait]
    impl Controller for Resumable {
        fn name(&self) -> &str {
            "login"
        }

        async fn handle_input(&self, _: &Session, _: &str) -> EngineResult<()> {
            Ok(())
        }

        async fn resume(&self, session: &Session) -> EngineResult<()> {
            self.0.lock().push(session.id().to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_resume_sessions() {
        let (engine, _) = engine();
        let resumed = Arc::new(Mutex::new(Vec::new()));
        engine
            .registry()
            .register_controller(Resumable(Arc::clone(&resumed)));

        let entities = engine.context().entities();
        for id in ["c1", "c2"] {
            let components = entities.create("session", Components::new()).unwrap();
            entities.add_with_id(id, components).await.unwrap();
        }

        assert_eq!(engine.resume_sessions().await.unwrap(), 2);
        assert_eq!(*resumed.lock(), vec!["c1", "c2"]);
    }
}

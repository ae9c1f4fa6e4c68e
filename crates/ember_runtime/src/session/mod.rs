//! Sessions
//!
//! A session is an entity keyed by its connection id. It carries:
//!
//! - `controller`: name of the active [`Controller`]
//! - `store`: long-lived session state
//! - `flash`: state cleared whenever a controller starts
//! - `connected_at`: connection time in unix milliseconds

mod controller;
mod manager;

pub use controller::{Controller, ControllerSystem};
pub use manager::SessionManager;

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use ember_types::{ComponentValue, Components, Scalar};
use tracing::{debug, info, warn};

use crate::bus::{PlayerOutput, SessionClosed};
use crate::context::Context;
use crate::entity::{int64_field, map_field, string_field, ComponentMap, EntityType};
use crate::{EngineError, EngineResult};

pub const CONTROLLER_COMPONENT: &str = "controller";
pub const STORE_COMPONENT: &str = "store";
pub const FLASH_COMPONENT: &str = "flash";
pub const CONNECTED_AT_COMPONENT: &str = "connected_at";

// ─────────────────────────────────────────────────────────────────────────────
// Session Handle
// ─────────────────────────────────────────────────────────────────────────────

/// Handle to one session entity
#[derive(Clone)]
pub struct Session {
    ctx: Context,
    id: String,
}

impl Session {
    pub(crate) fn new(ctx: Context, id: String) -> Self {
        Self { ctx, id }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub async fn controller_name(&self) -> EngineResult<String> {
        self.ctx
            .components()
            .get_string(&self.id, CONTROLLER_COMPONENT)
            .await
    }

    /// Switch to another controller
    ///
    /// Only records the name; the new controller starts once the change
    /// event reaches [`ControllerSystem`]. Writing the current name again
    /// is not a change and starts nothing.
    pub async fn set_controller(&self, name: &str) -> EngineResult<()> {
        self.ctx.registry().controller(name)?;
        self.ctx
            .components()
            .set(&self.id, CONTROLLER_COMPONENT, name)
            .await?;
        debug!(session = %self.id, controller = %name, "Controller switched");
        Ok(())
    }

    /// Bind the session to its first controller
    pub async fn start(&self, controller: &str) -> EngineResult<()> {
        self.set_controller(controller).await
    }

    /// Forward a line of input to the active controller
    ///
    /// A failing controller stops the session.
    pub async fn handle_input(&self, line: &str) -> EngineResult<()> {
        let controller = self
            .ctx
            .registry()
            .controller(&self.controller_name().await?)?;

        if let Err(e) = controller.handle_input(self, line).await {
            warn!(session = %self.id, controller = %controller.name(), error = %e, "Controller failed; stopping session");
            self.stop().await?;
            return Err(e);
        }
        Ok(())
    }

    /// Let the active controller re-assert itself after a restart
    pub async fn resume(&self) -> EngineResult<()> {
        let controller = self
            .ctx
            .registry()
            .controller(&self.controller_name().await?)?;

        if let Err(e) = controller.resume(self).await {
            warn!(session = %self.id, controller = %controller.name(), error = %e, "Controller resume failed; stopping session");
            self.stop().await?;
            return Err(e);
        }
        Ok(())
    }

    /// Stop the controller, remove the session entity and announce the close
    pub async fn stop(&self) -> EngineResult<()> {
        match self.controller_name().await {
            Ok(name) => match self.ctx.registry().controller(&name) {
                Ok(controller) => {
                    if let Err(e) = controller.stop(self).await {
                        warn!(session = %self.id, controller = %name, error = %e, "Controller stop failed");
                    }
                }
                Err(e) => warn!(session = %self.id, error = %e, "Stopping session without a controller"),
            },
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        match self.ctx.entities().remove(&self.id).await {
            Ok(()) | Err(EngineError::EntityNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        self.ctx
            .bus()
            .publish(&SessionClosed {
                id: self.id.clone(),
            })
            .await?;
        info!(session = %self.id, "Session closed");
        Ok(())
    }

    /// Send a line of output to the connection
    pub async fn send(&self, line: impl Into<String>) -> EngineResult<()> {
        self.ctx
            .bus()
            .publish(&PlayerOutput {
                id: self.id.clone(),
                line: line.into(),
            })
            .await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Store and Flash
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn store_get(&self, key: &str) -> EngineResult<Option<Scalar>> {
        self.ctx
            .components()
            .get_from_map(&self.id, STORE_COMPONENT, key)
            .await
    }

    pub async fn store_set(&self, key: &str, value: impl Into<Scalar>) -> EngineResult<()> {
        self.ctx
            .components()
            .set_in_map(&self.id, STORE_COMPONENT, key, value)
            .await
    }

    pub async fn flash_get(&self, key: &str) -> EngineResult<Option<Scalar>> {
        self.ctx
            .components()
            .get_from_map(&self.id, FLASH_COMPONENT, key)
            .await
    }

    pub async fn flash_set(&self, key: &str, value: impl Into<Scalar>) -> EngineResult<()> {
        self.ctx
            .components()
            .set_in_map(&self.id, FLASH_COMPONENT, key, value)
            .await
    }

    pub async fn record(&self) -> EngineResult<SessionRecord> {
        self.ctx.entities().load_as(&self.id).await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("id", &self.id).finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Record
// ─────────────────────────────────────────────────────────────────────────────

/// Snapshot of a session entity
#[derive(Debug, Clone, PartialEq)]
pub struct SessionRecord {
    pub id: String,
    pub controller: String,
    pub store: BTreeMap<String, Scalar>,
    pub flash: BTreeMap<String, Scalar>,
    pub connected_at: DateTime<Utc>,
}

impl ComponentMap for SessionRecord {
    fn to_components(&self) -> Components {
        Components::from([
            (
                CONTROLLER_COMPONENT.to_string(),
                ComponentValue::String(self.controller.clone()),
            ),
            (
                STORE_COMPONENT.to_string(),
                ComponentValue::Map(self.store.clone()),
            ),
            (
                FLASH_COMPONENT.to_string(),
                ComponentValue::Map(self.flash.clone()),
            ),
            (
                CONNECTED_AT_COMPONENT.to_string(),
                ComponentValue::Int64(self.connected_at.timestamp_millis()),
            ),
        ])
    }

    fn from_components(entity: &str, components: &Components) -> EngineResult<Self> {
        let millis = int64_field(entity, components, CONNECTED_AT_COMPONENT)?;
        let connected_at = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| EngineError::Other(format!("invalid connected_at on '{}'", entity)))?;

        Ok(Self {
            id: entity.to_string(),
            controller: string_field(entity, components, CONTROLLER_COMPONENT)?,
            store: map_field(entity, components, STORE_COMPONENT)?,
            flash: map_field(entity, components, FLASH_COMPONENT)?,
            connected_at,
        })
    }
}

/// Entity type for sessions; new sessions start in the initial controller
#[derive(Debug, Clone)]
pub struct SessionType {
    name: String,
    initial_controller: String,
}

impl SessionType {
    pub fn new(name: impl Into<String>, initial_controller: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial_controller: initial_controller.into(),
        }
    }
}

impl EntityType for SessionType {
    fn name(&self) -> &str {
        &self.name
    }

    fn defaults(&self, _args: &Components) -> EngineResult<Components> {
        let record = SessionRecord {
            id: String::new(),
            controller: self.initial_controller.clone(),
            store: BTreeMap::new(),
            flash: BTreeMap::new(),
            connected_at: Utc::now(),
        };
        Ok(record.to_components())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_round_trip() {
        let record = SessionRecord {
            id: "c1".into(),
            controller: "login".into(),
            store: BTreeMap::from([("account".to_string(), Scalar::from("bob"))]),
            flash: BTreeMap::new(),
            connected_at: Utc.timestamp_millis_opt(1_700_000_000_123).unwrap(),
        };
        let components = record.to_components();
        assert_eq!(
            components.get(CONNECTED_AT_COMPONENT),
            Some(&ComponentValue::Int64(1_700_000_000_123))
        );
        assert_eq!(SessionRecord::from_components("c1", &components).unwrap(), record);
    }

    #[test]
    fn test_session_type_defaults() {
        let session_type = SessionType::new("session", "login");
        let defaults = session_type.defaults(&Components::new()).unwrap();
        assert_eq!(
            defaults.get(CONTROLLER_COMPONENT),
            Some(&ComponentValue::from("login"))
        );
        assert_eq!(defaults.get(FLASH_COMPONENT), Some(&ComponentValue::empty_map()));
        assert!(defaults.contains_key(CONNECTED_AT_COMPONENT));
    }
}

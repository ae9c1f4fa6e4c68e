//! Controllers
//!
//! A controller decides how a session's input is interpreted. The active
//! controller's name lives in the session's `controller` component; writing
//! that component is the only way to switch. [`ControllerSystem`] watches
//! the component and starts the new controller.

use async_trait::async_trait;
use ember_types::ComponentValue;
use tracing::{debug, warn};

use super::{Session, CONTROLLER_COMPONENT, FLASH_COMPONENT};
use crate::bus::ComponentEvent;
use crate::context::Context;
use crate::system::System;
use crate::EngineResult;

#[async_trait]
pub trait Controller: Send + Sync + 'static {
    fn name(&self) -> &str;

    /// The session just switched to this controller
    async fn start(&self, _session: &Session) -> EngineResult<()> {
        Ok(())
    }

    async fn handle_input(&self, session: &Session, line: &str) -> EngineResult<()>;

    /// The engine restarted; re-assert connection state without repeating
    /// the side effects of `start`
    async fn resume(&self, _session: &Session) -> EngineResult<()> {
        Ok(())
    }

    /// The session is being torn down; release anything `start` opened
    async fn stop(&self, _session: &Session) -> EngineResult<()> {
        Ok(())
    }
}

/// Starts a session's controller whenever its `controller` component is
/// written with a new name
pub struct ControllerSystem;

impl ControllerSystem {
    pub const NAME: &'static str = "controller";

    async fn switch(&self, ctx: &Context, event: &ComponentEvent) -> EngineResult<()> {
        let ComponentValue::String(name) = event.value() else {
            warn!(session = %event.entity_id(), value = %event.value(), "Controller component is not a name");
            return Ok(());
        };
        let session = ctx.session(event.entity_id());

        // Only clear flash on a live session; a stale event must not
        // resurrect a removed entity
        if ctx.components().has(session.id(), FLASH_COMPONENT).await? {
            ctx.components()
                .set(session.id(), FLASH_COMPONENT, ComponentValue::empty_map())
                .await?;
        }

        let controller = match ctx.registry().controller(name) {
            Ok(controller) => controller,
            Err(e) => {
                session.stop().await?;
                return Err(e);
            }
        };

        debug!(session = %session.id(), controller = %name, "Starting controller");
        if let Err(e) = controller.start(&session).await {
            warn!(session = %session.id(), controller = %name, error = %e, "Controller start failed; stopping session");
            session.stop().await?;
            return Err(e);
        }
        Ok(())
    }
}

#[async_trait]
impl System for ControllerSystem {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn component(&self) -> &str {
        CONTROLLER_COMPONENT
    }

    async fn matching_component_added(
        &self,
        ctx: &Context,
        event: &ComponentEvent,
    ) -> EngineResult<()> {
        self.switch(ctx, event).await
    }

    async fn matching_component_updated(
        &self,
        ctx: &Context,
        event: &ComponentEvent,
    ) -> EngineResult<()> {
        self.switch(ctx, event).await
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

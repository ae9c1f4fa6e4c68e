//! Systems
//!
//! A system declares one component it is interested in. Every component
//! event reaches every system's unconditional callbacks; the `matching_*`
//! callbacks only run when [`System::matches`] accepts the event.

mod runner;

pub use runner::SystemRunner;

use async_trait::async_trait;
use ember_types::ComponentValue;

use crate::bus::{ChangeKind, ComponentEvent};
use crate::context::Context;
use crate::EngineResult;

#[async_trait]
pub trait System: Send + Sync + 'static {
    /// Unique name; registering the same name again replaces the system
    fn name(&self) -> &str;

    /// Component this system is interested in
    fn component(&self) -> &str;

    /// Whether a change should reach the `matching_*` callbacks
    fn matches(&self, component: &str, _value: &ComponentValue) -> bool {
        component == self.component()
    }

    async fn component_added(&self, _ctx: &Context, _event: &ComponentEvent) -> EngineResult<()> {
        Ok(())
    }

    async fn component_updated(&self, _ctx: &Context, _event: &ComponentEvent) -> EngineResult<()> {
        Ok(())
    }

    async fn component_removed(&self, _ctx: &Context, _event: &ComponentEvent) -> EngineResult<()> {
        Ok(())
    }

    async fn matching_component_added(
        &self,
        _ctx: &Context,
        _event: &ComponentEvent,
    ) -> EngineResult<()> {
        Ok(())
    }

    async fn matching_component_updated(
        &self,
        _ctx: &Context,
        _event: &ComponentEvent,
    ) -> EngineResult<()> {
        Ok(())
    }

    async fn matching_component_removed(
        &self,
        _ctx: &Context,
        _event: &ComponentEvent,
    ) -> EngineResult<()> {
        Ok(())
    }
}

/// Route an event to the unconditional callback for its kind
pub(crate) async fn dispatch(
    system: &dyn System,
    ctx: &Context,
    event: &ComponentEvent,
) -> EngineResult<()> {
    match event.kind() {
        ChangeKind::Added => system.component_added(ctx, event).await,
        ChangeKind::Updated => system.component_updated(ctx, event).await,
        ChangeKind::Removed => system.component_removed(ctx, event).await,
    }
}

/// Route an event to the matching callback for its kind
pub(crate) async fn dispatch_matching(
    system: &dyn System,
    ctx: &Context,
    event: &ComponentEvent,
) -> EngineResult<()> {
    match event.kind() {
        ChangeKind::Added => system.matching_component_added(ctx, event).await,
        ChangeKind::Updated => system.matching_component_updated(ctx, event).await,
        ChangeKind::Removed => system.matching_component_removed(ctx, event).await,
    }
}

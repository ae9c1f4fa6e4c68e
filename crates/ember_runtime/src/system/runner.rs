//! System Runner
//!
//! Owns the bus subscriptions that drive registered systems:
//!
//! - one pattern subscription on `*:*` fanning every component event out to
//!   every system's unconditional callbacks, in name order
//! - one pattern subscription per system on `*:<component>` feeding its
//!   `matching_*` callbacks when [`System::matches`](super::System::matches)
//!   accepts the event
//!
//! Each callback runs in isolation: an error or panic is logged and the
//! remaining systems still see the event.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use super::{dispatch, dispatch_matching};
use crate::bus::{BusMessage, ComponentEvent, Subscription};
use crate::context::Context;
use crate::EngineResult;

pub struct SystemRunner {
    ctx: Context,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl SystemRunner {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.subscriptions.lock().is_empty()
    }

    /// Subscribe every registered system
    ///
    /// Systems registered after this call are only seen by the catch-all
    /// fan-out, not by their own matching subscription.
    pub async fn start(&self) -> EngineResult<()> {
        if self.is_running() {
            return Ok(());
        }

        let mut subscriptions = Vec::new();
        match self.subscribe_all(&mut subscriptions).await {
            Ok(()) => {
                let count = subscriptions.len() - 1;
                self.subscriptions.lock().extend(subscriptions);
                info!(systems = count, "Systems started");
                Ok(())
            }
            Err(e) => {
                for subscription in subscriptions {
                    let _ = subscription.stop().await;
                }
                Err(e)
            }
        }
    }

    async fn subscribe_all(&self, subscriptions: &mut Vec<Subscription>) -> EngineResult<()> {
        let ctx = self.ctx.clone();
        subscriptions.push(
            self.ctx
                .bus()
                .psubscribe("*:*", move |message| {
                    let ctx = ctx.clone();
                    async move {
                        let Some(event) = component_event(&message) else {
                            return Ok(());
                        };
                        for system in ctx.registry().systems() {
                            isolate(system.name(), &event, dispatch(&*system, &ctx, &event)).await;
                        }
                        Ok(())
                    }
                })
                .await?,
        );

        for system in self.ctx.registry().systems() {
            let pattern = format!("*:{}", system.component());
            let ctx = self.ctx.clone();
            let subscription = self
                .ctx
                .bus()
                .psubscribe(&pattern, move |message| {
                    let ctx = ctx.clone();
                    let system = Arc::clone(&system);
                    async move {
                        let Some(event) = component_event(&message) else {
                            return Ok(());
                        };
                        if system.matches(event.component_name(), event.value()) {
                            isolate(
                                system.name(),
                                &event,
                                dispatch_matching(&*system, &ctx, &event),
                            )
                            .await;
                        }
                        Ok(())
                    }
                })
                .await?;
            debug!(system = %subscription.target(), "System subscribed");
            subscriptions.push(subscription);
        }
        Ok(())
    }

    /// Stop every subscription; safe to call repeatedly
    pub async fn stop(&self) -> EngineResult<()> {
        let subscriptions: Vec<_> = self.subscriptions.lock().drain(..).collect();
        if subscriptions.is_empty() {
            return Ok(());
        }

        let mut result = Ok(());
        for subscription in subscriptions {
            if let Err(e) = subscription.stop().await {
                warn!(subscription = %subscription.target(), error = %e, "Failed to stop subscription");
                result = Err(e);
            }
        }
        info!("Systems stopped");
        result
    }
}

fn component_event(message: &BusMessage) -> Option<ComponentEvent> {
    match message.parse() {
        Ok(event) => Some(event),
        Err(e) => {
            trace!(topic = %message.topic, error = %e, "Not a component event");
            None
        }
    }
}

async fn isolate<F>(system: &str, event: &ComponentEvent, callback: F)
where
    F: Future<Output = EngineResult<()>>,
{
    match AssertUnwindSafe(callback).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            warn!(
                system,
                entity = %event.entity_id(),
                component = %event.component_name(),
                error = %e,
                "System callback failed"
            );
        }
        Err(_) => {
            error!(
                system,
                entity = %event.entity_id(),
                component = %event.component_name(),
                "System callback panicked"
            );
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

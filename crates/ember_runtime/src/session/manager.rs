//! Session Manager
//!
//! Bridges connection events from the transport layer to sessions.

use ember_types::Components;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::bus::{PlayerConnected, PlayerDisconnected, PlayerInput, Subscription};
use crate::context::Context;
use crate::EngineResult;

pub struct SessionManager {
    ctx: Context,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl SessionManager {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    pub fn is_running(&self) -> bool {
        !self.subscriptions.lock().is_empty()
    }

    pub async fn start(&self) -> EngineResult<()> {
        if self.is_running() {
            return Ok(());
        }
        let bus = self.ctx.bus();

        let ctx = self.ctx.clone();
        let connected = bus
            .subscribe(PlayerConnected::TOPIC, move |message| {
                let ctx = ctx.clone();
                async move {
                    let event: PlayerConnected = message.parse()?;
                    connect(&ctx, &event.id).await
                }
            })
            .await?;

        let ctx = self.ctx.clone();
        let input = match bus
            .psubscribe(PlayerInput::PATTERN, move |message| {
                let ctx = ctx.clone();
                async move {
                    let event: PlayerInput = message.parse()?;
                    ctx.session(event.id).handle_input(&event.line).await
                }
            })
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                let _ = connected.stop().await;
                return Err(e);
            }
        };

        let ctx = self.ctx.clone();
        let disconnected = match bus
            .subscribe(PlayerDisconnected::TOPIC, move |message| {
                let ctx = ctx.clone();
                async move {
                    let event: PlayerDisconnected = message.parse()?;
                    debug!(session = %event.id, "Connection lost");
                    ctx.session(event.id).stop().await
                }
            })
            .await
        {
            Ok(subscription) => subscription,
            Err(e) => {
                let _ = connected.stop().await;
                let _ = input.stop().await;
                return Err(e);
            }
        };

        self.subscriptions
            .lock()
            .extend([connected, input, disconnected]);
        info!("Session manager started");
        Ok(())
    }

    pub async fn stop(&self) -> EngineResult<()> {
        let subscriptions: Vec<_> = self.subscriptions.lock().drain(..).collect();
        if subscriptions.is_empty() {
            return Ok(());
        }
        for subscription in subscriptions {
            if let Err(e) = subscription.stop().await {
                warn!(subscription = %subscription.target(), error = %e, "Failed to stop subscription");
            }
        }
        info!("Session manager stopped");
        Ok(())
    }
}

/// Create the session for a new connection, or resume an existing one
async fn connect(ctx: &Context, id: &str) -> EngineResult<()> {
    let session = ctx.session(id);
    if ctx.entities().exists(id).await? {
        info!(session = %id, "Session reconnected");
        return session.resume().await;
    }

    let components = ctx
        .entities()
        .create(&ctx.config().session_entity_type, Components::new())?;
    ctx.entities().add_with_id(id, components).await?;
    info!(session = %id, "Session opened");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

//! Change Notification Bridge
//!
//! Turns the backing store's keyspace notifications into [`ComponentEvent`]s.
//! Each component key has a private shadow copy of the last value an event
//! was emitted for; a notification is diffed against it:
//!
//! - no shadow: `Added`, then the shadow is written
//! - shadow equal to the current value: nothing (e.g. re-adding a set member)
//! - shadow differs: `Updated`, then the shadow is overwritten
//! - delete: the shadow is deleted, then `Removed` carries its value
//!
//! Notifications are handled one at a time on a single subscription, so
//! events for one key leave in the order the store applied the writes.
//! Deletes that happen while the bridge is not listening are caught up by
//! [`ChangeBridge::reconcile`].

use ember_types::ComponentValue;
use futures::FutureExt;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

use crate::bus::{ComponentEvent, RawHandler, Subscription};
use crate::context::Context;
use crate::keys::ComponentKey;
use crate::store::{StoreMessage, StoreOp};
use crate::EngineResult;

pub struct ChangeBridge {
    ctx: Context,
    subscription: Mutex<Option<Subscription>>,
}

impl ChangeBridge {
    pub fn new(ctx: Context) -> Self {
        Self {
            ctx,
            subscription: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.subscription.lock().is_some()
    }

    /// Start listening for keyspace notifications; a no-op when running
    pub async fn start(&self) -> EngineResult<()> {
        if self.is_running() {
            return Ok(());
        }

        let prefix = self.ctx.config().keyspace_prefix.clone();
        let pattern = format!("{}{}:*", prefix, self.ctx.keyspace().instance());
        let listener = self.ctx.store().psubscribe(&pattern).await?;

        let ctx = self.ctx.clone();
        let handler: RawHandler = Arc::new(move |message: StoreMessage| {
            let ctx = ctx.clone();
            let prefix = prefix.clone();
            async move { on_notification(&ctx, &prefix, message).await }.boxed()
        });

        let subscription =
            Subscription::spawn(Arc::clone(self.ctx.store()), listener, pattern, handler);

        let extra = {
            let mut slot = self.subscription.lock();
            if slot.is_some() {
                Some(subscription)
            } else {
                *slot = Some(subscription);
                None
            }
        };
        // Lost a race with a concurrent start
        if let Some(extra) = extra {
            return extra.stop().await;
        }
        info!(instance = %self.ctx.keyspace().instance(), "Change bridge started");
        Ok(())
    }

    /// Stop listening; a no-op when not running
    pub async fn stop(&self) -> EngineResult<()> {
        let subscription = self.subscription.lock().take();
        if let Some(subscription) = subscription {
            subscription.stop().await?;
            info!(instance = %self.ctx.keyspace().instance(), "Change bridge stopped");
        }
        Ok(())
    }

    /// Emit `Removed` for every shadow whose component no longer exists
    ///
    /// Catches up on deletes made while nothing was listening, so a later
    /// write of the same component is reported as `Added` again. Returns the
    /// number of shadows swept.
    pub async fn reconcile(&self) -> EngineResult<usize> {
        let keyspace = self.ctx.keyspace();
        let shadows = self.ctx.store().keys(&keyspace.shadow_pattern()).await?;

        let mut swept = 0;
        for shadow_key in shadows {
            let Some(key) = keyspace.parse_shadow(&shadow_key) else {
                continue;
            };
            let value_key = keyspace.component(&key.entity, &key.component);
            if self.ctx.store().exists(&value_key).await? {
                continue;
            }
            if remove_shadow(&self.ctx, &key, &shadow_key).await? {
                swept += 1;
            }
        }

        if swept > 0 {
            info!(instance = %keyspace.instance(), swept, "Swept stale shadows");
        }
        Ok(swept)
    }
}

async fn on_notification(ctx: &Context, prefix: &str, message: StoreMessage) -> EngineResult<()> {
    let Some(key) = message
        .channel
        .strip_prefix(prefix)
        .and_then(|k| ctx.keyspace().parse(k))
    else {
        return Ok(());
    };
    if key.is_internal() {
        return Ok(());
    }
    let Some(op) = StoreOp::parse(&message.payload) else {
        debug!(channel = %message.channel, payload = %message.payload, "Ignoring unknown keyspace operation");
        return Ok(());
    };
    trace!(entity = %key.entity, component = %key.component, op = op.as_str(), "Keyspace notification");

    let shadow_key = ctx
        .keyspace()
        .shadow_key(&key.entity, &key.component);
    if op == StoreOp::Del {
        remove_shadow(ctx, &key, &shadow_key).await?;
        return Ok(());
    }

    // The key was since removed or rewritten as another kind; the
    // notification for that write follows
    let value_key = ctx.keyspace().component(&key.entity, &key.component);
    if ctx.store().kind(&value_key).await? != op.key_kind() {
        trace!(entity = %key.entity, component = %key.component, "Skipping stale notification");
        return Ok(());
    }

    let previous = match ctx.store().get(&shadow_key).await? {
        Some(raw) => Some(serde_json::from_str::<ComponentValue>(&raw)?),
        None => None,
    };
    let current = match ctx.components().get(&key.entity, &key.component).await {
        Ok(value) => value,
        Err(e) if e.is_not_found() => return Ok(()),
        Err(e) => return Err(e),
    };

    let event = match previous {
        None => ComponentEvent::Added {
            entity_id: key.entity.clone(),
            component_name: key.component.clone(),
            value: current.clone(),
        },
        Some(previous) if previous == current => return Ok(()),
        Some(previous) => ComponentEvent::Updated {
            entity_id: key.entity.clone(),
            component_name: key.component.clone(),
            value: current.clone(),
            previous_value: previous,
        },
    };

    emit(ctx, &key, event).await;
    ctx.store()
        .set(&shadow_key, serde_json::to_string(&current)?)
        .await?;
    Ok(())
}

/// Delete a shadow and emit `Removed` with its value
///
/// Only the caller whose delete took the shadow emits, so a sweep racing a
/// delete notification reports the removal once.
async fn remove_shadow(ctx: &Context, key: &ComponentKey, shadow_key: &str) -> EngineResult<bool> {
    let Some(raw) = ctx.store().get(shadow_key).await? else {
        return Ok(false);
    };
    let value: ComponentValue = serde_json::from_str(&raw)?;
    if !ctx.store().del(shadow_key).await? {
        return Ok(false);
    }

    emit(
        ctx,
        key,
        ComponentEvent::Removed {
            entity_id: key.entity.clone(),
            component_name: key.component.clone(),
            value,
        },
    )
    .await;
    Ok(true)
}

/// Publish an event; a failed publish must not leave the shadow stale
async fn emit(ctx: &Context, key: &ComponentKey, event: ComponentEvent) {
    if let Err(e) = ctx.bus().publish(&event).await {
        warn!(
            entity = %key.entity,
            component = %key.component,
            error = %e,
            "Failed to publish component event"
        );
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::ChangeKind;
    use crate::testing::{collect_events, context, eventually};
    use ember_types::Components;

    #[tokio::test]
    async fn test_added_updated_removed() {
        let (ctx, _) = context();
        let bridge = ChangeBridge::new(ctx.clone());
        bridge.start().await.unwrap();
        let (sub, events) = collect_events(&ctx).await;

        let components = ctx.components();
        components.set("p1", "hp", 10).await.unwrap();
        eventually(|| events.lock().len() == 1).await;
        components.set("p1", "hp", 5).await.unwrap();
        eventually(|| events.lock().len() == 2).await;
        components.remove("p1", "hp").await.unwrap();

        eventually(|| events.lock().len() == 3).await;
        let events = events.lock().clone();
        assert_eq!(
            events,
            vec![
                ComponentEvent::Added {
                    entity_id: "p1".into(),
                    component_name: "hp".into(),
                    value: ComponentValue::Int(10),
                },
                ComponentEvent::Updated {
                    entity_id: "p1".into(),
                    component_name: "hp".into(),
                    value: ComponentValue::Int(5),
                    previous_value: ComponentValue::Int(10),
                },
                ComponentEvent::Removed {
                    entity_id: "p1".into(),
                    component_name: "hp".into(),
                    value: ComponentValue::Int(5),
                },
            ]
        );

        sub.stop().await.unwrap();
        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_identical_writes_are_silent() {
        let (ctx, _) = context();
        let bridge = ChangeBridge::new(ctx.clone());
        bridge.start().await.unwrap();
        let (sub, events) = collect_events(&ctx).await;

        let components = ctx.components();
        components.set("p1", "hp", 10).await.unwrap();
        eventually(|| events.lock().len() == 1).await;

        components.set("p1", "hp", 10).await.unwrap();
        components.add_to_set("p1", "tags", "a").await.unwrap();
        components.add_to_set("p1", "tags", "a").await.unwrap();
        components.set("p1", "done", true).await.unwrap();
        eventually(|| events.lock().iter().any(|e| e.component_name() == "done")).await;

        let kinds: Vec<_> = events
            .lock()
            .iter()
            .map(|e| (e.component_name().to_string(), e.kind()))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("hp".to_string(), ChangeKind::Added),
                ("tags".to_string(), ChangeKind::Added),
                ("done".to_string(), ChangeKind::Added),
            ]
        );

        sub.stop().await.unwrap();
        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_element_writes_diff_whole_value() {
        let (ctx, _) = context();
        let bridge = ChangeBridge::new(ctx.clone());
        bridge.start().await.unwrap();
        let (sub, events) = collect_events(&ctx).await;

        let components = ctx.components();
        components.add_to_map("p1", "stats", "str", 12).await.unwrap();
        eventually(|| events.lock().len() == 1).await;
        components.set_in_map("p1", "stats", "dex", 9).await.unwrap();
        eventually(|| events.lock().len() == 2).await;

        let last = events.lock()[1].clone();
        assert_eq!(last.kind(), ChangeKind::Updated);
        assert_eq!(
            last.previous_value(),
            Some(&ComponentValue::map([("str", 12)]))
        );
        assert_eq!(last.value(), &ComponentValue::map([("str", 12), ("dex", 9)]));

        sub.stop().await.unwrap();
        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_shadows_stay_private() {
        let (ctx, store) = context();
        let bridge = ChangeBridge::new(ctx.clone());
        bridge.start().await.unwrap();
        let (sub, events) = collect_events(&ctx).await;

        let args = Components::from([
            ("type".to_string(), ComponentValue::from("char")),
            ("hp".to_string(), ComponentValue::Int(10)),
        ]);
        ctx.entities().add_with_id("p1", args.clone()).await.unwrap();
        eventually(|| events.lock().len() == 2).await;

        // value, type key and shadow per component
        eventually(|| store.len() == 6).await;
        assert_eq!(ctx.entities().all_components("p1").await.unwrap(), args);
        assert!(events.lock().iter().all(|e| e.entity_id() == "p1"));

        ctx.entities().remove("p1").await.unwrap();
        eventually(|| events.lock().len() == 4).await;
        eventually(|| store.is_empty()).await;

        sub.stop().await.unwrap();
        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconcile_sweeps_removals_missed_while_stopped() {
        let (ctx, store) = context();
        let bridge = ChangeBridge::new(ctx.clone());
        bridge.start().await.unwrap();
        let (sub, events) = collect_events(&ctx).await;

        let components = ctx.components();
        components.set("p1", "hp", 10).await.unwrap();
        eventually(|| events.lock().len() == 1).await;
        // value, type key and shadow
        eventually(|| store.len() == 3).await;

        bridge.stop().await.unwrap();
        components.remove("p1", "hp").await.unwrap();
        assert_eq!(store.len(), 1);

        bridge.start().await.unwrap();
        assert_eq!(bridge.reconcile().await.unwrap(), 1);
        assert!(store.is_empty());
        assert_eq!(bridge.reconcile().await.unwrap(), 0);

        components.set("p1", "hp", 3).await.unwrap();
        eventually(|| events.lock().len() == 3).await;
        assert_eq!(
            events.lock()[1..],
            [
                ComponentEvent::Removed {
                    entity_id: "p1".into(),
                    component_name: "hp".into(),
                    value: ComponentValue::Int(10),
                },
                ComponentEvent::Added {
                    entity_id: "p1".into(),
                    component_name: "hp".into(),
                    value: ComponentValue::Int(3),
                },
            ]
        );

        sub.stop().await.unwrap();
        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_reconcile_keeps_live_shadows() {
        let (ctx, store) = context();
        let bridge = ChangeBridge::new(ctx.clone());
        bridge.start().await.unwrap();

        ctx.components().set("p1", "hp", 10).await.unwrap();
        eventually(|| store.len() == 3).await;
        assert_eq!(bridge.reconcile().await.unwrap(), 0);
        assert_eq!(store.len(), 3);

        bridge.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let (ctx, store) = context();
        let bridge = ChangeBridge::new(ctx);
        bridge.start().await.unwrap();
        bridge.start().await.unwrap();
        assert!(bridge.is_running());
        assert_eq!(store.listener_count(), 1);

        bridge.stop().await.unwrap();
        bridge.stop().await.unwrap();
        assert!(!bridge.is_running());
        assert_eq!(store.listener_count(), 0);
    }
}

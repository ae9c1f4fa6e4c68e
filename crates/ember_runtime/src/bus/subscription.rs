//! Subscription handles
//!
//! Every subscription owns one delivery task. The task holds the gate while a
//! callback runs; `stop` clears the active flag and then takes the gate, so
//! once `stop` returns no further callback starts. A callback that stops its
//! own subscription skips the gate and the task exits after it returns.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, trace, warn};

use crate::store::{BackingStore, ListenerId, StoreListener, StoreMessage};
use crate::EngineResult;

/// Handler invoked for every raw store message
pub(crate) type RawHandler =
    Arc<dyn Fn(StoreMessage) -> BoxFuture<'static, EngineResult<()>> + Send + Sync>;

tokio::task_local! {
    static DELIVERING: ListenerId;
}

struct Inner {
    id: ListenerId,
    target: String,
    store: Arc<dyn BackingStore>,
    active: AtomicBool,
    gate: tokio::sync::Mutex<()>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a live subscription
///
/// Subscriptions are never released implicitly; the owner must call
/// [`Subscription::stop`]. Clones share the same subscription.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<Inner>,
}

impl Subscription {
    pub(crate) fn spawn(
        store: Arc<dyn BackingStore>,
        listener: StoreListener,
        target: String,
        handler: RawHandler,
    ) -> Self {
        let inner = Arc::new(Inner {
            id: listener.id,
            target,
            store,
            active: AtomicBool::new(true),
            gate: tokio::sync::Mutex::new(()),
            task: Mutex::new(None),
        });

        let task = tokio::spawn(deliver(Arc::clone(&inner), listener.receiver, handler));
        *inner.task.lock() = Some(task);

        debug!(subscription = %inner.target, id = %inner.id, "Subscription started");
        Self { inner }
    }

    /// Channel or pattern this subscription listens on
    pub fn target(&self) -> &str {
        &self.inner.target
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Stop delivery and release the store listener
    ///
    /// Waits for an in-flight callback to finish unless called from inside
    /// this subscription's own callback. Calling it again is a no-op.
    pub async fn stop(&self) -> EngineResult<()> {
        if !self.inner.active.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let reentrant = DELIVERING
            .try_with(|id| *id == self.inner.id)
            .unwrap_or(false);

        if !reentrant {
            let _gate = self.inner.gate.lock().await;
            if let Some(task) = self.inner.task.lock().take() {
                task.abort();
            }
        }

        self.inner.store.unsubscribe(self.inner.id).await?;
        debug!(subscription = %self.inner.target, id = %self.inner.id, "Subscription stopped");
        Ok(())
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("target", &self.inner.target)
            .field("active", &self.is_active())
            .finish()
    }
}

async fn deliver(
    inner: Arc<Inner>,
    mut receiver: mpsc::UnboundedReceiver<StoreMessage>,
    handler: RawHandler,
) {
    while let Some(message) = receiver.recv().await {
        let _gate = inner.gate.lock().await;
        if !inner.active.load(Ordering::SeqCst) {
            break;
        }

        let channel = message.channel.clone();
        let call = AssertUnwindSafe(handler(message)).catch_unwind();
        match DELIVERING.scope(inner.id, call).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(
                    subscription = %inner.target,
                    channel = %channel,
                    error = %e,
                    "Subscription callback failed"
                );
            }
            Err(_) => {
                error!(
                    subscription = %inner.target,
                    channel = %channel,
                    "Subscription callback panicked"
                );
            }
        }
    }
    trace!(subscription = %inner.target, "Delivery task finished");
}

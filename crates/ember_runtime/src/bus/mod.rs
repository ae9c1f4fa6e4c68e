//! Event Bus
//!
//! Publish/subscribe over the backing store's channels. Payloads are JSON;
//! every topic is namespaced as `<instance>:<topic>`. Delivery is
//! at-most-once: a subscriber that is not listening when a message is
//! published never sees it.

mod events;
mod subscription;

pub use events::*;
pub use subscription::*;

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::trace;

use crate::store::{BackingStore, StoreMessage};
use crate::{EngineError, EngineResult};

/// An event that knows the topic it is published on
pub trait BusEvent: Serialize + Send + Sync {
    /// Topic without the instance prefix
    fn topic(&self) -> String;
}

/// A message delivered to a subscriber
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    /// Topic without the instance prefix
    pub topic: String,
    pub payload: serde_json::Value,
}

impl BusMessage {
    /// Deserialize the payload
    pub fn parse<T: DeserializeOwned>(&self) -> EngineResult<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Instance-scoped publish/subscribe
#[derive(Clone)]
pub struct EventBus {
    store: Arc<dyn BackingStore>,
    prefix: String,
}

impl EventBus {
    pub fn new(store: Arc<dyn BackingStore>, instance: &str) -> Self {
        Self {
            store,
            prefix: format!("{}:", instance),
        }
    }

    /// Namespaced channel name for a topic
    pub fn topic(&self, topic: &str) -> String {
        format!("{}{}", self.prefix, topic)
    }

    /// Publish an event on its own topic, returning the receiver count
    pub async fn publish<E: BusEvent>(&self, event: &E) -> EngineResult<usize> {
        self.publish_to(&event.topic(), event).await
    }

    /// Publish any serializable payload on a topic
    pub async fn publish_to<T: Serialize + ?Sized>(
        &self,
        topic: &str,
        payload: &T,
    ) -> EngineResult<usize> {
        let payload = serde_json::to_string(payload)?;
        let channel = self.topic(topic);
        let receivers = self.store.publish(&channel, payload).await?;
        trace!(topic = %channel, receivers, "Published");
        Ok(receivers)
    }

    /// Listen on one exact topic
    pub async fn subscribe<F, Fut>(&self, topic: &str, callback: F) -> EngineResult<Subscription>
    where
        F: Fn(BusMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<()>> + Send + 'static,
    {
        let channel = self.topic(topic);
        let listener = self.store.subscribe(&channel).await?;
        Ok(Subscription::spawn(
            Arc::clone(&self.store),
            listener,
            channel,
            self.handler(callback),
        ))
    }

    /// Listen on every topic matching a glob pattern
    pub async fn psubscribe<F, Fut>(&self, pattern: &str, callback: F) -> EngineResult<Subscription>
    where
        F: Fn(BusMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<()>> + Send + 'static,
    {
        let channel = self.topic(pattern);
        let listener = self.store.psubscribe(&channel).await?;
        Ok(Subscription::spawn(
            Arc::clone(&self.store),
            listener,
            channel,
            self.handler(callback),
        ))
    }

    fn handler<F, Fut>(&self, callback: F) -> RawHandler
    where
        F: Fn(BusMessage) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = EngineResult<()>> + Send + 'static,
    {
        let prefix = self.prefix.clone();
        Arc::new(move |message: StoreMessage| {
            let decoded = serde_json::from_str(&message.payload).map(|payload| BusMessage {
                topic: message
                    .channel
                    .strip_prefix(&prefix)
                    .unwrap_or(&message.channel)
                    .to_string(),
                payload,
            });
            match decoded {
                Ok(message) => callback(message).boxed(),
                Err(e) => futures::future::ready(Err(EngineError::from(e))).boxed(),
            }
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

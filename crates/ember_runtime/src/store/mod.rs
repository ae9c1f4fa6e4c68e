//! Backing Store
//!
//! The shared key-value store every other layer is built on. A store holds
//! string, hash and set keys, offers channel pub/sub, and reports each write
//! on a keyspace notification channel (`<prefix><key>`, payload = operation).
//!
//! Network stores live outside this crate; [`MemoryStore`] is the in-process
//! implementation.

mod memory;

pub use memory::*;

use std::collections::{HashMap, HashSet};
use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Default channel prefix for keyspace notifications
pub const DEFAULT_KEYSPACE_PREFIX: &str = "__keyspace@0__:";

// ─────────────────────────────────────────────────────────────────────────────
// Store Error
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Key '{key}' holds a {actual} value, not a {expected}")]
    WrongKind {
        key: String,
        expected: KeyKind,
        actual: KeyKind,
    },

    #[error("Store closed")]
    Closed,

    #[error("Backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

// ─────────────────────────────────────────────────────────────────────────────
// Key Kinds and Operations
// ─────────────────────────────────────────────────────────────────────────────

/// Data kind of a stored key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    String,
    Hash,
    Set,
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyKind::String => write!(f, "string"),
            KeyKind::Hash => write!(f, "hash"),
            KeyKind::Set => write!(f, "set"),
        }
    }
}

/// Write operation reported on the keyspace notification feed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Set,
    HSet,
    HDel,
    SAdd,
    SRem,
    Del,
}

impl StoreOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreOp::Set => "set",
            StoreOp::HSet => "hset",
            StoreOp::HDel => "hdel",
            StoreOp::SAdd => "sadd",
            StoreOp::SRem => "srem",
            StoreOp::Del => "del",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "set" => Some(StoreOp::Set),
            "hset" => Some(StoreOp::HSet),
            "hdel" => Some(StoreOp::HDel),
            "sadd" => Some(StoreOp::SAdd),
            "srem" => Some(StoreOp::SRem),
            "del" => Some(StoreOp::Del),
            _ => None,
        }
    }

    /// Data kind the operation writes, `None` for deletes
    pub fn key_kind(&self) -> Option<KeyKind> {
        match self {
            StoreOp::Set => Some(KeyKind::String),
            StoreOp::HSet | StoreOp::HDel => Some(KeyKind::Hash),
            StoreOp::SAdd | StoreOp::SRem => Some(KeyKind::Set),
            StoreOp::Del => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Pub/Sub
// ─────────────────────────────────────────────────────────────────────────────

/// Identifier of one store-level listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A message received on a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMessage {
    /// Channel the message was published on
    pub channel: String,
    /// Pattern that matched, for pattern listeners
    pub pattern: Option<String>,
    pub payload: String,
}

/// A live channel listener; messages arrive on `receiver` until
/// [`BackingStore::unsubscribe`] is called with `id`
pub struct StoreListener {
    pub id: ListenerId,
    pub receiver: mpsc::UnboundedReceiver<StoreMessage>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Backing Store Trait
// ─────────────────────────────────────────────────────────────────────────────

/// Operations the engine requires from a key-value store
///
/// Stores are expected to serialize writes to a single key and to deliver
/// keyspace notifications for one key in write order.
#[async_trait]
pub trait BackingStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: String) -> StoreResult<()>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Delete a key of any kind, returning whether it existed
    async fn del(&self, key: &str) -> StoreResult<bool>;

    async fn kind(&self, key: &str) -> StoreResult<Option<KeyKind>>;

    /// All keys matching a glob pattern
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>>;

    async fn hgetall(&self, key: &str) -> StoreResult<Option<HashMap<String, String>>>;

    async fn hexists(&self, key: &str, field: &str) -> StoreResult<bool>;

    /// Set one field, returning whether the field is new
    async fn hset(&self, key: &str, field: &str, value: String) -> StoreResult<bool>;

    /// Set one field only if absent, returning whether it was written
    async fn hsetnx(&self, key: &str, field: &str, value: String) -> StoreResult<bool>;

    /// Replace the whole hash, creating it if needed
    async fn hreplace(&self, key: &str, fields: HashMap<String, String>) -> StoreResult<()>;

    async fn hdel(&self, key: &str, field: &str) -> StoreResult<bool>;

    async fn smembers(&self, key: &str) -> StoreResult<Option<HashSet<String>>>;

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Add one member, returning whether it is new
    async fn sadd(&self, key: &str, member: String) -> StoreResult<bool>;

    /// Replace the whole set, creating it if needed
    async fn sreplace(&self, key: &str, members: HashSet<String>) -> StoreResult<()>;

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Publish a payload, returning the number of listeners reached
    async fn publish(&self, channel: &str, payload: String) -> StoreResult<usize>;

    async fn subscribe(&self, channel: &str) -> StoreResult<StoreListener>;

    async fn psubscribe(&self, pattern: &str) -> StoreResult<StoreListener>;

    /// Release a listener; unknown ids are ignored
    async fn unsubscribe(&self, id: ListenerId) -> StoreResult<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_names_parse_back() {
        for op in [
            StoreOp::Set,
            StoreOp::HSet,
            StoreOp::HDel,
            StoreOp::SAdd,
            StoreOp::SRem,
            StoreOp::Del,
        ] {
            assert_eq!(StoreOp::parse(op.as_str()), Some(op));
        }
        assert_eq!(StoreOp::parse("expire"), None);
    }

    #[test]
    fn test_op_key_kinds() {
        assert_eq!(StoreOp::HDel.key_kind(), Some(KeyKind::Hash));
        assert_eq!(StoreOp::SAdd.key_kind(), Some(KeyKind::Set));
        assert_eq!(StoreOp::Del.key_kind(), None);
    }
}

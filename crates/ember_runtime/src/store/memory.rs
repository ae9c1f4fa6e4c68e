//! In-memory backing store
//!
//! Keys live behind one mutex. Keyspace notifications are published while
//! that mutex is held, so notifications for a key leave in write order.
//! Hashes and sets stay present when their last element is removed.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;
use wildmatch::WildMatch;

use super::{
    BackingStore, KeyKind, ListenerId, StoreError, StoreListener, StoreMessage, StoreOp,
    StoreResult, DEFAULT_KEYSPACE_PREFIX,
};

enum Entry {
    String(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
}

impl Entry {
    fn kind(&self) -> KeyKind {
        match self {
            Entry::String(_) => KeyKind::String,
            Entry::Hash(_) => KeyKind::Hash,
            Entry::Set(_) => KeyKind::Set,
        }
    }
}

enum Target {
    Channel(String),
    Pattern(String, WildMatch),
}

struct Listener {
    target: Target,
    tx: mpsc::UnboundedSender<StoreMessage>,
}

struct Inner {
    keys: Mutex<HashMap<String, Entry>>,
    listeners: DashMap<ListenerId, Listener>,
    next_listener: AtomicU64,
    keyspace_prefix: Option<String>,
    closed: AtomicBool,
}

/// In-process [`BackingStore`]
///
/// Cloning yields another handle to the same keyspace.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a store emitting notifications under the default prefix
    pub fn new() -> Self {
        Self::build(Some(DEFAULT_KEYSPACE_PREFIX.to_string()))
    }

    pub fn with_keyspace_prefix(prefix: impl Into<String>) -> Self {
        Self::build(Some(prefix.into()))
    }

    /// Create a store that emits no keyspace notifications
    pub fn without_notifications() -> Self {
        Self::build(None)
    }

    fn build(keyspace_prefix: Option<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                keys: Mutex::new(HashMap::new()),
                listeners: DashMap::new(),
                next_listener: AtomicU64::new(1),
                keyspace_prefix,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Refuse all further operations and drop every listener
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.listeners.clear();
    }

    /// Number of live listeners
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Number of keys currently stored
    pub fn len(&self) -> usize {
        self.inner.keys.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check_open(&self) -> StoreResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            Err(StoreError::Closed)
        } else {
            Ok(())
        }
    }

    fn deliver(&self, channel: &str, payload: &str) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for entry in self.inner.listeners.iter() {
            let pattern = match &entry.value().target {
                Target::Channel(c) if c == channel => None,
                Target::Pattern(p, matcher) if matcher.matches(channel) => Some(p.clone()),
                _ => continue,
            };

            let message = StoreMessage {
                channel: channel.to_string(),
                pattern,
                payload: payload.to_string(),
            };
            match entry.value().tx.send(message) {
                Ok(()) => delivered += 1,
                Err(_) => dead.push(*entry.key()),
            }
        }

        for id in dead {
            self.inner.listeners.remove(&id);
        }

        delivered
    }

    /// Must be called with the key lock held
    fn notify(&self, key: &str, op: StoreOp) {
        if let Some(prefix) = &self.inner.keyspace_prefix {
            trace!(key, op = op.as_str(), "keyspace notification");
            self.deliver(&format!("{}{}", prefix, key), op.as_str());
        }
    }

    fn listen(&self, target: Target) -> StoreResult<StoreListener> {
        self.check_open()?;
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        let (tx, receiver) = mpsc::unbounded_channel();
        self.inner.listeners.insert(id, Listener { target, tx });
        Ok(StoreListener { id, receiver })
    }
}

fn wrong_kind(key: &str, expected: KeyKind, actual: &Entry) -> StoreError {
    StoreError::WrongKind {
        key: key.to_string(),
        expected,
        actual: actual.kind(),
    }
}

#[async_trait]
impl BackingStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check_open()?;
        match self.inner.keys.lock().get(key) {
            None => Ok(None),
            Some(Entry::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(wrong_kind(key, KeyKind::String, other)),
        }
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        self.check_open()?;
        let mut keys = self.inner.keys.lock();
        keys.insert(key.to_string(), Entry::String(value));
        self.notify(key, StoreOp::Set);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        self.check_open()?;
        Ok(self.inner.keys.lock().contains_key(key))
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        self.check_open()?;
        let mut keys = self.inner.keys.lock();
        let existed = keys.remove(key).is_some();
        if existed {
            self.notify(key, StoreOp::Del);
        }
        Ok(existed)
    }

    async fn kind(&self, key: &str) -> StoreResult<Option<KeyKind>> {
        self.check_open()?;
        Ok(self.inner.keys.lock().get(key).map(Entry::kind))
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.check_open()?;
        let matcher = WildMatch::new(pattern);
        let mut found: Vec<String> = self
            .inner
            .keys
            .lock()
            .keys()
            .filter(|k| matcher.matches(k))
            .cloned()
            .collect();
        found.sort();
        Ok(found)
    }

    async fn hget(&self, key: &str, field: &str) -> StoreResult<Option<String>> {
        self.check_open()?;
        match self.inner.keys.lock().get(key) {
            None => Ok(None),
            Some(Entry::Hash(h)) => Ok(h.get(field).cloned()),
            Some(other) => Err(wrong_kind(key, KeyKind::Hash, other)),
        }
    }

    async fn hgetall(&self, key: &str) -> StoreResult<Option<HashMap<String, String>>> {
        self.check_open()?;
        match self.inner.keys.lock().get(key) {
            None => Ok(None),
            Some(Entry::Hash(h)) => Ok(Some(h.clone())),
            Some(other) => Err(wrong_kind(key, KeyKind::Hash, other)),
        }
    }

    async fn hexists(&self, key: &str, field: &str) -> StoreResult<bool> {
        Ok(self.hget(key, field).await?.is_some())
    }

    async fn hset(&self, key: &str, field: &str, value: String) -> StoreResult<bool> {
        self.check_open()?;
        let mut keys = self.inner.keys.lock();
        let entry = keys
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(HashMap::new()));
        let hash = match entry {
            Entry::Hash(hash) => hash,
            other => return Err(wrong_kind(key, KeyKind::Hash, other)),
        };
        let is_new = hash.insert(field.to_string(), value).is_none();
        self.notify(key, StoreOp::HSet);
        Ok(is_new)
    }

    async fn hsetnx(&self, key: &str, field: &str, value: String) -> StoreResult<bool> {
        self.check_open()?;
        let mut keys = self.inner.keys.lock();
        let entry = keys
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(HashMap::new()));
        let hash = match entry {
            Entry::Hash(hash) => hash,
            other => return Err(wrong_kind(key, KeyKind::Hash, other)),
        };
        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value);
        self.notify(key, StoreOp::HSet);
        Ok(true)
    }

    async fn hreplace(&self, key: &str, fields: HashMap<String, String>) -> StoreResult<()> {
        self.check_open()?;
        let mut keys = self.inner.keys.lock();
        if let Some(existing) = keys.get(key) {
            if existing.kind() != KeyKind::Hash {
                return Err(wrong_kind(key, KeyKind::Hash, existing));
            }
        }
        keys.insert(key.to_string(), Entry::Hash(fields));
        self.notify(key, StoreOp::HSet);
        Ok(())
    }

    async fn hdel(&self, key: &str, field: &str) -> StoreResult<bool> {
        self.check_open()?;
        let mut keys = self.inner.keys.lock();
        let removed = match keys.get_mut(key) {
            None => false,
            Some(Entry::Hash(h)) => h.remove(field).is_some(),
            Some(other) => return Err(wrong_kind(key, KeyKind::Hash, other)),
        };
        if removed {
            self.notify(key, StoreOp::HDel);
        }
        Ok(removed)
    }

    async fn smembers(&self, key: &str) -> StoreResult<Option<HashSet<String>>> {
        self.check_open()?;
        match self.inner.keys.lock().get(key) {
            None => Ok(None),
            Some(Entry::Set(s)) => Ok(Some(s.clone())),
            Some(other) => Err(wrong_kind(key, KeyKind::Set, other)),
        }
    }

    async fn sismember(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check_open()?;
        match self.inner.keys.lock().get(key) {
            None => Ok(false),
            Some(Entry::Set(s)) => Ok(s.contains(member)),
            Some(other) => Err(wrong_kind(key, KeyKind::Set, other)),
        }
    }

    async fn sadd(&self, key: &str, member: String) -> StoreResult<bool> {
        self.check_open()?;
        let mut keys = self.inner.keys.lock();
        let entry = keys
            .entry(key.to_string())
            .or_insert_with(|| Entry::Set(HashSet::new()));
        let set = match entry {
            Entry::Set(set) => set,
            other => return Err(wrong_kind(key, KeyKind::Set, other)),
        };
        let is_new = set.insert(member);
        // Re-adding a member still reports the write
        self.notify(key, StoreOp::SAdd);
        Ok(is_new)
    }

    async fn sreplace(&self, key: &str, members: HashSet<String>) -> StoreResult<()> {
        self.check_open()?;
        let mut keys = self.inner.keys.lock();
        if let Some(existing) = keys.get(key) {
            if existing.kind() != KeyKind::Set {
                return Err(wrong_kind(key, KeyKind::Set, existing));
            }
        }
        keys.insert(key.to_string(), Entry::Set(members));
        self.notify(key, StoreOp::SAdd);
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> StoreResult<bool> {
        self.check_open()?;
        let mut keys = self.inner.keys.lock();
        let removed = match keys.get_mut(key) {
            None => false,
            Some(Entry::Set(s)) => s.remove(member),
            Some(other) => return Err(wrong_kind(key, KeyKind::Set, other)),
        };
        if removed {
            self.notify(key, StoreOp::SRem);
        }
        Ok(removed)
    }

    async fn publish(&self, channel: &str, payload: String) -> StoreResult<usize> {
        self.check_open()?;
        Ok(self.deliver(channel, &payload))
    }

    async fn subscribe(&self, channel: &str) -> StoreResult<StoreListener> {
        self.listen(Target::Channel(channel.to_string()))
    }

    async fn psubscribe(&self, pattern: &str) -> StoreResult<StoreListener> {
        self.listen(Target::Pattern(pattern.to_string(), WildMatch::new(pattern)))
    }

    async fn unsubscribe(&self, id: ListenerId) -> StoreResult<bool> {
        Ok(self.inner.listeners.remove(&id).is_some())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

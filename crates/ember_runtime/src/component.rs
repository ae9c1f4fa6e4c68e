//! Component Store
//!
//! Maps `(entity, component)` to a typed value in the backing store. The
//! value's kind is written to a private type key before the value itself, so
//! later writes can be checked against it without reading the value.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use ember_types::{
    check_homogeneous, decode_scalar_value, encode_scalar_value, ComponentValue, Components,
    Scalar, ValueKind,
};
use tracing::{debug, trace};

use crate::keys::{validate_component_name, validate_entity_id, Keyspace};
use crate::store::BackingStore;
use crate::{EngineError, EngineResult};

/// Typed component access over a [`BackingStore`]
#[derive(Clone)]
pub struct ComponentStore {
    store: Arc<dyn BackingStore>,
    keys: Keyspace,
}

impl ComponentStore {
    pub fn new(store: Arc<dyn BackingStore>, keys: Keyspace) -> Self {
        Self { store, keys }
    }

    pub fn keyspace(&self) -> &Keyspace {
        &self.keys
    }

    pub(crate) fn backing(&self) -> &Arc<dyn BackingStore> {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Whole-value access
    // ─────────────────────────────────────────────────────────────────────────

    /// Recorded kind of a component, `None` if it does not exist
    pub async fn kind_of(&self, entity: &str, name: &str) -> EngineResult<Option<ValueKind>> {
        match self.store.get(&self.keys.type_key(entity, name)).await? {
            Some(raw) => Ok(Some(raw.parse()?)),
            None => Ok(None),
        }
    }

    pub async fn has(&self, entity: &str, name: &str) -> EngineResult<bool> {
        Ok(self.store.exists(&self.keys.component(entity, name)).await?)
    }

    /// Write a component, establishing its kind on first write
    pub async fn set(
        &self,
        entity: &str,
        name: &str,
        value: impl Into<ComponentValue>,
    ) -> EngineResult<()> {
        let value = value.into();
        if let ComponentValue::Set(set) = &value {
            check_homogeneous(set)?;
        }
        self.ensure_kind(entity, name, value.kind()).await?;

        let key = self.keys.component(entity, name);
        match &value {
            ComponentValue::Map(map) => {
                let fields: HashMap<String, String> =
                    map.iter().map(|(k, v)| (k.clone(), v.encode())).collect();
                self.store.hreplace(&key, fields).await?;
            }
            ComponentValue::Set(set) => {
                let members: HashSet<String> = set.iter().map(Scalar::encode).collect();
                self.store.sreplace(&key, members).await?;
            }
            scalar => {
                if let Some(raw) = encode_scalar_value(scalar) {
                    self.store.set(&key, raw).await?;
                }
            }
        }

        trace!(entity, component = name, kind = %value.kind(), "Component written");
        Ok(())
    }

    pub async fn get(&self, entity: &str, name: &str) -> EngineResult<ComponentValue> {
        let kind = self
            .kind_of(entity, name)
            .await?
            .ok_or_else(|| EngineError::missing(entity, name))?;
        self.read(entity, name, kind)
            .await?
            .ok_or_else(|| EngineError::missing(entity, name))
    }

    /// Read a component's value, `None` if it vanished after its kind was read
    pub(crate) async fn read(
        &self,
        entity: &str,
        name: &str,
        kind: ValueKind,
    ) -> EngineResult<Option<ComponentValue>> {
        let key = self.keys.component(entity, name);
        let value = match kind {
            ValueKind::Map => match self.store.hgetall(&key).await? {
                Some(fields) => Some(ComponentValue::Map(
                    fields
                        .iter()
                        .map(|(k, v)| Scalar::decode(v).map(|s| (k.clone(), s)))
                        .collect::<Result<BTreeMap<_, _>, _>>()?,
                )),
                None => None,
            },
            ValueKind::Set => match self.store.smembers(&key).await? {
                Some(members) => Some(ComponentValue::Set(
                    members
                        .iter()
                        .map(|m| Scalar::decode(m))
                        .collect::<Result<BTreeSet<_>, _>>()?,
                )),
                None => None,
            },
            scalar => match self.store.get(&key).await? {
                Some(raw) => Some(decode_scalar_value(scalar, &raw)?),
                None => None,
            },
        };
        Ok(value)
    }

    /// Delete a component and its type key
    pub async fn remove(&self, entity: &str, name: &str) -> EngineResult<()> {
        let existed = self.store.del(&self.keys.component(entity, name)).await?;
        let typed = self.store.del(&self.keys.type_key(entity, name)).await?;
        if !existed && !typed {
            return Err(EngineError::missing(entity, name));
        }
        debug!(entity, component = name, "Component removed");
        Ok(())
    }

    /// Names of every component stored for an entity
    pub async fn component_names(&self, entity: &str) -> EngineResult<Vec<String>> {
        let keys = self.store.keys(&self.keys.entity_pattern(entity)).await?;
        Ok(keys
            .iter()
            .filter_map(|k| self.keys.parse(k))
            .filter(|k| k.entity == entity)
            .map(|k| k.component)
            .collect())
    }

    /// Every component of an entity; empty if the entity does not exist
    pub async fn all(&self, entity: &str) -> EngineResult<Components> {
        let mut components = Components::new();
        for name in self.component_names(entity).await? {
            match self.get(entity, &name).await {
                Ok(value) => {
                    components.insert(name, value);
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(components)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Typed getters
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn get_string(&self, entity: &str, name: &str) -> EngineResult<String> {
        match self.get(entity, name).await? {
            ComponentValue::String(s) => Ok(s),
            other => Err(EngineError::mismatch(entity, name, other.kind(), ValueKind::String)),
        }
    }

    pub async fn get_int(&self, entity: &str, name: &str) -> EngineResult<i32> {
        match self.get(entity, name).await? {
            ComponentValue::Int(i) => Ok(i),
            other => Err(EngineError::mismatch(entity, name, other.kind(), ValueKind::Int)),
        }
    }

    pub async fn get_int64(&self, entity: &str, name: &str) -> EngineResult<i64> {
        match self.get(entity, name).await? {
            ComponentValue::Int64(i) => Ok(i),
            other => Err(EngineError::mismatch(entity, name, other.kind(), ValueKind::Int64)),
        }
    }

    pub async fn get_bool(&self, entity: &str, name: &str) -> EngineResult<bool> {
        match self.get(entity, name).await? {
            ComponentValue::Bool(b) => Ok(b),
            other => Err(EngineError::mismatch(entity, name, other.kind(), ValueKind::Bool)),
        }
    }

    pub async fn get_map(&self, entity: &str, name: &str) -> EngineResult<BTreeMap<String, Scalar>> {
        match self.get(entity, name).await? {
            ComponentValue::Map(m) => Ok(m),
            other => Err(EngineError::mismatch(entity, name, other.kind(), ValueKind::Map)),
        }
    }

    pub async fn get_set(&self, entity: &str, name: &str) -> EngineResult<BTreeSet<Scalar>> {
        match self.get(entity, name).await? {
            ComponentValue::Set(s) => Ok(s),
            other => Err(EngineError::mismatch(entity, name, other.kind(), ValueKind::Set)),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Map elements
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a new key to a map component, creating the map if needed
    pub async fn add_to_map(
        &self,
        entity: &str,
        name: &str,
        key: &str,
        value: impl Into<Scalar>,
    ) -> EngineResult<()> {
        self.ensure_kind(entity, name, ValueKind::Map).await?;
        let written = self
            .store
            .hsetnx(&self.keys.component(entity, name), key, value.into().encode())
            .await?;
        if !written {
            return Err(EngineError::MapKeyExists {
                entity: entity.to_string(),
                component: name.to_string(),
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Overwrite an existing key of a map component
    pub async fn update_in_map(
        &self,
        entity: &str,
        name: &str,
        key: &str,
        value: impl Into<Scalar>,
    ) -> EngineResult<()> {
        self.expect_kind(entity, name, ValueKind::Map).await?;
        let map_key = self.keys.component(entity, name);
        if !self.store.hexists(&map_key, key).await? {
            return Err(self.map_key_missing(entity, name, key));
        }
        self.store.hset(&map_key, key, value.into().encode()).await?;
        Ok(())
    }

    /// Insert or overwrite a key of a map component, creating the map if needed
    pub async fn set_in_map(
        &self,
        entity: &str,
        name: &str,
        key: &str,
        value: impl Into<Scalar>,
    ) -> EngineResult<()> {
        self.ensure_kind(entity, name, ValueKind::Map).await?;
        self.store
            .hset(&self.keys.component(entity, name), key, value.into().encode())
            .await?;
        Ok(())
    }

    pub async fn remove_from_map(&self, entity: &str, name: &str, key: &str) -> EngineResult<()> {
        self.expect_kind(entity, name, ValueKind::Map).await?;
        if !self.store.hdel(&self.keys.component(entity, name), key).await? {
            return Err(self.map_key_missing(entity, name, key));
        }
        Ok(())
    }

    pub async fn get_from_map(
        &self,
        entity: &str,
        name: &str,
        key: &str,
    ) -> EngineResult<Option<Scalar>> {
        self.expect_kind(entity, name, ValueKind::Map).await?;
        match self.store.hget(&self.keys.component(entity, name), key).await? {
            Some(raw) => Ok(Some(Scalar::decode(&raw)?)),
            None => Ok(None),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Set elements
    // ─────────────────────────────────────────────────────────────────────────

    /// Add a member to a set component, creating the set if needed
    pub async fn add_to_set(
        &self,
        entity: &str,
        name: &str,
        member: impl Into<Scalar>,
    ) -> EngineResult<bool> {
        let member = member.into();
        self.ensure_kind(entity, name, ValueKind::Set).await?;

        let key = self.keys.component(entity, name);
        if let Some(existing) = self.store.smembers(&key).await? {
            if let Some(first) = existing.iter().next() {
                let expected = Scalar::decode(first)?.kind();
                if expected != member.kind() {
                    return Err(EngineError::SetMemberMismatch {
                        entity: entity.to_string(),
                        component: name.to_string(),
                        expected,
                        actual: member.kind(),
                    });
                }
            }
        }

        Ok(self.store.sadd(&key, member.encode()).await?)
    }

    /// Remove a member, returning whether it was present
    pub async fn remove_from_set(
        &self,
        entity: &str,
        name: &str,
        member: impl Into<Scalar>,
    ) -> EngineResult<bool> {
        self.expect_kind(entity, name, ValueKind::Set).await?;
        Ok(self
            .store
            .srem(&self.keys.component(entity, name), &member.into().encode())
            .await?)
    }

    pub async fn set_contains(
        &self,
        entity: &str,
        name: &str,
        member: impl Into<Scalar>,
    ) -> EngineResult<bool> {
        self.expect_kind(entity, name, ValueKind::Set).await?;
        Ok(self
            .store
            .sismember(&self.keys.component(entity, name), &member.into().encode())
            .await?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Kind bookkeeping
    // ─────────────────────────────────────────────────────────────────────────

    /// Check the recorded kind, recording `kind` if the component is new
    async fn ensure_kind(&self, entity: &str, name: &str, kind: ValueKind) -> EngineResult<()> {
        validate_entity_id(entity)?;
        validate_component_name(name)?;
        match self.kind_of(entity, name).await? {
            Some(existing) if existing != kind => {
                Err(EngineError::mismatch(entity, name, existing, kind))
            }
            Some(_) => Ok(()),
            None => {
                self.store
                    .set(&self.keys.type_key(entity, name), kind.as_str().to_string())
                    .await?;
                Ok(())
            }
        }
    }

    /// Check the recorded kind of a component that must already exist
    async fn expect_kind(&self, entity: &str, name: &str, kind: ValueKind) -> EngineResult<()> {
        match self.kind_of(entity, name).await? {
            None => Err(EngineError::missing(entity, name)),
            Some(existing) if existing != kind => {
                Err(EngineError::mismatch(entity, name, existing, kind))
            }
            Some(_) => Ok(()),
        }
    }

    fn map_key_missing(&self, entity: &str, name: &str, key: &str) -> EngineError {
        EngineError::MapKeyMissing {
            entity: entity.to_string(),
            component: name.to_string(),
            key: key.to_string(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use tokio_test::assert_ok;

    fn components() -> (ComponentStore, MemoryStore) {
        let store = MemoryStore::new();
        (
            ComponentStore::new(Arc::new(store.clone()), Keyspace::new("test")),
            store,
        )
    }

    #[tokio::test]
    async fn test_set_get_remove_every_kind() {
        let (cs, _) = components();
        let values = vec![
            ComponentValue::from("bob"),
            ComponentValue::Int(10),
            ComponentValue::Int64(1 << 40),
            ComponentValue::Bool(true),
            ComponentValue::map([("str", 12), ("dex", 9)]),
            ComponentValue::set(["sword", "shield"]).unwrap(),
            ComponentValue::empty_map(),
        ];

        for (i, value) in values.into_iter().enumerate() {
            let name = format!("c{}", i);
            cs.set("p1", &name, value.clone()).await.unwrap();
            assert!(cs.has("p1", &name).await.unwrap());
            assert_eq!(cs.get("p1", &name).await.unwrap(), value);
            assert_eq!(cs.kind_of("p1", &name).await.unwrap(), Some(value.kind()));

            cs.remove("p1", &name).await.unwrap();
            assert!(!cs.has("p1", &name).await.unwrap());
            assert_eq!(cs.kind_of("p1", &name).await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_type_mismatch_never_coerces() {
        let (cs, _) = components();
        cs.set("p1", "hp", 10).await.unwrap();

        let err = cs.set("p1", "hp", "ten").await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::TypeMismatch { expected: ValueKind::Int, actual: ValueKind::String, .. }
        ));

        let err = cs.set("p1", "hp", 10i64).await.unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch { actual: ValueKind::Int64, .. }));

        let err = cs.add_to_set("p1", "hp", "x").await.unwrap_err();
        assert!(matches!(err, EngineError::TypeMismatch { actual: ValueKind::Set, .. }));

        assert_eq!(cs.get("p1", "hp").await.unwrap(), ComponentValue::Int(10));
    }

    #[tokio::test]
    async fn test_missing_component() {
        let (cs, _) = components();
        assert!(matches!(
            cs.get("p1", "hp").await,
            Err(EngineError::MissingComponent { .. })
        ));
        assert!(matches!(
            cs.remove("p1", "hp").await,
            Err(EngineError::MissingComponent { .. })
        ));
    }

    #[tokio::test]
    async fn test_typed_getters() {
        let (cs, _) = components();
        cs.set("p1", "name", "bob").await.unwrap();
        cs.set("p1", "hp", 10).await.unwrap();
        cs.set("p1", "gold", 5_000_000_000i64).await.unwrap();
        cs.set("p1", "admin", false).await.unwrap();

        assert_eq!(cs.get_string("p1", "name").await.unwrap(), "bob");
        assert_eq!(cs.get_int("p1", "hp").await.unwrap(), 10);
        assert_eq!(cs.get_int64("p1", "gold").await.unwrap(), 5_000_000_000);
        assert!(!cs.get_bool("p1", "admin").await.unwrap());
        assert!(matches!(
            cs.get_int("p1", "name").await,
            Err(EngineError::TypeMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_map_elements() {
        let (cs, _) = components();

        cs.add_to_map("p1", "stats", "str", 12).await.unwrap();
        let err = cs.add_to_map("p1", "stats", "str", 13).await.unwrap_err();
        assert!(matches!(err, EngineError::MapKeyExists { ref key, .. } if key == "str"));

        let err = cs.update_in_map("p1", "stats", "dex", 9).await.unwrap_err();
        assert!(matches!(err, EngineError::MapKeyMissing { ref key, .. } if key == "dex"));

        cs.update_in_map("p1", "stats", "str", 14).await.unwrap();
        cs.set_in_map("p1", "stats", "dex", 9).await.unwrap();
        assert_eq!(
            cs.get_map("p1", "stats").await.unwrap(),
            BTreeMap::from([("dex".to_string(), Scalar::Int(9)), ("str".to_string(), Scalar::Int(14))])
        );
        assert_eq!(cs.get_from_map("p1", "stats", "dex").await.unwrap(), Some(Scalar::Int(9)));

        cs.remove_from_map("p1", "stats", "dex").await.unwrap();
        assert!(matches!(
            cs.remove_from_map("p1", "stats", "dex").await,
            Err(EngineError::MapKeyMissing { .. })
        ));
        assert!(matches!(
            cs.update_in_map("p1", "nothing", "k", 1).await,
            Err(EngineError::MissingComponent { .. })
        ));
    }

    #[tokio::test]
    async fn test_set_elements() {
        let (cs, _) = components();

        assert!(cs.add_to_set("p1", "items", "sword").await.unwrap());
        assert!(!cs.add_to_set("p1", "items", "sword").await.unwrap());
        assert!(cs.set_contains("p1", "items", "sword").await.unwrap());

        let err = cs.add_to_set("p1", "items", 7).await.unwrap_err();
        assert!(matches!(err, EngineError::SetMemberMismatch { .. }));

        assert!(cs.remove_from_set("p1", "items", "sword").await.unwrap());
        assert!(!cs.remove_from_set("p1", "items", "sword").await.unwrap());
        assert!(cs.has("p1", "items").await.unwrap());
        assert!(cs.get_set("p1", "items").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_type_keys_stay_private() {
        let (cs, store) = components();
        cs.set("p1", "hp", 10).await.unwrap();
        cs.set("p1", "name", "bob").await.unwrap();

        assert_eq!(cs.component_names("p1").await.unwrap(), vec!["hp", "name"]);
        let all = assert_ok!(cs.all("p1").await);
        assert_eq!(all.len(), 2);
        // value + type key per component
        assert_eq!(store.len(), 4);
    }

    #[tokio::test]
    async fn test_invalid_names_rejected() {
        let (cs, _) = components();
        assert!(matches!(
            cs.set("__type", "hp", 1).await,
            Err(EngineError::InvalidName { .. })
        ));
        assert!(matches!(
            cs.set("p1", "a:b", 1).await,
            Err(EngineError::InvalidName { .. })
        ));
    }
}

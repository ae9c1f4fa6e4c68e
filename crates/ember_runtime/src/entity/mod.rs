//! Entity Registry
//!
//! Entity lifecycle on top of the [`ComponentStore`]. An entity exists while
//! it has at least one component; every entity carries a string `type`
//! component naming the [`EntityType`] it was built from.
//!
//! The query helpers scan the keyspace and are meant for bootstrap and
//! administration, not per-event work.

mod types;

pub use types::*;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use ember_types::{check_homogeneous, ComponentValue, Components, ValueKind};
use tracing::{debug, info, warn};

use crate::component::ComponentStore;
use crate::keys::{validate_component_name, validate_entity_id, TYPE_COMPONENT};
use crate::registry::Registry;
use crate::{EngineError, EngineResult};

#[derive(Clone)]
pub struct EntityRegistry {
    components: ComponentStore,
    registry: Arc<Registry>,
}

impl EntityRegistry {
    pub fn new(components: ComponentStore, registry: Arc<Registry>) -> Self {
        Self {
            components,
            registry,
        }
    }

    pub fn components(&self) -> &ComponentStore {
        &self.components
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Construction
    // ─────────────────────────────────────────────────────────────────────────

    /// Compute the components of a new entity without touching the store
    ///
    /// `args` override the type's defaults and `type` is always set to the
    /// type's name.
    pub fn create(&self, entity_type: &str, args: Components) -> EngineResult<Components> {
        let constructor = self.registry.entity_type(entity_type)?;
        let mut components = constructor.defaults(&args)?;
        components.extend(args);
        components.insert(
            TYPE_COMPONENT.to_string(),
            ComponentValue::String(entity_type.to_string()),
        );
        Ok(components)
    }

    /// Create an entity of `entity_type` under a fresh id
    pub async fn add(&self, entity_type: &str, args: Components) -> EngineResult<String> {
        let components = self.create(entity_type, args)?;
        let id = uuid::Uuid::new_v4().to_string();
        self.add_with_id(&id, components).await?;
        Ok(id)
    }

    /// Store `components` as a new entity
    pub async fn add_with_id(&self, id: &str, components: Components) -> EngineResult<()> {
        validate_entity_id(id)?;
        if self.exists(id).await? {
            return Err(EngineError::EntityExists(id.to_string()));
        }
        let entity_type = type_of(id, &components)?;
        validate_components(&components)?;

        // `type` first so no typeless entity is ever visible
        let mut ordered: Vec<_> = components.into_iter().collect();
        ordered.sort_by_key(|(name, _)| name != TYPE_COMPONENT);

        let mut written: Vec<String> = Vec::with_capacity(ordered.len());
        for (name, value) in ordered {
            if let Err(e) = self.components.set(id, &name, value).await {
                warn!(entity = %id, component = %name, error = %e, "Entity add failed, rolling back");
                for name in written.iter().rev() {
                    if let Err(e) = self.remove_component(id, name).await {
                        warn!(entity = %id, component = %name, error = %e, "Rollback failed");
                    }
                }
                return Err(e);
            }
            written.push(name);
        }

        info!(entity = %id, entity_type = %entity_type, "Entity added");
        Ok(())
    }

    /// Replace an entity's components with `components`
    ///
    /// Stored components absent from `components` are removed. The entity's
    /// type must not change; use [`EntityRegistry::replace`] for that.
    pub async fn update(&self, id: &str, components: Components) -> EngineResult<()> {
        let stored = self.components.component_names(id).await?;
        if stored.is_empty() {
            return Err(EngineError::EntityNotFound(id.to_string()));
        }
        let entity_type = type_of(id, &components)?;
        self.check_type(id, &entity_type).await?;
        validate_components(&components)?;
        self.check_kinds(id, &components).await?;

        for (name, value) in &components {
            self.components.set(id, name, value.clone()).await?;
        }
        for name in stored.iter().filter(|n| !components.contains_key(*n)) {
            self.remove_component(id, name).await?;
        }

        debug!(entity = %id, "Entity updated");
        Ok(())
    }

    /// Remove the entity if present, then add it again with `components`
    pub async fn replace(&self, id: &str, components: Components) -> EngineResult<()> {
        type_of(id, &components)?;
        validate_components(&components)?;
        match self.remove(id).await {
            Ok(()) | Err(EngineError::EntityNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        self.add_with_id(id, components).await
    }

    pub async fn update_or_add(&self, id: &str, components: Components) -> EngineResult<()> {
        if self.exists(id).await? {
            self.update(id, components).await
        } else {
            self.add_with_id(id, components).await
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Removal
    // ─────────────────────────────────────────────────────────────────────────

    /// Remove every component of an entity, `type` last
    pub async fn remove(&self, id: &str) -> EngineResult<()> {
        let mut names = self.components.component_names(id).await?;
        if names.is_empty() {
            return Err(EngineError::EntityNotFound(id.to_string()));
        }
        names.sort_by_key(|n| n == TYPE_COMPONENT);

        for name in &names {
            self.remove_component(id, name).await?;
        }

        info!(entity = %id, "Entity removed");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Bulk Component Helpers
    // ─────────────────────────────────────────────────────────────────────────

    /// Write several components on an existing entity
    pub async fn add_components(&self, id: &str, components: Components) -> EngineResult<()> {
        if !self.exists(id).await? {
            return Err(EngineError::EntityNotFound(id.to_string()));
        }
        if let Some(value) = components.get(TYPE_COMPONENT) {
            let entity_type = type_string(id, value)?;
            self.check_type(id, &entity_type).await?;
        }
        validate_components(&components)?;
        self.check_kinds(id, &components).await?;

        for (name, value) in components {
            self.components.set(id, &name, value).await?;
        }
        Ok(())
    }

    /// Remove several components from an existing entity
    ///
    /// The `type` component can only go away with the whole entity.
    pub async fn remove_components<I, S>(&self, id: &str, names: I) -> EngineResult<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !self.exists(id).await? {
            return Err(EngineError::EntityNotFound(id.to_string()));
        }
        let names: Vec<S> = names.into_iter().collect();
        if names.iter().any(|n| n.as_ref() == TYPE_COMPONENT) {
            return Err(EngineError::EntityTypeRequired(id.to_string()));
        }
        for name in &names {
            self.components.remove(id, name.as_ref()).await?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn exists(&self, id: &str) -> EngineResult<bool> {
        Ok(!self.components.component_names(id).await?.is_empty())
    }

    /// Every component of an entity
    pub async fn all_components(&self, id: &str) -> EngineResult<Components> {
        let components = self.components.all(id).await?;
        if components.is_empty() {
            return Err(EngineError::EntityNotFound(id.to_string()));
        }
        Ok(components)
    }

    /// Ids of every entity with a `type` component
    pub async fn entity_ids(&self) -> EngineResult<Vec<String>> {
        let keyspace = self.components.keyspace();
        let keys = self
            .components
            .backing()
            .keys(&keyspace.component_pattern(TYPE_COMPONENT))
            .await?;

        let ids: BTreeSet<String> = keys
            .iter()
            .filter_map(|k| keyspace.parse(k))
            .filter(|k| !k.is_internal() && k.component == TYPE_COMPONENT)
            .map(|k| k.entity)
            .collect();
        Ok(ids.into_iter().collect())
    }

    pub async fn all_entities_by_type(
        &self,
        entity_type: &str,
    ) -> EngineResult<BTreeMap<String, Components>> {
        let mut entities = BTreeMap::new();
        for id in self.entity_ids().await? {
            let components = match self.components.all(&id).await {
                Ok(components) => components,
                Err(e) if e.is_not_found() => continue,
                Err(e) => return Err(e),
            };
            if components.get(TYPE_COMPONENT).and_then(ComponentValue::as_str) == Some(entity_type) {
                entities.insert(id, components);
            }
        }
        Ok(entities)
    }

    /// Entities of `entity_type` whose `component` equals `value`
    pub async fn all_entities_by_type_with_component_value(
        &self,
        entity_type: &str,
        component: &str,
        value: &ComponentValue,
    ) -> EngineResult<BTreeMap<String, Components>> {
        let mut entities = self.all_entities_by_type(entity_type).await?;
        entities.retain(|_, components| components.get(component) == Some(value));
        Ok(entities)
    }

    /// Load an entity through its [`ComponentMap`] mapping
    pub async fn load_as<T: ComponentMap>(&self, id: &str) -> EngineResult<T> {
        let components = self.all_components(id).await?;
        T::from_components(id, &components)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────────

    async fn check_type(&self, id: &str, entity_type: &str) -> EngineResult<()> {
        let stored = self.components.get_string(id, TYPE_COMPONENT).await?;
        if stored != entity_type {
            return Err(EngineError::TypeConflict {
                entity: id.to_string(),
                expected: stored,
                actual: entity_type.to_string(),
            });
        }
        Ok(())
    }

    /// Reject the whole write before anything lands if any kind differs
    async fn check_kinds(&self, id: &str, components: &Components) -> EngineResult<()> {
        for (name, value) in components {
            if let Some(kind) = self.components.kind_of(id, name).await? {
                if kind != value.kind() {
                    return Err(EngineError::mismatch(id, name, kind, value.kind()));
                }
            }
        }
        Ok(())
    }

    async fn remove_component(&self, id: &str, name: &str) -> EngineResult<()> {
        match self.components.remove(id, name).await {
            Ok(()) | Err(EngineError::MissingComponent { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn type_of(id: &str, components: &Components) -> EngineResult<String> {
    let value = components
        .get(TYPE_COMPONENT)
        .ok_or_else(|| EngineError::EntityTypeRequired(id.to_string()))?;
    type_string(id, value)
}

fn type_string(id: &str, value: &ComponentValue) -> EngineResult<String> {
    match value {
        ComponentValue::String(s) if !s.is_empty() => Ok(s.clone()),
        ComponentValue::String(_) => Err(EngineError::EntityTypeRequired(id.to_string())),
        other => Err(EngineError::mismatch(
            id,
            TYPE_COMPONENT,
            ValueKind::String,
            other.kind(),
        )),
    }
}

/// Reject bad names and mixed sets before anything is written
fn validate_components(components: &Components) -> EngineResult<()> {
    for (name, value) in components {
        validate_component_name(name)?;
        if let ComponentValue::Set(members) = value {
            check_homogeneous(members)?;
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::Keyspace;
    use crate::store::BackingStore;
    use ember_types::Scalar;
    use crate::store::MemoryStore;

    fn entities() -> EntityRegistry {
        let registry = Arc::new(Registry::new());
        registry.register_entity_type(Defaults::new("char").with("hp", 10).with("mp", 5));
        let components = ComponentStore::new(Arc::new(MemoryStore::new()), Keyspace::new("test"));
        EntityRegistry::new(components, registry)
    }

    fn char_components(hp: i32) -> Components {
        Components::from([
            ("type".to_string(), ComponentValue::from("char")),
            ("hp".to_string(), ComponentValue::Int(hp)),
        ])
    }

    #[tokio::test]
    async fn test_add_with_id_rejects_existing() {
        let entities = entities();
        entities.add_with_id("p1", char_components(10)).await.unwrap();

        let err = entities.add_with_id("p1", Components::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::EntityExists(ref id) if id == "p1"));
        let err = entities.add_with_id("p1", char_components(1)).await.unwrap_err();
        assert!(matches!(err, EngineError::EntityExists(_)));
    }

    #[tokio::test]
    async fn test_add_with_id_requires_type() {
        let entities = entities();
        let components = Components::from([("hp".to_string(), ComponentValue::Int(1))]);
        assert!(matches!(
            entities.add_with_id("p1", components).await,
            Err(EngineError::EntityTypeRequired(_))
        ));
        assert!(!entities.exists("p1").await.unwrap());
    }

    #[tokio::test]
    async fn test_add_with_id_writes_nothing_on_invalid_value() {
        let entities = entities();
        let mut components = char_components(10);
        components.insert(
            "tags".into(),
            ComponentValue::Set([Scalar::Int(1), Scalar::from("a")].into()),
        );

        assert!(matches!(
            entities.add_with_id("p1", components).await,
            Err(EngineError::Value(_))
        ));
        assert!(!entities.exists("p1").await.unwrap());
        assert!(!entities.components().has("p1", "hp").await.unwrap());

        entities.add_with_id("p1", char_components(10)).await.unwrap();
        assert_eq!(entities.all_components("p1").await.unwrap(), char_components(10));
    }

    #[tokio::test]
    async fn test_add_with_id_rolls_back_partial_write() {
        let store = MemoryStore::new();
        let registry = Arc::new(Registry::new());
        let components = ComponentStore::new(Arc::new(store.clone()), Keyspace::new("test"));
        let entities = EntityRegistry::new(components, registry);

        // A leftover type key makes the `hp` write fail after `type` landed
        store
            .set("test:__type:p1:hp", "string".to_string())
            .await
            .unwrap();

        assert!(matches!(
            entities.add_with_id("p1", char_components(10)).await,
            Err(EngineError::TypeMismatch { .. })
        ));
        assert!(!entities.exists("p1").await.unwrap());
        assert!(!entities.components().has("p1", "type").await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_keeps_entity_on_invalid_value() {
        let entities = entities();
        entities.add_with_id("p1", char_components(10)).await.unwrap();

        let mut components = char_components(3);
        components.insert(
            "tags".into(),
            ComponentValue::Set([Scalar::from(true), Scalar::from("a")].into()),
        );
        assert!(entities.replace("p1", components.clone()).await.is_err());
        assert!(entities.update("p1", components.clone()).await.is_err());
        assert!(entities.add_components("p1", components).await.is_err());
        assert_eq!(entities.all_components("p1").await.unwrap(), char_components(10));
    }

    #[tokio::test]
    async fn test_create_merges_defaults() {
        let entities = entities();
        let components = entities
            .create("char", Components::from([("hp".to_string(), ComponentValue::Int(3))]))
            .unwrap();
        assert_eq!(components.get("hp"), Some(&ComponentValue::Int(3)));
        assert_eq!(components.get("mp"), Some(&ComponentValue::Int(5)));
        assert_eq!(components.get("type"), Some(&ComponentValue::from("char")));

        assert!(matches!(
            entities.create("ghost", Components::new()),
            Err(EngineError::UnknownEntityType(_))
        ));
    }

    #[tokio::test]
    async fn test_add_generates_id() {
        let entities = entities();
        let id = entities.add("char", Components::new()).await.unwrap();
        let components = entities.all_components(&id).await.unwrap();
        assert_eq!(components.len(), 3);
        assert_eq!(entities.entity_ids().await.unwrap(), vec![id]);
    }

    #[tokio::test]
    async fn test_update_replaces_by_diff() {
        let entities = entities();
        let mut components = char_components(10);
        components.insert("mp".into(), ComponentValue::Int(5));
        entities.add_with_id("p1", components).await.unwrap();

        entities.update("p1", char_components(4)).await.unwrap();
        let stored = entities.all_components("p1").await.unwrap();
        assert_eq!(stored, char_components(4));
    }

    #[tokio::test]
    async fn test_update_errors() {
        let entities = entities();
        assert!(matches!(
            entities.update("p1", char_components(1)).await,
            Err(EngineError::EntityNotFound(_))
        ));

        entities.add_with_id("p1", char_components(10)).await.unwrap();

        let mut other = char_components(1);
        other.insert("type".into(), "room".into());
        let err = entities.update("p1", other).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::TypeConflict { ref expected, ref actual, .. } if expected == "char" && actual == "room"
        ));

        // hp is an int; nothing may be written when one kind is wrong
        let mut wrong = char_components(1);
        wrong.insert("hp".into(), "lots".into());
        wrong.insert("name".into(), "bob".into());
        assert!(matches!(
            entities.update("p1", wrong).await,
            Err(EngineError::TypeMismatch { .. })
        ));
        assert!(!entities.components().has("p1", "name").await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_may_change_type() {
        let entities = entities();
        entities.add_with_id("p1", char_components(10)).await.unwrap();

        let room = Components::from([
            ("type".to_string(), ComponentValue::from("room")),
            ("hp".to_string(), ComponentValue::from("n/a")),
        ]);
        entities.replace("p1", room.clone()).await.unwrap();
        assert_eq!(entities.all_components("p1").await.unwrap(), room);

        assert!(matches!(
            entities.replace("p1", Components::new()).await,
            Err(EngineError::EntityTypeRequired(_))
        ));
        assert!(entities.exists("p1").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove() {
        let entities = entities();
        entities.add_with_id("p1", char_components(10)).await.unwrap();

        entities.remove("p1").await.unwrap();
        assert!(!entities.components().has("p1", "hp").await.unwrap());
        assert!(matches!(
            entities.remove("p1").await,
            Err(EngineError::EntityNotFound(_))
        ));
        assert!(entities.entity_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_or_add() {
        let entities = entities();
        entities.update_or_add("p1", char_components(10)).await.unwrap();
        entities.update_or_add("p1", char_components(7)).await.unwrap();
        assert_eq!(entities.components().get_int("p1", "hp").await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_bulk_helpers() {
        let entities = entities();
        entities.add_with_id("p1", char_components(10)).await.unwrap();

        entities
            .add_components(
                "p1",
                Components::from([
                    ("mp".to_string(), ComponentValue::Int(3)),
                    ("name".to_string(), ComponentValue::from("bob")),
                ]),
            )
            .await
            .unwrap();
        assert_eq!(entities.all_components("p1").await.unwrap().len(), 4);

        entities.remove_components("p1", ["mp", "name"]).await.unwrap();
        assert_eq!(entities.all_components("p1").await.unwrap(), char_components(10));

        assert!(matches!(
            entities.remove_components("p1", ["type"]).await,
            Err(EngineError::EntityTypeRequired(_))
        ));
        assert!(matches!(
            entities.add_components("p2", Components::new()).await,
            Err(EngineError::EntityNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_queries_by_type() {
        let entities = entities();
        entities.add_with_id("p1", char_components(10)).await.unwrap();
        entities.add_with_id("p2", char_components(4)).await.unwrap();
        entities
            .add_with_id(
                "r1",
                Components::from([("type".to_string(), ComponentValue::from("room"))]),
            )
            .await
            .unwrap();

        assert_eq!(entities.entity_ids().await.unwrap(), vec!["p1", "p2", "r1"]);

        let chars = entities.all_entities_by_type("char").await.unwrap();
        assert_eq!(chars.keys().collect::<Vec<_>>(), vec!["p1", "p2"]);

        let weak = entities
            .all_entities_by_type_with_component_value("char", "hp", &ComponentValue::Int(4))
            .await
            .unwrap();
        assert_eq!(weak.keys().collect::<Vec<_>>(), vec!["p2"]);
    }
}

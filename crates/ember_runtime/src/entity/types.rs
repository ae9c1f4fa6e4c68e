//! Entity types and struct mappings

use ember_types::{ComponentValue, Components, Scalar, ValueKind};
use std::collections::BTreeMap;

use crate::{EngineError, EngineResult};

/// A named constructor for the default components of new entities
///
/// Implementations must be pure: they compute components from `args` and
/// never touch the store. The registry merges `args` over the returned
/// defaults and adds the `type` component itself.
pub trait EntityType: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn defaults(&self, args: &Components) -> EngineResult<Components>;
}

/// Entity type with a fixed set of default components
#[derive(Debug, Clone)]
pub struct Defaults {
    name: String,
    components: Components,
}

impl Defaults {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            components: Components::new(),
        }
    }

    pub fn with(mut self, component: impl Into<String>, value: impl Into<ComponentValue>) -> Self {
        self.components.insert(component.into(), value.into());
        self
    }
}

impl EntityType for Defaults {
    fn name(&self) -> &str {
        &self.name
    }

    fn defaults(&self, _args: &Components) -> EngineResult<Components> {
        Ok(self.components.clone())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Struct Mapping
// ─────────────────────────────────────────────────────────────────────────────

/// Hand-written conversion between a struct and an entity's components
pub trait ComponentMap: Sized {
    fn to_components(&self) -> Components;

    fn from_components(entity: &str, components: &Components) -> EngineResult<Self>;
}

fn field<'a>(entity: &str, components: &'a Components, name: &str) -> EngineResult<&'a ComponentValue> {
    components
        .get(name)
        .ok_or_else(|| EngineError::missing(entity, name))
}

/// Read a string field for a [`ComponentMap`] implementation
pub fn string_field(entity: &str, components: &Components, name: &str) -> EngineResult<String> {
    match field(entity, components, name)? {
        ComponentValue::String(s) => Ok(s.clone()),
        other => Err(EngineError::mismatch(
            entity,
            name,
            other.kind(),
            ValueKind::String,
        )),
    }
}

pub fn int64_field(entity: &str, components: &Components, name: &str) -> EngineResult<i64> {
    match field(entity, components, name)? {
        ComponentValue::Int64(i) => Ok(*i),
        ComponentValue::Int(i) => Ok(i64::from(*i)),
        other => Err(EngineError::mismatch(
            entity,
            name,
            other.kind(),
            ValueKind::Int64,
        )),
    }
}

pub fn map_field(
    entity: &str,
    components: &Components,
    name: &str,
) -> EngineResult<BTreeMap<String, Scalar>> {
    match field(entity, components, name)? {
        ComponentValue::Map(m) => Ok(m.clone()),
        other => Err(EngineError::mismatch(
            entity,
            name,
            other.kind(),
            ValueKind::Map,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_ignore_args() {
        let char_type = Defaults::new("char").with("hp", 10).with("name", "nobody");
        let args = Components::from([("hp".to_string(), ComponentValue::Int(3))]);
        let defaults = char_type.defaults(&args).unwrap();
        assert_eq!(char_type.name(), "char");
        assert_eq!(defaults.get("hp"), Some(&ComponentValue::Int(10)));
        assert_eq!(defaults.len(), 2);
    }

    #[test]
    fn test_field_helpers() {
        let components = Components::from([
            ("name".to_string(), ComponentValue::from("bob")),
            ("age".to_string(), ComponentValue::Int(7)),
        ]);
        assert_eq!(string_field("p1", &components, "name").unwrap(), "bob");
        assert_eq!(int64_field("p1", &components, "age").unwrap(), 7);
        assert!(matches!(
            string_field("p1", &components, "age"),
            Err(EngineError::TypeMismatch { .. })
        ));
        assert!(matches!(
            map_field("p1", &components, "stats"),
            Err(EngineError::MissingComponent { .. })
        ));
    }
}

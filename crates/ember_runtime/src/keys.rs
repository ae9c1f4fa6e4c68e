//! Key layout
//!
//! Component values live at `<instance>:<entity>:<component>`. Bookkeeping
//! keys put a reserved `__`-prefixed marker in the entity position so the
//! same parser recognises and skips them.

use crate::{EngineError, EngineResult};

/// Component holding an entity's type name
pub const TYPE_COMPONENT: &str = "type";

const TYPE_MARKER: &str = "__type";
const SHADOW_MARKER: &str = "__prev";
const RESERVED_PREFIX: &str = "__";
const FORBIDDEN: &[char] = &[':', '*', '?', '[', ']'];

/// A parsed component key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentKey {
    pub entity: String,
    pub component: String,
}

impl ComponentKey {
    /// Whether the key belongs to engine bookkeeping rather than an entity
    pub fn is_internal(&self) -> bool {
        self.entity.starts_with(RESERVED_PREFIX)
    }
}

/// Builds and parses keys for one engine instance
#[derive(Debug, Clone)]
pub struct Keyspace {
    instance: String,
}

impl Keyspace {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn component(&self, entity: &str, component: &str) -> String {
        format!("{}:{}:{}", self.instance, entity, component)
    }

    pub fn type_key(&self, entity: &str, component: &str) -> String {
        format!("{}:{}:{}:{}", self.instance, TYPE_MARKER, entity, component)
    }

    pub fn shadow_key(&self, entity: &str, component: &str) -> String {
        format!("{}:{}:{}:{}", self.instance, SHADOW_MARKER, entity, component)
    }

    /// Pattern matching every component of one entity
    pub fn entity_pattern(&self, entity: &str) -> String {
        format!("{}:{}:*", self.instance, entity)
    }

    /// Pattern matching one component across all entities
    pub fn component_pattern(&self, component: &str) -> String {
        format!("{}:*:{}", self.instance, component)
    }

    /// Pattern matching every shadow key of the instance
    pub fn shadow_pattern(&self) -> String {
        format!("{}:{}:*", self.instance, SHADOW_MARKER)
    }

    /// Split a key into entity and component, `None` if it is not ours
    pub fn parse(&self, key: &str) -> Option<ComponentKey> {
        let rest = key.strip_prefix(&self.instance)?.strip_prefix(':')?;
        split(rest)
    }

    /// The component a shadow key belongs to
    pub fn parse_shadow(&self, key: &str) -> Option<ComponentKey> {
        let rest = key
            .strip_prefix(&self.instance)?
            .strip_prefix(':')?
            .strip_prefix(SHADOW_MARKER)?
            .strip_prefix(':')?;
        split(rest).filter(|k| !k.is_internal())
    }
}

fn split(rest: &str) -> Option<ComponentKey> {
    let (entity, component) = rest.rsplit_once(':')?;
    if entity.is_empty() || component.is_empty() {
        return None;
    }
    Some(ComponentKey {
        entity: entity.to_string(),
        component: component.to_string(),
    })
}

/// Reject entity ids that collide with bookkeeping keys or glob syntax
pub fn validate_entity_id(id: &str) -> EngineResult<()> {
    if id.is_empty() || id.starts_with(RESERVED_PREFIX) || id.contains(FORBIDDEN) {
        return Err(EngineError::InvalidName {
            what: "entity id",
            name: id.to_string(),
        });
    }
    Ok(())
}

pub fn validate_component_name(name: &str) -> EngineResult<()> {
    if name.is_empty() || name.contains(FORBIDDEN) {
        return Err(EngineError::InvalidName {
            what: "component name",
            name: name.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_keys_parse_back() {
        let ks = Keyspace::new("mud");
        let key = ks.component("p1", "hp");
        assert_eq!(key, "mud:p1:hp");
        assert_eq!(
            ks.parse(&key),
            Some(ComponentKey {
                entity: "p1".into(),
                component: "hp".into()
            })
        );
    }

    #[test]
    fn test_bookkeeping_keys_are_internal() {
        let ks = Keyspace::new("mud");
        let type_key = ks.parse(&ks.type_key("p1", "hp")).unwrap();
        let shadow_key = ks.parse(&ks.shadow_key("p1", "hp")).unwrap();
        assert!(type_key.is_internal());
        assert!(shadow_key.is_internal());
        assert!(!ks.parse("mud:p1:hp").unwrap().is_internal());
    }

    #[test]
    fn test_foreign_keys_ignored() {
        let ks = Keyspace::new("mud");
        assert_eq!(ks.parse("other:p1:hp"), None);
        assert_eq!(ks.parse("mudx:p1:hp"), None);
        assert_eq!(ks.parse("mud:p1"), None);
    }

    #[test]
    fn test_patterns() {
        let ks = Keyspace::new("mud");
        assert_eq!(ks.entity_pattern("p1"), "mud:p1:*");
        assert_eq!(ks.component_pattern("hp"), "mud:*:hp");
        assert_eq!(ks.shadow_pattern(), "mud:__prev:*");
    }

    #[test]
    fn test_shadow_keys_parse_back() {
        let ks = Keyspace::new("mud");
        assert_eq!(
            ks.parse_shadow(&ks.shadow_key("p1", "hp")),
            Some(ComponentKey {
                entity: "p1".into(),
                component: "hp".into()
            })
        );
        assert_eq!(ks.parse_shadow(&ks.type_key("p1", "hp")), None);
        assert_eq!(ks.parse_shadow("mud:p1:hp"), None);
    }

    #[test]
    fn test_id_validation() {
        assert!(validate_entity_id("p1").is_ok());
        assert!(validate_entity_id("").is_err());
        assert!(validate_entity_id("__type").is_err());
        assert!(validate_entity_id("a:b").is_err());
        assert!(validate_entity_id("a*").is_err());
        assert!(validate_component_name("hp").is_ok());
        assert!(validate_component_name("h?p").is_err());
    }
}

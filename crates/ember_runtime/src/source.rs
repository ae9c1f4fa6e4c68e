//! Data Sources
//!
//! Persistent document stores consulted at bootstrap to seed entities. A
//! document is an entity id plus its components. Sources are never used on
//! the per-event path.

use std::collections::BTreeMap;

use async_trait::async_trait;
use ember_types::{components_from_json, Components};
use parking_lot::RwLock;
use tracing::debug;

use crate::{EngineError, EngineResult};

pub type Documents = BTreeMap<String, Components>;

#[async_trait]
pub trait DataSource: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) -> EngineResult<()> {
        Ok(())
    }

    async fn stop(&self) -> EngineResult<()> {
        Ok(())
    }

    /// Load one document; `EntityNotFound` if absent
    async fn load(&self, id: &str) -> EngineResult<Components>;

    async fn load_all(&self) -> EngineResult<Documents>;

    /// Documents whose components equal every entry of `filter`
    async fn find(&self, filter: &Components) -> EngineResult<Documents>;

    async fn save(&self, id: &str, components: Components) -> EngineResult<()>;
}

/// In-process data source
#[derive(Debug, Default)]
pub struct MemorySource {
    name: String,
    documents: RwLock<Documents>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            documents: RwLock::new(Documents::new()),
        }
    }

    /// Build from a JSON object of `{ "<id>": { "<component>": value } }`
    pub fn from_json(name: impl Into<String>, value: &serde_json::Value) -> EngineResult<Self> {
        let source = Self::new(name);
        let serde_json::Value::Object(entities) = value else {
            return Err(EngineError::Other(format!(
                "data source '{}' must be an object of entities",
                source.name
            )));
        };

        {
            let mut documents = source.documents.write();
            for (id, components) in entities {
                let serde_json::Value::Object(components) = components else {
                    return Err(EngineError::Other(format!(
                        "entity '{}' in data source '{}' must be an object",
                        id, source.name
                    )));
                };
                documents.insert(id.clone(), components_from_json(components)?);
            }
        }

        debug!(source = %source.name, documents = source.len(), "Data source loaded");
        Ok(source)
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl DataSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load(&self, id: &str) -> EngineResult<Components> {
        self.documents
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::EntityNotFound(id.to_string()))
    }

    async fn load_all(&self) -> EngineResult<Documents> {
        Ok(self.documents.read().clone())
    }

    async fn find(&self, filter: &Components) -> EngineResult<Documents> {
        Ok(self
            .documents
            .read()
            .iter()
            .filter(|(_, components)| {
                filter
                    .iter()
                    .all(|(name, value)| components.get(name) == Some(value))
            })
            .map(|(id, components)| (id.clone(), components.clone()))
            .collect())
    }

    async fn save(&self, id: &str, components: Components) -> EngineResult<()> {
        self.documents.write().insert(id.to_string(), components);
        Ok(())
    }
}

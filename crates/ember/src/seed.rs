//! Seed Files
//!
//! A seed file is a TOML document with one table per entity:
//!
//! ```toml
//! [hall]
//! type = "room"
//! name = "Great Hall"
//! exits = ["cellar"]
//! stats = { light = 3 }
//! ```
//!
//! Integers that fit in 32 bits become `int` components, larger ones
//! `int64`; arrays become sets and inline tables become maps.

use std::path::{Path, PathBuf};

use ember_runtime::{EngineError, MemorySource};
use tokio::fs;
use tracing::info;

/// Error type for seed loading
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    #[error("Failed to read seed file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("Failed to convert seed data: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid seed data: {0}")]
    Invalid(#[from] EngineError),
}

/// Parse seed documents from TOML text
pub fn parse(name: &str, content: &str) -> Result<MemorySource, SeedError> {
    let table: toml::Table = toml::from_str(content)?;
    let value = serde_json::to_value(table)?;
    Ok(MemorySource::from_json(name, &value)?)
}

/// Load a seed file; the source is named after the file stem
pub async fn load(path: impl AsRef<Path>) -> Result<MemorySource, SeedError> {
    let path = path.as_ref();
    let content = fs::read_to_string(path)
        .await
        .map_err(|source| SeedError::Read {
            path: path.to_path_buf(),
            source,
        })?;

    let name = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "seed".to_string());
    let source = parse(&name, &content)?;
    info!(path = %path.display(), documents = source.len(), "Loaded seed file");
    Ok(source)
}

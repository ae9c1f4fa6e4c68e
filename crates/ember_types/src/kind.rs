//! Value Kinds
//!
//! Discriminators recorded beside component values so a component's type is
//! known without inspecting the stored value.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ValueError;

// ─────────────────────────────────────────────────────────────────────────────
// Value Kind
// ─────────────────────────────────────────────────────────────────────────────

/// The type of a component value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Int,
    Int64,
    Bool,
    Map,
    Set,
}

impl ValueKind {
    /// Name used in the type-tracking key
    pub fn as_str(&self) -> &'static str {
        match self {
            ValueKind::String => "string",
            ValueKind::Int => "int",
            ValueKind::Int64 => "int64",
            ValueKind::Bool => "bool",
            ValueKind::Map => "map",
            ValueKind::Set => "set",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ValueKind {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "string" => Ok(ValueKind::String),
            "int" => Ok(ValueKind::Int),
            "int64" => Ok(ValueKind::Int64),
            "bool" => Ok(ValueKind::Bool),
            "map" => Ok(ValueKind::Map),
            "set" => Ok(ValueKind::Set),
            other => Err(ValueError::UnknownKind(other.to_string())),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scalar Kind
// ─────────────────────────────────────────────────────────────────────────────

/// The type of a map value or set member
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    String,
    Int,
    Bool,
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarKind::String => f.write_str("string"),
            ScalarKind::Int => f.write_str("int"),
            ScalarKind::Bool => f.write_str("bool"),
        }
    }
}

//! Component values
//!
//! A closed tagged union of everything a component can hold. Store accessors
//! match on this union, so a write of a different variant than the one
//! recorded for a component is detected without runtime type inspection.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ScalarKind, ValueKind};

/// All components of one entity, ordered by component name
pub type Components = BTreeMap<String, ComponentValue>;

/// Errors raised while building or decoding values
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("Unknown value kind: {0}")]
    UnknownKind(String),

    #[error("Unsupported value shape: {0}")]
    Unsupported(&'static str),

    #[error("Set members must share one type, found {first} and {other}")]
    MixedSet { first: ScalarKind, other: ScalarKind },

    #[error("Cannot decode {raw:?} as {kind}")]
    Decode { kind: String, raw: String },
}

// ─────────────────────────────────────────────────────────────────────────────
// Scalar
// ─────────────────────────────────────────────────────────────────────────────

/// Element type of map values and set members
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    String(String),
    Int(i64),
    Bool(bool),
}

impl Scalar {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Scalar::String(_) => ScalarKind::String,
            Scalar::Int(_) => ScalarKind::Int,
            Scalar::Bool(_) => ScalarKind::Bool,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Convert a JSON leaf into a scalar
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ValueError> {
        match value {
            serde_json::Value::String(s) => Ok(Scalar::String(s.clone())),
            serde_json::Value::Bool(b) => Ok(Scalar::Bool(*b)),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Scalar::Int)
                .ok_or(ValueError::Unsupported("non-integer number")),
            serde_json::Value::Null => Err(ValueError::Unsupported("null")),
            serde_json::Value::Array(_) => Err(ValueError::Unsupported("nested array")),
            serde_json::Value::Object(_) => Err(ValueError::Unsupported("nested object")),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Scalar::String(s) => serde_json::Value::String(s.clone()),
            Scalar::Int(i) => serde_json::Value::from(*i),
            Scalar::Bool(b) => serde_json::Value::Bool(*b),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::String(s) => f.write_str(s),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::String(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::String(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Component Value
// ─────────────────────────────────────────────────────────────────────────────

/// The value held by one component
///
/// Maps and sets are ordered collections, so equality is independent of the
/// order elements were inserted in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum ComponentValue {
    String(String),
    Int(i32),
    Int64(i64),
    Bool(bool),
    Map(BTreeMap<String, Scalar>),
    Set(BTreeSet<Scalar>),
}

impl ComponentValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            ComponentValue::String(_) => ValueKind::String,
            ComponentValue::Int(_) => ValueKind::Int,
            ComponentValue::Int64(_) => ValueKind::Int64,
            ComponentValue::Bool(_) => ValueKind::Bool,
            ComponentValue::Map(_) => ValueKind::Map,
            ComponentValue::Set(_) => ValueKind::Set,
        }
    }

    /// Build a set, rejecting members of different scalar types
    pub fn set<I, T>(members: I) -> Result<Self, ValueError>
    where
        I: IntoIterator<Item = T>,
        T: Into<Scalar>,
    {
        let members: BTreeSet<Scalar> = members.into_iter().map(Into::into).collect();
        check_homogeneous(&members)?;
        Ok(ComponentValue::Set(members))
    }

    /// Build a map from key-value pairs
    pub fn map<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Scalar>,
    {
        ComponentValue::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn empty_map() -> Self {
        ComponentValue::Map(BTreeMap::new())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ComponentValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as i64, widening `Int`
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ComponentValue::Int(i) => Some(*i as i64),
            ComponentValue::Int64(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ComponentValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, Scalar>> {
        match self {
            ComponentValue::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_set(&self) -> Option<&BTreeSet<Scalar>> {
        match self {
            ComponentValue::Set(s) => Some(s),
            _ => None,
        }
    }

    /// Convert an untyped JSON value by its runtime shape
    ///
    /// Integers that fit in 32 bits become `Int`, wider ones `Int64`; objects
    /// become maps and arrays become sets.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ValueError> {
        match value {
            serde_json::Value::String(s) => Ok(ComponentValue::String(s.clone())),
            serde_json::Value::Bool(b) => Ok(ComponentValue::Bool(*b)),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Ok(i32::try_from(i)
                    .map(ComponentValue::Int)
                    .unwrap_or(ComponentValue::Int64(i))),
                None => Err(ValueError::Unsupported("non-integer number")),
            },
            serde_json::Value::Object(obj) => obj
                .iter()
                .map(|(k, v)| Ok((k.clone(), Scalar::from_json(v)?)))
                .collect::<Result<BTreeMap<_, _>, ValueError>>()
                .map(ComponentValue::Map),
            serde_json::Value::Array(arr) => {
                let members = arr
                    .iter()
                    .map(Scalar::from_json)
                    .collect::<Result<BTreeSet<_>, ValueError>>()?;
                check_homogeneous(&members)?;
                Ok(ComponentValue::Set(members))
            }
            serde_json::Value::Null => Err(ValueError::Unsupported("null")),
        }
    }

    /// Plain JSON form, the inverse of [`ComponentValue::from_json`]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            ComponentValue::String(s) => serde_json::Value::String(s.clone()),
            ComponentValue::Int(i) => serde_json::Value::from(*i),
            ComponentValue::Int64(i) => serde_json::Value::from(*i),
            ComponentValue::Bool(b) => serde_json::Value::Bool(*b),
            ComponentValue::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            ComponentValue::Set(s) => {
                serde_json::Value::Array(s.iter().map(Scalar::to_json).collect())
            }
        }
    }
}

impl fmt::Display for ComponentValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComponentValue::String(s) => f.write_str(s),
            ComponentValue::Int(i) => write!(f, "{}", i),
            ComponentValue::Int64(i) => write!(f, "{}", i),
            ComponentValue::Bool(b) => write!(f, "{}", b),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

/// Check that every member of a set has the same scalar kind
pub fn check_homogeneous<'a, I>(members: I) -> Result<(), ValueError>
where
    I: IntoIterator<Item = &'a Scalar>,
{
    let mut iter = members.into_iter();
    let Some(first) = iter.next().map(Scalar::kind) else {
        return Ok(());
    };
    match iter.map(Scalar::kind).find(|k| *k != first) {
        Some(other) => Err(ValueError::MixedSet { first, other }),
        None => Ok(()),
    }
}

/// Convert a JSON object into components
pub fn components_from_json(
    obj: &serde_json::Map<String, serde_json::Value>,
) -> Result<Components, ValueError> {
    obj.iter()
        .map(|(name, v)| Ok((name.clone(), ComponentValue::from_json(v)?)))
        .collect()
}

/// Convert components into a JSON object
pub fn components_to_json(components: &Components) -> serde_json::Value {
    serde_json::Value::Object(
        components
            .iter()
            .map(|(name, v)| (name.clone(), v.to_json()))
            .collect(),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// From Implementations
// ─────────────────────────────────────────────────────────────────────────────

impl From<&str> for ComponentValue {
    fn from(v: &str) -> Self {
        ComponentValue::String(v.to_string())
    }
}

impl From<String> for ComponentValue {
    fn from(v: String) -> Self {
        ComponentValue::String(v)
    }
}

impl From<i32> for ComponentValue {
    fn from(v: i32) -> Self {
        ComponentValue::Int(v)
    }
}

impl From<i64> for ComponentValue {
    fn from(v: i64) -> Self {
        ComponentValue::Int64(v)
    }
}

impl From<bool> for ComponentValue {
    fn from(v: bool) -> Self {
        ComponentValue::Bool(v)
    }
}

impl From<BTreeMap<String, Scalar>> for ComponentValue {
    fn from(v: BTreeMap<String, Scalar>) -> Self {
        ComponentValue::Map(v)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

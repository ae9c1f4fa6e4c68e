//! Store encoding
//!
//! Key-value stores hold strings. Scalar components are written as their
//! plain text form and decoded using the recorded [`ValueKind`]; map values
//! and set members are written as JSON leaves so they decode unambiguously.

use crate::{ComponentValue, Scalar, ValueError, ValueKind};

impl Scalar {
    /// Encode as a JSON leaf
    pub fn encode(&self) -> String {
        self.to_json().to_string()
    }

    pub fn decode(raw: &str) -> Result<Self, ValueError> {
        let json: serde_json::Value =
            serde_json::from_str(raw).map_err(|_| decode_error("scalar", raw))?;
        Scalar::from_json(&json).map_err(|_| decode_error("scalar", raw))
    }
}

/// Encode a string/int/int64/bool component, `None` for maps and sets
pub fn encode_scalar_value(value: &ComponentValue) -> Option<String> {
    match value {
        ComponentValue::String(s) => Some(s.clone()),
        ComponentValue::Int(i) => Some(i.to_string()),
        ComponentValue::Int64(i) => Some(i.to_string()),
        ComponentValue::Bool(b) => Some(b.to_string()),
        ComponentValue::Map(_) | ComponentValue::Set(_) => None,
    }
}

/// Decode a string-stored component of a known kind
pub fn decode_scalar_value(kind: ValueKind, raw: &str) -> Result<ComponentValue, ValueError> {
    match kind {
        ValueKind::String => Ok(ComponentValue::String(raw.to_string())),
        ValueKind::Int => raw
            .parse()
            .map(ComponentValue::Int)
            .map_err(|_| decode_error(kind.as_str(), raw)),
        ValueKind::Int64 => raw
            .parse()
            .map(ComponentValue::Int64)
            .map_err(|_| decode_error(kind.as_str(), raw)),
        ValueKind::Bool => raw
            .parse()
            .map(ComponentValue::Bool)
            .map_err(|_| decode_error(kind.as_str(), raw)),
        ValueKind::Map | ValueKind::Set => Err(decode_error(kind.as_str(), raw)),
    }
}

fn decode_error(kind: &str, raw: &str) -> ValueError {
    ValueError::Decode {
        kind: kind.to_string(),
        raw: raw.to_string(),
    }
}

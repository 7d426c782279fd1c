//! Column value representation
//!
//! Dynamic column payloads are carried as a tagged sum with a stable JSON
//! wire form: primitives map to native JSON scalars and anything nested
//! round-trips as raw JSON.

use serde::{Deserialize, Serialize};

/// A single column value inside a row delta
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// SQL NULL / JSON null
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// UTF-8 string
    Str(String),
    /// Nested JSON (arrays, objects)
    Json(serde_json::Value),
}

impl Value {
    /// Type-aware size estimate used for buffer accounting: booleans and
    /// nulls cost 4 bytes, numbers 8, strings two bytes per character, and
    /// nested JSON its serialised length.
    pub fn estimated_size(&self) -> usize {
        match self {
            Value::Null | Value::Bool(_) => 4,
            Value::Int(_) | Value::Float(_) => 8,
            Value::Str(s) => 2 * s.len(),
            Value::Json(v) => serde_json::to_string(v).map(|s| s.len()).unwrap_or(0),
        }
    }

    /// True for the null variant
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// View as a JSON value for filter evaluation
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Json(v) => v.clone(),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

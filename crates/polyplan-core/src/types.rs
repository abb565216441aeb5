//! Lightweight record/value types carried through channels.
//!
//! Platforms are free to convert these into their own native representation
//! inside an operator; at the driver boundary everything is `Vec<Record>`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
}

impl Scalar {
    /// Rough in-memory footprint used for size statistics.
    pub fn approx_bytes(&self) -> u64 {
        match self {
            Scalar::Null => 1,
            Scalar::Bool(_) => 1,
            Scalar::I64(_) | Scalar::F64(_) => 8,
            Scalar::Str(s) => s.len() as u64 + 8,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use Scalar::*;
        match self {
            Null => serde_json::Value::Null,
            Bool(b) => serde_json::Value::Bool(*b),
            I64(i) => serde_json::Value::from(*i),
            F64(f) => serde_json::Value::from(*f),
            Str(s) => serde_json::Value::String(s.clone()),
        }
    }

    pub fn from_json(v: &serde_json::Value) -> Self {
        use serde_json::Value;
        match v {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Scalar::I64(i),
                None => Scalar::F64(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => Scalar::Str(s.clone()),
            // Nested values are carried as their JSON text.
            other => Scalar::Str(other.to_string()),
        }
    }

    /// Display form used for membership tests against broadcast values.
    pub fn render(&self) -> String {
        match self {
            Scalar::Null => "null".to_string(),
            Scalar::Bool(b) => b.to_string(),
            Scalar::I64(i) => i.to_string(),
            Scalar::F64(f) => f.to_string(),
            Scalar::Str(s) => s.clone(),
        }
    }
}

/// One row: ordered (name, value) pairs. Field order is preserved on output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub fields: Vec<(String, Scalar)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: Scalar) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: Scalar) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => *slot = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn approx_bytes(&self) -> u64 {
        self.fields
            .iter()
            .map(|(n, v)| n.len() as u64 + v.approx_bytes())
            .sum()
    }

    /// Build a record from a JSON object; non-objects land in a single `value` field.
    pub fn from_json(v: &serde_json::Value) -> Self {
        match v.as_object() {
            Some(obj) => Record {
                fields: obj
                    .iter()
                    .map(|(k, v)| (k.clone(), Scalar::from_json(v)))
                    .collect(),
            },
            None => Record::new().with("value", Scalar::from_json(v)),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut obj = serde_json::Map::new();
        for (name, value) in &self.fields {
            obj.insert(name.clone(), value.to_json());
        }
        serde_json::Value::Object(obj)
    }
}

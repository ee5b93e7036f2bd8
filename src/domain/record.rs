// ============================================================
// Layer 3 — Record Domain Type
// ============================================================
// A Record is one row of a dataset: an ordered mapping from
// field name to a JSON value. There is no fixed schema — a text
// source produces `{"text": ...}`, a JSONL source produces
// whatever keys each line carries.
//
// Records flow through the whole pipeline:
//
//   Loader → preprocess → engine → postprocess → consumer
//
// and only ever gain fields on the way. Carrying the original
// fields forward is how outputs are correlated with inputs,
// because output order is not guaranteed.
//
// Reference: Rust Book §8 (Collections)
//            serde_json::Map documentation

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name of the field produced by the plain-text loader
pub const TEXT_FIELD: &str = "text";

/// One dataset row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Create an empty record
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// A record with a single `text` field, as produced by the text loader
    ///
    /// Example:
    ///   let r = Record::from_text("Tell me about cats");
    pub fn from_text(text: impl Into<String>) -> Self {
        Self::new().with(TEXT_FIELD, text.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Borrow a field as a string slice if it is a JSON string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    /// Like `get_str`, but a missing or non-string field is an error.
    pub fn require_str(&self, key: &str) -> Result<&str> {
        match self.0.get(key) {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Err(anyhow!(
                "field '{key}' is not a string (found {})",
                json_kind(other)
            )),
            None => Err(anyhow!(
                "record has no field '{key}' (fields: [{}])",
                self.keys().collect::<Vec<_>>().join(", ")
            )),
        }
    }

    /// Insert or replace a field, returning the previous value
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Structural merge: every field of `other` is copied in,
    /// overriding fields with the same name.
    pub fn merge(&mut self, other: Record) {
        for (k, v) in other.0 {
            self.0.insert(k, v);
        }
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Record {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Only JSON objects can become records
impl TryFrom<Value> for Record {
    type Error = anyhow::Error;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(anyhow!("expected a JSON object, found {}", json_kind(&other))),
        }
    }
}

pub(crate) fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null      => "null",
        Value::Bool(_)   => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_)  => "array",
        Value::Object(_) => "object",
    }
}

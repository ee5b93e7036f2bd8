// ============================================================
// Layer 4 — Schema Descriptor
// ============================================================
// A best-effort description of the columns of a dataset.
// Text sources have a fixed schema (`text: string`); JSONL
// schemas are inferred from the first record.
//
// Printed form:
//
//   Column  Type
//   ------  ----
//   text    string

use serde::Serialize;
use serde_json::Value;
use std::fmt;

use crate::domain::record::{Record, TEXT_FIELD};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    List,
    Struct,
    Null,
}

impl FieldType {
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null      => FieldType::Null,
            Value::Bool(_)   => FieldType::Bool,
            Value::Number(n) if n.is_f64() => FieldType::Float,
            Value::Number(_) => FieldType::Int,
            Value::String(_) => FieldType::String,
            Value::Array(_)  => FieldType::List,
            Value::Object(_) => FieldType::Struct,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Int    => "int64",
            FieldType::Float  => "double",
            FieldType::Bool   => "bool",
            FieldType::List   => "list",
            FieldType::Struct => "struct",
            FieldType::Null   => "null",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name:  String,
    pub dtype: FieldType,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Schema {
    fields: Vec<Field>,
}

impl Schema {
    /// The fixed schema of a plain-text source
    pub fn text() -> Self {
        Self::default().with_field(TEXT_FIELD, FieldType::String)
    }

    /// Infer column names and types from a single record
    pub fn infer(record: &Record) -> Self {
        record
            .iter()
            .fold(Self::default(), |s, (k, v)| s.with_field(k, FieldType::of(v)))
    }

    /// Add a column, or replace the type of an existing one
    pub fn with_field(mut self, name: impl Into<String>, dtype: FieldType) -> Self {
        let name = name.into();
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(f) => f.dtype = dtype,
            None    => self.fields.push(Field { name, dtype }),
        }
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name_w = self
            .fields
            .iter()
            .map(|c| c.name.len())
            .max()
            .unwrap_or(0)
            .max("Column".len());

        writeln!(f, "{:<name_w$}  {}", "Column", "Type")?;
        write!(f, "{:<name_w$}  {}", "-".repeat("Column".len()), "-".repeat("Type".len()))?;
        for c in &self.fields {
            write!(f, "\n{:<name_w$}  {}", c.name, c.dtype.as_str())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_schema_display() {
        let s = Schema::text();
        assert_eq!(s.to_string(), "Column  Type\n------  ----\ntext    string");
    }

    #[test]
    fn test_infer_types() {
        let r = Record::try_from(json!({
            "text": "x", "id": 3, "score": 0.5, "ok": true, "tags": [], "meta": {}
        }))
        .unwrap();
        let s = Schema::infer(&r);
        assert_eq!(s.len(), 6);
        assert_eq!(s.field("id").unwrap().dtype,    FieldType::Int);
        assert_eq!(s.field("score").unwrap().dtype, FieldType::Float);
        assert_eq!(s.field("tags").unwrap().dtype,  FieldType::List);
        assert_eq!(s.field("meta").unwrap().dtype,  FieldType::Struct);
    }

    #[test]
    fn test_with_field_replaces_existing() {
        let s = Schema::text().with_field("text", FieldType::Null);
        assert_eq!(s.len(), 1);
        assert_eq!(s.field("text").unwrap().dtype, FieldType::Null);
    }
}

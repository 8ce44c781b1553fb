use serde::{Deserialize, Serialize};

/// Typed schema of a log record key or value.
///
/// Closed set of kinds; the codec matches on it exhaustively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schema {
    Int8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
    Boolean,
    String,
    Bytes,
    /// Ordered fields.
    Struct { fields: Vec<Field> },
    /// String-keyed map with a single value schema.
    Map { values: Box<Schema> },
    Array { items: Box<Schema> },
}

impl Schema {
    pub fn struct_of(fields: Vec<Field>) -> Self {
        Schema::Struct { fields }
    }

    pub fn map_of(values: Schema) -> Self {
        Schema::Map { values: Box::new(values) }
    }

    pub fn array_of(items: Schema) -> Self {
        Schema::Array { items: Box::new(items) }
    }

    /// Struct or map: kinds that cannot be flattened into a string attribute.
    pub fn is_nested(&self) -> bool {
        matches!(self, Schema::Struct { .. } | Schema::Map { .. })
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Schema::Int8 => "int8",
            Schema::Int16 => "int16",
            Schema::Int32 => "int32",
            Schema::Int64 => "int64",
            Schema::Float32 => "float32",
            Schema::Float64 => "float64",
            Schema::Boolean => "boolean",
            Schema::String => "string",
            Schema::Bytes => "bytes",
            Schema::Struct { .. } => "struct",
            Schema::Map { .. } => "map",
            Schema::Array { .. } => "array",
        }
    }
}

/// A single struct field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub schema: Schema,
    /// Nullable field. A null required field fails encoding.
    #[serde(default)]
    pub optional: bool,
}

impl Field {
    pub fn required(name: impl Into<String>, schema: Schema) -> Self {
        Self { name: name.into(), schema, optional: false }
    }

    pub fn optional(name: impl Into<String>, schema: Schema) -> Self {
        Self { name: name.into(), schema, optional: true }
    }
}

/// Runtime value matching a `Schema`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Boolean(bool),
    String(String),
    Bytes(Vec<u8>),
    /// `(field name, value)` in any order; lookup is by name.
    Struct(Vec<(String, Value)>),
    Map(Vec<(Value, Value)>),
    Array(Vec<Value>),
    Null,
}

impl Value {
    /// Struct field by name. A missing field reads as `None`, same as null.
    pub fn get(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Struct(fields) => fields
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, v)| v)
                .filter(|v| !v.is_null()),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int8(_) => "int8",
            Value::Int16(_) => "int16",
            Value::Int32(_) => "int32",
            Value::Int64(_) => "int64",
            Value::Float32(_) => "float32",
            Value::Float64(_) => "float64",
            Value::Boolean(_) => "boolean",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Struct(_) => "struct",
            Value::Map(_) => "map",
            Value::Array(_) => "array",
            Value::Null => "null",
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_get_treats_null_as_missing() {
        let value = Value::Struct(vec![
            ("id".into(), Value::Int32(7)),
            ("note".into(), Value::Null),
        ]);
        assert_eq!(value.get("id"), Some(&Value::Int32(7)));
        assert_eq!(value.get("note"), None);
        assert_eq!(value.get("absent"), None);
    }

    #[test]
    fn test_nested_kinds() {
        assert!(Schema::struct_of(vec![]).is_nested());
        assert!(Schema::map_of(Schema::String).is_nested());
        assert!(!Schema::array_of(Schema::Int32).is_nested());
        assert!(!Schema::Bytes.is_nested());
    }

    #[test]
    fn test_schema_from_json() {
        let schema: Schema = serde_json::from_str(
            r#"{"type":"struct","fields":[
                {"name":"body","schema":{"type":"string"}},
                {"name":"tags","schema":{"type":"array","items":{"type":"int32"}},"optional":true}
            ]}"#,
        )
        .unwrap();
        assert_eq!(
            schema,
            Schema::struct_of(vec![
                Field::required("body", Schema::String),
                Field::optional("tags", Schema::array_of(Schema::Int32)),
            ])
        );
    }
}

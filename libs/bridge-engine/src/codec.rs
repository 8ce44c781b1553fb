//! Typed value ⇄ broker message conversion.
//!
//! `encode` is used by the sink direction, `classify` by the source
//! direction. Both are pure.

use std::collections::BTreeMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bridge_api::{BridgeError, Field, Message, Schema, Value};

/// Поле struct, в котором лежит payload классифицированного сообщения.
pub const SOURCE_BODY_FIELD: &str = "message";

pub type Encoded = (Vec<u8>, BTreeMap<String, String>);

// ════════════════════════════════════════════════════════════════
//  Encode
// ════════════════════════════════════════════════════════════════

/// Encode a record value into payload bytes plus string attributes.
///
/// Without a schema the value is stringified. A top-level null encodes as
/// an empty message.
pub fn encode(schema: Option<&Schema>, value: &Value, body_field: &str) -> Result<Encoded, BridgeError> {
    if value.is_null() {
        return Ok((Vec::new(), BTreeMap::new()));
    }
    let Some(schema) = schema else {
        return Ok((stringify(value)?.into_bytes(), BTreeMap::new()));
    };

    match schema {
        Schema::Struct { fields } => encode_struct(fields, value, body_field),
        Schema::Map { values } => encode_map(values, value, body_field),
        other => Ok((encode_value(other, value)?, BTreeMap::new())),
    }
}

fn encode_struct(fields: &[Field], value: &Value, body_field: &str) -> Result<Encoded, BridgeError> {
    if !matches!(value, Value::Struct(_)) {
        return Err(mismatch("struct", value));
    }

    let mut payload = Vec::new();
    let mut attributes = BTreeMap::new();
    for field in fields {
        if field.schema.is_nested() {
            return Err(BridgeError::encoding(format!(
                "field '{}': {} fields are not supported",
                field.name,
                field.schema.type_name()
            )));
        }
        let Some(v) = value.get(&field.name) else {
            if field.optional {
                continue;
            }
            return Err(BridgeError::encoding(format!(
                "required field '{}' is missing",
                field.name
            )));
        };

        if field.name == body_field {
            payload = encode_value(&field.schema, v)
                .map_err(|e| e.with_context(format!("field '{}'", field.name)))?;
        } else {
            check_matches(&field.schema, v)
                .map_err(|e| e.with_context(format!("field '{}'", field.name)))?;
            attributes.insert(field.name.clone(), stringify(v)?);
        }
    }
    Ok((payload, attributes))
}

fn encode_map(values_schema: &Schema, value: &Value, body_field: &str) -> Result<Encoded, BridgeError> {
    let Value::Map(entries) = value else {
        return Err(mismatch("map", value));
    };
    if values_schema.is_nested() {
        return Err(BridgeError::encoding(format!(
            "map values of type {} are not supported",
            values_schema.type_name()
        )));
    }

    let mut payload = Vec::new();
    let mut attributes = BTreeMap::new();
    for (k, v) in entries {
        if v.is_null() {
            continue;
        }
        check_matches(values_schema, v)?;
        match k {
            Value::String(name) if name == body_field => payload = stringify(v)?.into_bytes(),
            _ => {
                attributes.insert(stringify(k)?, stringify(v)?);
            }
        }
    }
    Ok((payload, attributes))
}

/// Байты payload для скаляра или массива.
fn encode_value(schema: &Schema, value: &Value) -> Result<Vec<u8>, BridgeError> {
    let bytes = match (schema, value) {
        (Schema::Int8, Value::Int8(v)) => v.to_be_bytes().to_vec(),
        (Schema::Int16, Value::Int16(v)) => v.to_be_bytes().to_vec(),
        (Schema::Int32, Value::Int32(v)) => v.to_be_bytes().to_vec(),
        (Schema::Int64, Value::Int64(v)) => v.to_be_bytes().to_vec(),
        (Schema::Float32, Value::Float32(v)) => v.to_be_bytes().to_vec(),
        (Schema::Float64, Value::Float64(v)) => v.to_be_bytes().to_vec(),
        (Schema::Boolean, Value::Boolean(v)) => vec![u8::from(*v)],
        (Schema::String, Value::String(v)) => v.as_bytes().to_vec(),
        (Schema::Bytes, Value::Bytes(v)) => v.clone(),
        (Schema::Array { items }, Value::Array(elements)) => {
            if items.is_nested() {
                return Err(BridgeError::encoding(format!(
                    "array elements of type {} are not supported",
                    items.type_name()
                )));
            }
            // без разделителей: элементы переменной длины склеиваются как есть
            let mut out = Vec::new();
            for element in elements {
                out.extend(encode_value(items, element)?);
            }
            out
        }
        (Schema::Struct { .. } | Schema::Map { .. }, _) => {
            return Err(BridgeError::encoding(format!(
                "{} value cannot be encoded here",
                schema.type_name()
            )));
        }
        (expected, actual) => return Err(mismatch(expected.type_name(), actual)),
    };
    Ok(bytes)
}

fn check_matches(schema: &Schema, value: &Value) -> Result<(), BridgeError> {
    let ok = match (schema, value) {
        (Schema::Array { items }, Value::Array(elements)) => {
            for element in elements {
                check_matches(items, element)?;
            }
            true
        }
        (Schema::Int8, Value::Int8(_))
        | (Schema::Int16, Value::Int16(_))
        | (Schema::Int32, Value::Int32(_))
        | (Schema::Int64, Value::Int64(_))
        | (Schema::Float32, Value::Float32(_))
        | (Schema::Float64, Value::Float64(_))
        | (Schema::Boolean, Value::Boolean(_))
        | (Schema::String, Value::String(_))
        | (Schema::Bytes, Value::Bytes(_)) => true,
        _ => false,
    };
    if ok { Ok(()) } else { Err(mismatch(schema.type_name(), value)) }
}

fn mismatch(expected: &str, actual: &Value) -> BridgeError {
    BridgeError::encoding(format!(
        "expected {expected} value, got {}",
        actual.type_name()
    ))
}

/// Строковая форма значения: для атрибутов и payload без схемы.
pub fn stringify(value: &Value) -> Result<String, BridgeError> {
    Ok(match value {
        Value::Int8(v) => v.to_string(),
        Value::Int16(v) => v.to_string(),
        Value::Int32(v) => v.to_string(),
        Value::Int64(v) => v.to_string(),
        // Debug даёт кратчайшую round-trip форму с точкой: 1.0, 0.1, 1e20
        Value::Float32(v) => format!("{v:?}"),
        Value::Float64(v) => format!("{v:?}"),
        Value::Boolean(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Bytes(v) => STANDARD.encode(v),
        Value::Array(elements) => {
            let parts = elements.iter().map(stringify).collect::<Result<Vec<_>, _>>()?;
            format!("[{}]", parts.join(", "))
        }
        Value::Null => "null".to_string(),
        Value::Struct(_) | Value::Map(_) => {
            return Err(BridgeError::encoding(format!(
                "{} value cannot be converted to a string",
                value.type_name()
            )));
        }
    })
}

// ════════════════════════════════════════════════════════════════
//  Classify
// ════════════════════════════════════════════════════════════════

/// Shape of a pulled message as a log record value.
///
/// A message whose attributes are all among the key/timestamp attributes
/// becomes a plain bytes value. Otherwise the value is a struct with the
/// payload under `message` and one string field per remaining attribute,
/// in attribute order. The key attribute is not repeated in the struct.
/// An attribute literally named `message` is dropped since the payload
/// owns that field.
pub fn classify(message: &Message, key_attribute: Option<&str>, timestamp_attribute: Option<&str>) -> (Schema, Value) {
    let is_standard = |name: &str| Some(name) == key_attribute || Some(name) == timestamp_attribute;
    let has_custom = message.attributes().keys().any(|k| !is_standard(k));

    if !has_custom {
        return (Schema::Bytes, Value::Bytes(message.payload().to_vec()));
    }

    let mut fields = vec![Field::required(SOURCE_BODY_FIELD, Schema::Bytes)];
    let mut values = vec![(SOURCE_BODY_FIELD.to_string(), Value::Bytes(message.payload().to_vec()))];
    for (name, value) in message.attributes() {
        if Some(name.as_str()) == key_attribute || name == SOURCE_BODY_FIELD {
            continue;
        }
        fields.push(Field::required(name.clone(), Schema::String));
        values.push((name.clone(), Value::String(value.clone())));
    }
    (Schema::struct_of(fields), Value::Struct(values))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "cps_message_body";

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_scalar_encodings() {
        let (p, a) = encode(Some(&Schema::Int32), &Value::Int32(5), BODY).unwrap();
        assert_eq!(p, vec![0, 0, 0, 5]);
        assert!(a.is_empty());

        let (p, _) = encode(Some(&Schema::Boolean), &Value::Boolean(true), BODY).unwrap();
        assert_eq!(p, vec![1]);

        let (p, _) = encode(Some(&Schema::Int16), &Value::Int16(-2), BODY).unwrap();
        assert_eq!(p, vec![0xff, 0xfe]);

        let (p, _) = encode(Some(&Schema::Float64), &Value::Float64(1.5), BODY).unwrap();
        assert_eq!(p, 1.5f64.to_be_bytes().to_vec());

        let (p, _) = encode(Some(&Schema::String), &Value::from("héllo"), BODY).unwrap();
        assert_eq!(p, "héllo".as_bytes());
    }

    #[test]
    fn test_variant_mismatch_is_error() {
        let err = encode(Some(&Schema::Int64), &Value::Int32(5), BODY).unwrap_err();
        assert_eq!(err.kind(), bridge_api::ErrorKind::Encoding);
    }

    #[test]
    fn test_array_concatenates_elements() {
        let schema = Schema::array_of(Schema::Int16);
        let value = Value::Array(vec![Value::Int16(1), Value::Int16(2)]);
        let (p, _) = encode(Some(&schema), &value, BODY).unwrap();
        assert_eq!(p, vec![0, 1, 0, 2]);
    }

    #[test]
    fn test_array_of_structs_is_error() {
        let schema = Schema::array_of(Schema::struct_of(vec![]));
        let value = Value::Array(vec![Value::Struct(vec![])]);
        assert!(encode(Some(&schema), &value, BODY).is_err());
    }

    #[test]
    fn test_struct_body_and_attributes() {
        let schema = Schema::struct_of(vec![
            Field::required(BODY, Schema::String),
            Field::required("count", Schema::Int32),
            Field::optional("note", Schema::String),
            Field::required("tags", Schema::array_of(Schema::Int8)),
        ]);
        let value = Value::Struct(vec![
            ("count".into(), Value::Int32(3)),
            (BODY.into(), Value::from("hi")),
            ("tags".into(), Value::Array(vec![Value::Int8(1), Value::Int8(2)])),
        ]);
        let (p, a) = encode(Some(&schema), &value, BODY).unwrap();
        assert_eq!(p, b"hi");
        assert_eq!(a, attrs(&[("count", "3"), ("tags", "[1, 2]")]));
    }

    #[test]
    fn test_struct_missing_required_is_error() {
        let schema = Schema::struct_of(vec![Field::required("id", Schema::Int64)]);
        let value = Value::Struct(vec![("id".into(), Value::Null)]);
        let err = encode(Some(&schema), &value, BODY).unwrap_err();
        assert!(err.message().contains("'id'"));
    }

    #[test]
    fn test_struct_without_body_has_empty_payload() {
        let schema = Schema::struct_of(vec![Field::required("a", Schema::Boolean)]);
        let value = Value::Struct(vec![("a".into(), Value::Boolean(false))]);
        let (p, a) = encode(Some(&schema), &value, BODY).unwrap();
        assert!(p.is_empty());
        assert_eq!(a, attrs(&[("a", "false")]));
    }

    #[test]
    fn test_struct_nested_field_is_error() {
        let schema = Schema::struct_of(vec![Field::optional(
            "inner",
            Schema::struct_of(vec![]),
        )]);
        let value = Value::Struct(vec![]);
        assert!(encode(Some(&schema), &value, BODY).is_err());
    }

    #[test]
    fn test_struct_map_field_is_error() {
        let schema = Schema::struct_of(vec![
            Field::required(BODY, Schema::String),
            Field::optional("labels", Schema::map_of(Schema::String)),
        ]);
        let value = Value::Struct(vec![(BODY.into(), Value::from("hi"))]);
        let err = encode(Some(&schema), &value, BODY).unwrap_err();
        assert_eq!(err.kind(), bridge_api::ErrorKind::Encoding);
        assert!(err.message().contains("'labels'"));
        assert!(err.message().contains("map"));
    }

    #[test]
    fn test_array_of_maps_is_error() {
        let schema = Schema::array_of(Schema::map_of(Schema::Int32));
        let value = Value::Array(vec![Value::Map(vec![(Value::from("a"), Value::Int32(1))])]);
        let err = encode(Some(&schema), &value, BODY).unwrap_err();
        assert_eq!(err.kind(), bridge_api::ErrorKind::Encoding);
        assert!(err.message().contains("array elements of type map"));
    }

    #[test]
    fn test_map_of_nested_values_is_error() {
        for values in [Schema::struct_of(vec![]), Schema::map_of(Schema::String)] {
            let expected = format!("map values of type {}", values.type_name());
            let schema = Schema::map_of(values);
            let value = Value::Map(vec![(Value::from(BODY), Value::Null)]);
            let err = encode(Some(&schema), &value, BODY).unwrap_err();
            assert_eq!(err.kind(), bridge_api::ErrorKind::Encoding);
            assert!(err.message().contains(&expected));
        }
    }

    #[test]
    fn test_map_body_entry() {
        let schema = Schema::map_of(Schema::String);
        let value = Value::Map(vec![
            (Value::from("color"), Value::from("red")),
            (Value::from(BODY), Value::from("payload")),
        ]);
        let (p, a) = encode(Some(&schema), &value, BODY).unwrap();
        assert_eq!(p, b"payload");
        assert_eq!(a, attrs(&[("color", "red")]));
    }

    #[test]
    fn test_schemaless_is_stringified() {
        let (p, _) = encode(None, &Value::Int64(42), BODY).unwrap();
        assert_eq!(p, b"42");
        let (p, _) = encode(None, &Value::Bytes(vec![0xff, 0x00]), BODY).unwrap();
        assert_eq!(p, b"/wA=");
    }

    #[test]
    fn test_stringify_floats_keep_point() {
        assert_eq!(stringify(&Value::Float64(1.0)).unwrap(), "1.0");
        assert_eq!(stringify(&Value::Float32(0.1)).unwrap(), "0.1");
        assert!(stringify(&Value::Map(vec![])).is_err());
    }

    #[test]
    fn test_classify_plain_bytes() {
        let msg = Message::new(b"body".to_vec(), attrs(&[("k", "dog"), ("ts", "5")]));
        let (schema, value) = classify(&msg, Some("k"), Some("ts"));
        assert_eq!(schema, Schema::Bytes);
        assert_eq!(value, Value::Bytes(b"body".to_vec()));
    }

    #[test]
    fn test_classify_struct_skips_key() {
        let msg = Message::new(b"body".to_vec(), attrs(&[("k", "dog"), ("color", "red"), ("ts", "5")]));
        let (schema, value) = classify(&msg, Some("k"), Some("ts"));
        assert_eq!(
            schema,
            Schema::struct_of(vec![
                Field::required("message", Schema::Bytes),
                Field::required("color", Schema::String),
                Field::required("ts", Schema::String),
            ])
        );
        assert_eq!(value.get("color"), Some(&Value::from("red")));
        assert_eq!(value.get("k"), None);
    }
}

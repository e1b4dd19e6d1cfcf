//! Nested JSON objects to single-level records keyed by dot paths.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::discovery::schema::join_path;

/// Leaf value allowed in a [`DataRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(number) => number.as_f64(),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(flag) => Value::Bool(*flag),
            Self::Number(number) => Value::Number(number.clone()),
            Self::String(text) => Value::String(text.clone()),
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Number::from_f64(value).map_or(Self::Null, Self::Number)
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Number(Number::from(value))
    }
}

impl From<bool> for Scalar {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

/// Flat mapping from dot path to scalar.
pub type DataRecord = BTreeMap<String, Scalar>;

/// Flattens `value` into a [`DataRecord`]; non-objects produce an empty record.
///
/// Arrays are kept as their JSON text and never recursed into. When two
/// paths collide the later key in document order wins.
pub fn flatten(value: &Value, prefix: &str) -> DataRecord {
    let mut record = DataRecord::new();
    if let Value::Object(object) = value {
        flatten_into(object, prefix, &mut record);
    }
    record
}

fn flatten_into(object: &Map<String, Value>, prefix: &str, record: &mut DataRecord) {
    for (key, value) in object {
        let path = join_path(prefix, key);
        match value {
            Value::Null => {
                record.insert(path, Scalar::Null);
            }
            Value::Array(_) => {
                record.insert(path, Scalar::String(value.to_string()));
            }
            Value::Object(nested) => flatten_into(nested, &path, record),
            Value::Bool(flag) => {
                record.insert(path, Scalar::Bool(*flag));
            }
            Value::Number(number) => {
                record.insert(path, Scalar::Number(number.clone()));
            }
            Value::String(text) => {
                record.insert(path, Scalar::String(text.clone()));
            }
        }
    }
}

/// Re-nests a flat record by splitting keys on `.`.
///
/// Array-valued fields come back as their JSON text. A path that is both a
/// leaf and a prefix of another path keeps whichever was written last.
pub fn unflatten(record: &DataRecord) -> Value {
    let mut root = Map::new();
    for (path, scalar) in record {
        let mut segments = path.split('.').peekable();
        let mut cursor = &mut root;
        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                cursor.insert(segment.to_owned(), scalar.to_value());
                break;
            }
            let slot = cursor
                .entry(segment.to_owned())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let Some(next) = slot.as_object_mut() else {
                break;
            };
            cursor = next;
        }
    }
    Value::Object(root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn already_flat_documents_pass_through() {
        let record = flatten(&json!({"price": 1234.56, "updated": "2025-12-26"}), "");

        assert_eq!(record.len(), 2);
        assert_eq!(record["price"].as_f64(), Some(1234.56));
        assert_eq!(record["updated"], Scalar::from("2025-12-26"));
    }

    #[test]
    fn nested_objects_merge_into_dotted_keys() {
        let record = flatten(
            &json!({"meta": {"source": {"name": "feed"}, "ok": true}, "n": null}),
            "",
        );

        assert_eq!(record["meta.source.name"], Scalar::from("feed"));
        assert_eq!(record["meta.ok"], Scalar::Bool(true));
        assert_eq!(record["n"], Scalar::Null);
    }

    #[test]
    fn arrays_are_serialized_not_flattened() {
        let record = flatten(&json!({"tags": ["a", "b"], "rows": [{"x": 1}]}), "");

        assert_eq!(record["tags"], Scalar::from(r#"["a","b"]"#));
        assert_eq!(record["rows"], Scalar::from(r#"[{"x":1}]"#));
        assert!(!record.contains_key("rows.x"));
    }

    #[test]
    fn prefix_is_applied_to_every_key() {
        let record = flatten(&json!({"a": {"b": 1}}), "root");
        assert!(record.contains_key("root.a.b"));
    }

    #[test]
    fn non_objects_flatten_to_empty_records() {
        assert!(flatten(&json!([1, 2]), "").is_empty());
        assert!(flatten(&json!("text"), "").is_empty());
        assert!(flatten(&Value::Null, "").is_empty());
    }

    #[test]
    fn colliding_paths_keep_the_last_write() {
        let record = flatten(&json!({"a": {"b": 1}, "a.b": 2}), "");
        assert_eq!(record["a.b"], Scalar::from(2_i64));
    }

    #[test]
    fn unflatten_restores_nesting() {
        let original = json!({"a": {"b": 1, "c": {"d": "x"}}, "e": [1, 2]});
        let restored = unflatten(&flatten(&original, ""));
        assert_eq!(restored, json!({"a": {"b": 1, "c": {"d": "x"}}, "e": "[1,2]"}));
    }
}

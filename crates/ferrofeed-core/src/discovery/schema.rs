//! Field tree discovery over a single sample document.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::types::{infer_type, FieldType};

/// One discovered field. Containers carry `children` when they could be
/// expanded; leaves never do.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldNode {
    pub name: String,
    pub path: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<FieldNode>>,
}

impl FieldNode {
    pub fn leaf(name: impl Into<String>, path: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            field_type,
            children: None,
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_none()
    }

    /// Depth-first lookup by dot path.
    pub fn find<'a>(fields: &'a [FieldNode], path: &str) -> Option<&'a FieldNode> {
        fields.iter().find_map(|node| {
            if node.path == path {
                return Some(node);
            }
            node.children
                .as_deref()
                .and_then(|children| Self::find(children, path))
        })
    }
}

/// Output of [`discover`]: the field tree plus its flattened leaf paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    pub fields: Vec<FieldNode>,
    pub total_fields: usize,
    pub paths: Vec<String>,
    pub is_array: bool,
}

impl DiscoveryResult {
    /// Number of leaves in the tree, counted without the path listing.
    pub fn leaf_count(&self) -> usize {
        fn count(nodes: &[FieldNode]) -> usize {
            nodes
                .iter()
                .map(|node| match &node.children {
                    Some(children) => count(children),
                    None => 1,
                })
                .sum()
        }
        count(&self.fields)
    }
}

/// Builds the field tree for `document`.
///
/// Arrays are sampled through their first element; objects are used as is;
/// any other document yields an empty result.
pub fn discover(document: &Value) -> DiscoveryResult {
    let (sample, is_array) = match document {
        Value::Array(items) => (items.first().and_then(Value::as_object), true),
        Value::Object(object) => (Some(object), false),
        _ => (None, false),
    };

    let fields = sample
        .map(|object| build_tree(object, ""))
        .unwrap_or_default();
    let paths = all_paths(&fields);

    DiscoveryResult {
        total_fields: paths.len(),
        fields,
        paths,
        is_array,
    }
}

/// Recursively builds field nodes for every key of `object` under `prefix`.
pub fn build_tree(object: &Map<String, Value>, prefix: &str) -> Vec<FieldNode> {
    object
        .iter()
        .map(|(key, value)| {
            let path = join_path(prefix, key);
            match value {
                Value::Object(nested) => FieldNode {
                    name: key.clone(),
                    children: Some(build_tree(nested, &path)),
                    path,
                    field_type: FieldType::Object,
                },
                Value::Array(items) => match items.first() {
                    Some(Value::Object(element)) => FieldNode {
                        name: key.clone(),
                        children: Some(build_tree(element, &path)),
                        path,
                        field_type: FieldType::Array,
                    },
                    _ => FieldNode::leaf(key.clone(), path, FieldType::Array),
                },
                scalar => FieldNode::leaf(key.clone(), path, infer_type(scalar)),
            }
        })
        .collect()
}

/// Pre-order listing of leaf paths.
pub fn all_paths(fields: &[FieldNode]) -> Vec<String> {
    let mut paths = Vec::new();
    collect_leaf_paths(fields, &mut paths);
    paths
}

fn collect_leaf_paths(fields: &[FieldNode], out: &mut Vec<String>) {
    for node in fields {
        match &node.children {
            Some(children) => collect_leaf_paths(children, out),
            None => out.push(node.path.clone()),
        }
    }
}

pub(crate) fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_owned()
    } else {
        format!("{prefix}.{key}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_object_yields_typed_leaves() {
        let result = discover(&json!({"price": 1234.56, "updated": "2025-12-26"}));

        assert!(!result.is_array);
        assert_eq!(result.total_fields, 2);
        assert_eq!(result.paths, vec!["price", "updated"]);
        assert_eq!(result.fields[0].field_type, FieldType::Number);
        assert_eq!(result.fields[1].field_type, FieldType::Date);
    }

    #[test]
    fn nested_objects_extend_the_path() {
        let result = discover(&json!({
            "quote": {"bid": 1.0, "ask": {"price": 1.1, "size": 3}},
            "symbol": "EURUSD"
        }));

        assert_eq!(result.paths, vec!["quote.bid", "quote.ask.price", "quote.ask.size", "symbol"]);
        let ask = FieldNode::find(&result.fields, "quote.ask").expect("container exists");
        assert_eq!(ask.field_type, FieldType::Object);
        assert_eq!(ask.children.as_ref().map(Vec::len), Some(2));
        assert_eq!(result.leaf_count(), 4);
    }

    #[test]
    fn array_documents_sample_first_element() {
        let result = discover(&json!([{"id": 1, "name": "a"}, {"id": 2, "extra": true}]));

        assert!(result.is_array);
        assert_eq!(result.paths, vec!["id", "name"]);
    }

    #[test]
    fn arrays_of_objects_expand_under_same_path() {
        let result = discover(&json!({"trades": [{"px": 1.5, "qty": 2}], "tags": ["a", "b"], "empty": []}));

        let trades = &result.fields[0];
        assert_eq!(trades.field_type, FieldType::Array);
        assert_eq!(trades.path, "trades");
        let children = trades.children.as_ref().expect("expanded");
        assert_eq!(children[0].path, "trades.px");

        assert_eq!(result.fields[1].field_type, FieldType::Array);
        assert!(result.fields[1].is_leaf());
        assert!(result.fields[2].is_leaf());
        assert_eq!(result.paths, vec!["trades.px", "trades.qty", "tags", "empty"]);
    }

    #[test]
    fn scalar_documents_and_scalar_arrays_yield_nothing() {
        assert_eq!(discover(&json!(42)).total_fields, 0);
        assert_eq!(discover(&json!("text")).fields.len(), 0);
        let scalars = discover(&json!([1, 2, 3]));
        assert!(scalars.is_array);
        assert!(scalars.fields.is_empty());
    }

    #[test]
    fn discovery_is_deterministic() {
        let document = json!({"b": {"c": [ {"d": null} ]}, "a": "2025-01-01"});
        assert_eq!(discover(&document), discover(&document));
    }
}

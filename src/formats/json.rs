//! JSON source files.
//!
//! A file holds either one object (one row) or an array of objects. Objects
//! from any number of files are combined into a single dataset whose columns
//! are the union of all keys in first-seen order.

use anyhow::{Context, Result, bail};
use serde_json::{Map, Value as JsonValue};
use std::path::Path;

use crate::dataset::{Cell, ColumnBuilder, Dataset};
use crate::formats::reader::DatasetReader;

pub type JsonObject = Map<String, JsonValue>;

/// Parse one file into its row objects
pub fn read_objects(path: &Path) -> Result<Vec<JsonObject>> {
    let raw = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    parse_objects(&raw).with_context(|| format!("Failed to parse {}", path.display()))
}

fn parse_objects(raw: &[u8]) -> Result<Vec<JsonObject>> {
    match serde_json::from_slice::<JsonValue>(raw)? {
        JsonValue::Object(object) => Ok(vec![object]),
        JsonValue::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(idx, item)| match item {
                JsonValue::Object(object) => Ok(object),
                other => bail!("Array element {} is not an object: {}", idx, other),
            })
            .collect(),
        other => bail!("Expected an object or an array of objects, found {}", other),
    }
}

/// Combine row objects into one dataset
pub fn objects_to_dataset(objects: &[JsonObject]) -> Result<Dataset> {
    let mut names: Vec<&str> = Vec::new();
    for object in objects {
        for key in object.keys() {
            if !names.contains(&key.as_str()) {
                names.push(key);
            }
        }
    }

    let mut builders: Vec<ColumnBuilder> = names.iter().map(|n| ColumnBuilder::new(*n)).collect();
    for object in objects {
        for (name, builder) in names.iter().zip(builders.iter_mut()) {
            builder.push(object.get(*name).map(json_cell).unwrap_or(Cell::Null));
        }
    }

    Dataset::from_builders(builders)
}

fn json_cell(value: &JsonValue) -> Cell {
    match value {
        JsonValue::Null => Cell::Null,
        JsonValue::Bool(b) => Cell::Typed {
            type_name: "Bool",
            text: b.to_string(),
        },
        JsonValue::Number(n) => match n.as_i64() {
            Some(v) => Cell::Int(v),
            None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Text(n.to_string())),
        },
        JsonValue::String(s) => Cell::Text(s.clone()),
        nested => Cell::Text(nested.to_string()),
    }
}

pub struct JsonReader;

impl DatasetReader for JsonReader {
    fn read(&self, path: &Path) -> Result<Dataset> {
        objects_to_dataset(&read_objects(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ColumnKind, Value};

    fn objects(raw: &str) -> Vec<JsonObject> {
        parse_objects(raw.as_bytes()).unwrap()
    }

    #[test]
    fn test_single_object_is_one_row() {
        let dataset = objects_to_dataset(&objects(r#"{"id": 1, "name": "a"}"#)).unwrap();
        assert_eq!(dataset.num_rows(), 1);
        assert_eq!(dataset.column_names(), vec!["id", "name"]);
    }

    #[test]
    fn test_keys_union_in_first_seen_order() {
        let mut rows = objects(r#"{"b": 1, "a": 2}"#);
        rows.extend(objects(r#"[{"c": "x"}, {"a": 3, "b": 4}]"#));

        let dataset = objects_to_dataset(&rows).unwrap();
        assert_eq!(dataset.column_names(), vec!["b", "a", "c"]);
        assert_eq!(dataset.num_rows(), 3);
        assert_eq!(dataset.columns()[2].values()[0], Value::Null);
        assert_eq!(
            dataset.columns()[2].values()[1],
            Value::Text("x".to_string())
        );
    }

    #[test]
    fn test_value_kinds() {
        let dataset = objects_to_dataset(&objects(
            r#"[{"n": 1, "f": 1.5, "b": true, "nested": {"k": [1, 2]}},
                {"n": 2, "f": 2, "b": false, "nested": null}]"#,
        ))
        .unwrap();

        let kinds: Vec<&ColumnKind> = dataset.columns().iter().map(|c| c.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                &ColumnKind::Int64,
                &ColumnKind::Float64,
                &ColumnKind::Other("Bool".to_string()),
                &ColumnKind::Text,
            ]
        );
        assert_eq!(
            dataset.columns()[3].values()[0],
            Value::Text(r#"{"k":[1,2]}"#.to_string())
        );
    }

    #[test]
    fn test_rejects_non_objects() {
        assert!(parse_objects(b"[1, 2]").is_err());
        assert!(parse_objects(b"\"text\"").is_err());
        assert!(parse_objects(b"{not json").is_err());
    }

    #[test]
    fn test_no_objects_is_empty() {
        assert!(objects_to_dataset(&[]).unwrap().is_empty());
        assert!(objects_to_dataset(&objects("[]")).unwrap().is_empty());
    }
}

//! # Dynamic Values
//!
//! Tagged representation of Terraform attribute trees and the conversions
//! between that representation, JSON parameter trees, and the flat
//! `attribute path -> string` encoding used by SDKv2-style instance state.
//!
//! Conversions are total for well-formed trees; leaves that violate
//! expectations fail with an error naming the offending path.

use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use thiserror::Error;

/// Errors produced while converting attribute values
#[derive(Debug, Error)]
pub enum ValueError {
    #[error("number {value} at {path} overflows the supported numeric range")]
    NumberOverflow { path: String, value: String },
    #[error("unknown value at {path} cannot be converted to a concrete tree")]
    UnknownValue { path: String },
    #[error("cannot parse {value:?} at {path} as {expected}")]
    ParseFailure {
        path: String,
        value: String,
        expected: &'static str,
    },
    #[error("dynamic pseudo-types are not supported (attribute {path})")]
    DynamicPseudoType { path: String },
}

/// A Terraform attribute value
///
/// Sets and tuples are carried as ordered sequences; objects and maps both
/// become string-keyed mappings.
#[derive(Debug, Clone, PartialEq)]
pub enum DynamicValue {
    Null,
    /// Value not yet known to the provider (pre-apply plan output)
    Unknown,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<DynamicValue>),
    Map(BTreeMap<String, DynamicValue>),
    Object(BTreeMap<String, DynamicValue>),
}

impl DynamicValue {
    /// Convert a JSON tree into a dynamic value.
    ///
    /// Numbers become integers when integral, otherwise 64-bit floats; values
    /// outside that range fail rather than silently losing precision.
    pub fn from_json(value: &Value) -> Result<Self, ValueError> {
        Self::from_json_at(value, "")
    }

    fn from_json_at(value: &Value, path: &str) -> Result<Self, ValueError> {
        Ok(match value {
            Value::Null => DynamicValue::Null,
            Value::Bool(b) => DynamicValue::Bool(*b),
            Value::Number(n) => number_to_dynamic(n, path)?,
            Value::String(s) => DynamicValue::String(s.clone()),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(Self::from_json_at(item, &child_path(path, &i.to_string()))?);
                }
                DynamicValue::List(out)
            }
            Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), Self::from_json_at(v, &child_path(path, k))?);
                }
                DynamicValue::Object(out)
            }
        })
    }

    /// Convert back into a JSON tree. Unknown leaves fail: only fully known
    /// state may be persisted or surfaced as observation.
    pub fn to_json(&self) -> Result<Value, ValueError> {
        self.to_json_at("")
    }

    fn to_json_at(&self, path: &str) -> Result<Value, ValueError> {
        Ok(match self {
            DynamicValue::Null => Value::Null,
            DynamicValue::Unknown => {
                return Err(ValueError::UnknownValue {
                    path: display_path(path),
                })
            }
            DynamicValue::Bool(b) => Value::Bool(*b),
            DynamicValue::Int(i) => Value::Number((*i).into()),
            DynamicValue::Float(f) => Value::Number(
                Number::from_f64(*f).ok_or_else(|| ValueError::NumberOverflow {
                    path: display_path(path),
                    value: f.to_string(),
                })?,
            ),
            DynamicValue::String(s) => Value::String(s.clone()),
            DynamicValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(item.to_json_at(&child_path(path, &i.to_string()))?);
                }
                Value::Array(out)
            }
            DynamicValue::Map(entries) | DynamicValue::Object(entries) => {
                let mut out = Map::new();
                for (k, v) in entries {
                    out.insert(k.clone(), v.to_json_at(&child_path(path, k))?);
                }
                Value::Object(out)
            }
        })
    }

    /// Whether the value contains any unknown leaf
    pub fn has_unknown(&self) -> bool {
        match self {
            DynamicValue::Unknown => true,
            DynamicValue::List(items) => items.iter().any(DynamicValue::has_unknown),
            DynamicValue::Map(entries) | DynamicValue::Object(entries) => {
                entries.values().any(DynamicValue::has_unknown)
            }
            _ => false,
        }
    }
}

fn number_to_dynamic(n: &Number, path: &str) -> Result<DynamicValue, ValueError> {
    if let Some(i) = n.as_i64() {
        return Ok(DynamicValue::Int(i));
    }
    if let Some(f) = n.as_f64() {
        if f.is_finite() {
            return Ok(DynamicValue::Float(f));
        }
    }
    Err(ValueError::NumberOverflow {
        path: display_path(path),
        value: n.to_string(),
    })
}

fn child_path(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.to_string()
    }
}

/// Flatten a JSON parameter tree into SDKv2-style flat attributes.
///
/// Lists carry a `#` count entry, maps a `%` count entry; nested fields join
/// their parents with `.`. Null leaves are omitted entirely, matching what a
/// provider reports for unset attributes.
pub fn flatten_json(
    prefix: &str,
    value: &Value,
    out: &mut BTreeMap<String, String>,
) -> Result<(), ValueError> {
    match value {
        Value::Null => {}
        Value::Bool(b) => {
            out.insert(prefix.to_string(), b.to_string());
        }
        Value::Number(n) => {
            out.insert(prefix.to_string(), n.to_string());
        }
        Value::String(s) => {
            out.insert(prefix.to_string(), s.clone());
        }
        Value::Array(items) => {
            out.insert(format!("{prefix}.#"), items.len().to_string());
            for (i, item) in items.iter().enumerate() {
                flatten_json(&format!("{prefix}.{i}"), item, out)?;
            }
        }
        Value::Object(map) => {
            if prefix.is_empty() {
                for (k, v) in map {
                    flatten_json(k, v, out)?;
                }
            } else {
                out.insert(format!("{prefix}.%"), map.len().to_string());
                for (k, v) in map {
                    flatten_json(&format!("{prefix}.{k}"), v, out)?;
                }
            }
        }
    }
    Ok(())
}

/// Flatten a top-level parameter map into flat attributes
pub fn flatten_parameters(params: &Map<String, Value>) -> Result<BTreeMap<String, String>, ValueError> {
    let mut out = BTreeMap::new();
    flatten_json("", &Value::Object(params.clone()), &mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_narrows_numbers() {
        assert_eq!(
            DynamicValue::from_json(&json!(42)).unwrap(),
            DynamicValue::Int(42)
        );
        assert_eq!(
            DynamicValue::from_json(&json!(2.5)).unwrap(),
            DynamicValue::Float(2.5)
        );
    }

    #[test]
    fn test_to_json_fails_on_unknown_with_path() {
        let value = DynamicValue::Object(BTreeMap::from([(
            "endpoint".to_string(),
            DynamicValue::Unknown,
        )]));
        let err = value.to_json().unwrap_err();
        assert!(err.to_string().contains("endpoint"));
    }

    #[test]
    fn test_json_round_trip() {
        let tree = json!({"a": [1, "two", true], "m": {"k": 3.5}, "n": null});
        let dynamic = DynamicValue::from_json(&tree).unwrap();
        assert_eq!(dynamic.to_json().unwrap(), tree);
    }

    #[test]
    fn test_flatten_lists_and_maps() {
        let params = json!({
            "name": "db",
            "zones": ["a", "b"],
            "tags": {"team": "storage"},
            "nested": [{"port": 5432}]
        });
        let mut out = BTreeMap::new();
        flatten_json("", &params, &mut out).unwrap();
        assert_eq!(out.get("name").map(String::as_str), Some("db"));
        assert_eq!(out.get("zones.#").map(String::as_str), Some("2"));
        assert_eq!(out.get("zones.1").map(String::as_str), Some("b"));
        assert_eq!(out.get("tags.%").map(String::as_str), Some("1"));
        assert_eq!(out.get("tags.team").map(String::as_str), Some("storage"));
        assert_eq!(out.get("nested.#").map(String::as_str), Some("1"));
        assert_eq!(out.get("nested.0.port").map(String::as_str), Some("5432"));
    }

    #[test]
    fn test_flatten_omits_null_leaves() {
        let mut out = BTreeMap::new();
        flatten_json("", &json!({"a": null, "b": "x"}), &mut out).unwrap();
        assert!(!out.contains_key("a"));
        assert!(out.contains_key("b"));
    }
}

//! # Late Initialization
//!
//! Fills absent spec parameters from the observed state so that defaults
//! chosen server-side survive into the desired state and stop showing up as
//! drift. Only missing fields are filled; anything the user set stays as-is.

use serde_json::{Map, Value};

use crate::resource::fieldpath::{FieldPath, Segment};

/// Merge observed values into the parameters, filling only absent fields.
///
/// `ignored` lists parameter paths (wildcards allowed) that must never be
/// late-initialized, typically identifier fields and sensitive parameters.
/// Returns whether anything was filled.
pub fn late_initialize(
    params: &mut Map<String, Value>,
    observed: &Map<String, Value>,
    ignored: &[FieldPath],
) -> bool {
    let mut path = Vec::new();
    fill_object(params, observed, ignored, &mut path)
}

fn fill_object(
    params: &mut Map<String, Value>,
    observed: &Map<String, Value>,
    ignored: &[FieldPath],
    path: &mut Vec<Segment>,
) -> bool {
    let mut changed = false;
    for (key, observed_value) in observed {
        if observed_value.is_null() {
            continue;
        }
        path.push(Segment::Field(key.clone()));
        if is_ignored(ignored, path) {
            path.pop();
            continue;
        }
        match params.get_mut(key) {
            None => {
                params.insert(key.clone(), observed_value.clone());
                changed = true;
            }
            Some(existing) => {
                changed |= fill_value(existing, observed_value, ignored, path);
            }
        }
        path.pop();
    }
    changed
}

fn fill_value(
    existing: &mut Value,
    observed: &Value,
    ignored: &[FieldPath],
    path: &mut Vec<Segment>,
) -> bool {
    match (existing, observed) {
        (Value::Object(params), Value::Object(obs)) => fill_object(params, obs, ignored, path),
        (Value::Array(params), Value::Array(obs)) => {
            let mut changed = false;
            for (i, (item, observed_item)) in params.iter_mut().zip(obs).enumerate() {
                path.push(Segment::Index(i));
                if !is_ignored(ignored, path) {
                    changed |= fill_value(item, observed_item, ignored, path);
                }
                path.pop();
            }
            changed
        }
        // Scalars the user set are never overwritten.
        _ => false,
    }
}

/// Whether any ignored path matches a prefix of the current path, with
/// wildcards matching any index or key
fn is_ignored(ignored: &[FieldPath], path: &[Segment]) -> bool {
    ignored.iter().any(|candidate| {
        candidate.0.len() <= path.len()
            && candidate.0.iter().zip(path).all(|(c, p)| match c {
                Segment::Wildcard => true,
                other => other == p,
            })
    })
}

/// Deep-merge `for_provider` over `init_provider`.
///
/// forProvider wins for scalars; lists are replaced, not concatenated, unless
/// the list's path appears in `append_paths`. Objects merge recursively.
pub fn merge_parameters(
    for_provider: &Map<String, Value>,
    init_provider: &Map<String, Value>,
    append_paths: &[FieldPath],
) -> Map<String, Value> {
    let mut path = Vec::new();
    merge_objects(for_provider, init_provider, append_paths, &mut path)
}

fn merge_objects(
    for_provider: &Map<String, Value>,
    init_provider: &Map<String, Value>,
    append_paths: &[FieldPath],
    path: &mut Vec<Segment>,
) -> Map<String, Value> {
    let mut out = init_provider.clone();
    for (key, for_value) in for_provider {
        path.push(Segment::Field(key.clone()));
        let merged = match (out.get(key), for_value) {
            (Some(Value::Object(init_obj)), Value::Object(for_obj)) => {
                Value::Object(merge_objects(for_obj, init_obj, append_paths, path))
            }
            (Some(Value::Array(init_list)), Value::Array(for_list))
                if is_ignored(append_paths, path) =>
            {
                let mut combined = init_list.clone();
                combined.extend(for_list.iter().cloned());
                Value::Array(combined)
            }
            _ => for_value.clone(),
        };
        out.insert(key.clone(), merged);
        path.pop();
    }
    out
}

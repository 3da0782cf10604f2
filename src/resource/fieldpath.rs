//! # Field Paths
//!
//! Parsing and evaluation of field paths over JSON-shaped attribute trees.
//!
//! Paths use dotted-field syntax with bracket segments for indices, map keys
//! that contain reserved characters, and wildcards:
//!
//! - `spec.forProvider.instanceClass`
//! - `topConfigArray[2].innerConfigArray[*].bottomLevelSecret`
//! - `metadata.annotations[crossplane.io/external-name]`
//!
//! Wildcards fan out across list elements and map keys; expansion preserves
//! positional order so callers can align values across parallel trees.

use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Errors produced while parsing or evaluating field paths
#[derive(Debug, Error)]
pub enum FieldPathError {
    #[error("invalid field path {path:?}: {reason}")]
    Parse { path: String, reason: String },
    #[error("cannot access field {segment:?} on non-object value at {at}")]
    NotAnObject { segment: String, at: String },
    #[error("cannot index into non-array value at {at}")]
    NotAnArray { at: String },
    #[error("cannot get string for field path {path}")]
    NotAString { path: String },
}

/// One step of a field path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Named field of an object or key of a map
    Field(String),
    /// Positional index of an array
    Index(usize),
    /// Fan-out over all elements of an array or all keys of a map
    Wildcard,
}

impl Segment {
    fn needs_brackets(name: &str) -> bool {
        name.is_empty()
            || name
                .chars()
                .any(|c| c == '.' || c == '[' || c == ']' || c == '*')
            || name.chars().all(|c| c.is_ascii_digit())
    }
}

/// A parsed field path
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldPath(pub Vec<Segment>);

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.0.iter().enumerate() {
            match segment {
                Segment::Field(name) if Segment::needs_brackets(name) => {
                    write!(f, "[{name}]")?;
                }
                Segment::Field(name) => {
                    if i > 0 {
                        write!(f, ".")?;
                    }
                    write!(f, "{name}")?;
                }
                Segment::Index(idx) => write!(f, "[{idx}]")?,
                Segment::Wildcard => write!(f, "[*]")?,
            }
        }
        Ok(())
    }
}

impl FieldPath {
    /// Parse a field path from its string form
    pub fn parse(path: &str) -> Result<Self, FieldPathError> {
        let mut segments = Vec::new();
        let mut chars = path.chars().peekable();
        let mut current = String::new();
        let err = |reason: &str| FieldPathError::Parse {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        while let Some(c) = chars.next() {
            match c {
                '.' => {
                    if !current.is_empty() {
                        segments.push(Segment::Field(std::mem::take(&mut current)));
                    }
                }
                '[' => {
                    if !current.is_empty() {
                        segments.push(Segment::Field(std::mem::take(&mut current)));
                    }
                    let mut inner = String::new();
                    let mut closed = false;
                    for b in chars.by_ref() {
                        if b == ']' {
                            closed = true;
                            break;
                        }
                        inner.push(b);
                    }
                    if !closed {
                        return Err(err("unterminated bracket segment"));
                    }
                    if inner == "*" {
                        segments.push(Segment::Wildcard);
                    } else if let Ok(idx) = inner.parse::<usize>() {
                        segments.push(Segment::Index(idx));
                    } else if inner.is_empty() {
                        return Err(err("empty bracket segment"));
                    } else {
                        segments.push(Segment::Field(inner));
                    }
                    // A dot directly after a bracket is a separator, not a field
                    if chars.peek() == Some(&'.') {
                        chars.next();
                    }
                }
                ']' => return Err(err("unbalanced closing bracket")),
                _ => current.push(c),
            }
        }
        if !current.is_empty() {
            segments.push(Segment::Field(current));
        }
        if segments.is_empty() {
            return Err(err("empty path"));
        }
        Ok(Self(segments))
    }

    /// Whether the path contains a wildcard segment
    pub fn has_wildcard(&self) -> bool {
        self.0.iter().any(|s| matches!(s, Segment::Wildcard))
    }

    /// Resolve the path against a value, returning None when any step is
    /// missing. Wildcard paths cannot be resolved directly; expand them first.
    pub fn get<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        let mut node = value;
        for segment in &self.0 {
            node = match segment {
                Segment::Field(name) => node.as_object()?.get(name)?,
                Segment::Index(idx) => node.as_array()?.get(*idx)?,
                Segment::Wildcard => return None,
            };
        }
        Some(node)
    }

    /// Set the value at the path, creating intermediate objects and padding
    /// arrays with null as needed
    pub fn set(&self, root: &mut Value, new: Value) -> Result<(), FieldPathError> {
        let mut node = root;
        let mut walked = FieldPath::default();
        for (i, segment) in self.0.iter().enumerate() {
            let last = i == self.0.len() - 1;
            walked.0.push(segment.clone());
            match segment {
                Segment::Field(name) => {
                    if node.is_null() {
                        *node = Value::Object(serde_json::Map::new());
                    }
                    let obj = node.as_object_mut().ok_or_else(|| {
                        FieldPathError::NotAnObject {
                            segment: name.clone(),
                            at: walked.to_string(),
                        }
                    })?;
                    if last {
                        obj.insert(name.clone(), new);
                        return Ok(());
                    }
                    node = obj.entry(name.clone()).or_insert(Value::Null);
                }
                Segment::Index(idx) => {
                    if node.is_null() {
                        *node = Value::Array(Vec::new());
                    }
                    let arr = node
                        .as_array_mut()
                        .ok_or_else(|| FieldPathError::NotAnArray {
                            at: walked.to_string(),
                        })?;
                    while arr.len() <= *idx {
                        arr.push(Value::Null);
                    }
                    if last {
                        arr[*idx] = new;
                        return Ok(());
                    }
                    node = &mut arr[*idx];
                }
                Segment::Wildcard => {
                    return Err(FieldPathError::Parse {
                        path: self.to_string(),
                        reason: "cannot set through a wildcard".to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Remove the value at the path. A trailing field segment is removed
    /// from its object; a trailing index is nulled out so sibling positions
    /// stay stable. Missing steps are a no-op.
    pub fn remove(&self, root: &mut Value) {
        let Some((last, parents)) = self.0.split_last() else {
            return;
        };
        let mut node = root;
        for segment in parents {
            node = match segment {
                Segment::Field(name) => match node.as_object_mut().and_then(|o| o.get_mut(name)) {
                    Some(child) => child,
                    None => return,
                },
                Segment::Index(idx) => match node.as_array_mut().and_then(|a| a.get_mut(*idx)) {
                    Some(child) => child,
                    None => return,
                },
                Segment::Wildcard => return,
            };
        }
        match last {
            Segment::Field(name) => {
                if let Some(obj) = node.as_object_mut() {
                    obj.remove(name);
                }
            }
            Segment::Index(idx) => {
                if let Some(item) = node.as_array_mut().and_then(|a| a.get_mut(*idx)) {
                    *item = Value::Null;
                }
            }
            Segment::Wildcard => {}
        }
    }

    /// Expand wildcards against a value, producing the concrete paths that
    /// exist in the tree. Expansion is depth-first and preserves element
    /// order, so parallel trees expand into positionally aligned lists.
    pub fn expand(&self, value: &Value) -> Vec<FieldPath> {
        let mut out = Vec::new();
        expand_into(value, &self.0, FieldPath::default(), &mut out);
        out
    }
}

fn expand_into(node: &Value, rest: &[Segment], prefix: FieldPath, out: &mut Vec<FieldPath>) {
    let Some((segment, tail)) = rest.split_first() else {
        out.push(prefix);
        return;
    };
    match segment {
        Segment::Field(name) => {
            if let Some(child) = node.as_object().and_then(|o| o.get(name)) {
                let mut next = prefix;
                next.0.push(Segment::Field(name.clone()));
                expand_into(child, tail, next, out);
            }
        }
        Segment::Index(idx) => {
            if let Some(child) = node.as_array().and_then(|a| a.get(*idx)) {
                let mut next = prefix;
                next.0.push(Segment::Index(*idx));
                expand_into(child, tail, next, out);
            }
        }
        Segment::Wildcard => match node {
            Value::Array(items) => {
                for (idx, child) in items.iter().enumerate() {
                    let mut next = prefix.clone();
                    next.0.push(Segment::Index(idx));
                    expand_into(child, tail, next, out);
                }
            }
            Value::Object(map) => {
                for (key, child) in map {
                    let mut next = prefix.clone();
                    next.0.push(Segment::Field(key.clone()));
                    expand_into(child, tail, next, out);
                }
            }
            _ => {}
        },
    }
}

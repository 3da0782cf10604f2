//! # Resource Schema
//!
//! Attribute-tree descriptor for a Terraform resource type: value types,
//! optional/required/computed/sensitive flags, ForceNew markers, and item
//! bounds. The diff engine consults the schema to classify attribute changes
//! and the SDK driver uses it to rebuild typed observation trees from flat
//! instance state.

use crate::provider::value::ValueError;
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;

/// Value type of a schema attribute
#[derive(Debug, Clone)]
pub enum AttributeType {
    String,
    Int,
    Float,
    Bool,
    /// Ordered sequence of a single element type
    List(Box<AttributeSchema>),
    /// Unordered collection, carried as an ordered sequence after provider
    /// normalization
    Set(Box<AttributeSchema>),
    /// String-keyed map of a single value type
    Map(Box<AttributeSchema>),
    /// Nested block with named fields
    Object(BTreeMap<String, AttributeSchema>),
    /// DynamicPseudoType: declared by some framework resources, rejected by
    /// the drivers
    Dynamic,
}

/// Schema of a single attribute
#[derive(Debug, Clone)]
pub struct AttributeSchema {
    pub r#type: AttributeType,
    pub optional: bool,
    pub required: bool,
    pub computed: bool,
    pub sensitive: bool,
    pub force_new: bool,
    pub min_items: Option<usize>,
    pub max_items: Option<usize>,
    /// Normalization applied to the desired value before diffing, so computed
    /// equality matches Terraform's (hash normalization, HCL canonicalization)
    pub state_func: Option<fn(&str) -> String>,
}

impl AttributeSchema {
    fn new(r#type: AttributeType) -> Self {
        Self {
            r#type,
            optional: false,
            required: false,
            computed: false,
            sensitive: false,
            force_new: false,
            min_items: None,
            max_items: None,
            state_func: None,
        }
    }

    pub fn string() -> Self {
        Self::new(AttributeType::String)
    }

    pub fn int() -> Self {
        Self::new(AttributeType::Int)
    }

    pub fn float() -> Self {
        Self::new(AttributeType::Float)
    }

    pub fn bool() -> Self {
        Self::new(AttributeType::Bool)
    }

    pub fn list(element: AttributeSchema) -> Self {
        Self::new(AttributeType::List(Box::new(element)))
    }

    pub fn set(element: AttributeSchema) -> Self {
        Self::new(AttributeType::Set(Box::new(element)))
    }

    pub fn map(value: AttributeSchema) -> Self {
        Self::new(AttributeType::Map(Box::new(value)))
    }

    pub fn object(fields: BTreeMap<String, AttributeSchema>) -> Self {
        Self::new(AttributeType::Object(fields))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn computed(mut self) -> Self {
        self.computed = true;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn force_new(mut self) -> Self {
        self.force_new = true;
        self
    }

    pub fn with_state_func(mut self, f: fn(&str) -> String) -> Self {
        self.state_func = Some(f);
        self
    }
}

/// Schema of a Terraform resource type
#[derive(Debug, Clone, Default)]
pub struct ResourceSchema {
    pub attributes: BTreeMap<String, AttributeSchema>,
    pub version: u64,
}

impl ResourceSchema {
    pub fn new(attributes: BTreeMap<String, AttributeSchema>) -> Self {
        Self {
            attributes,
            version: 0,
        }
    }

    /// Resolve the schema governing a flat attribute key.
    ///
    /// Count entries (`#` for sequences, `%` for maps) and element indices
    /// resolve to the collection they belong to, so replacement and
    /// sensitivity flags of the collection apply to them.
    pub fn lookup(&self, flat_key: &str) -> Option<&AttributeSchema> {
        let mut segments = flat_key.split('.');
        let first = segments.next()?;
        let mut current = self.attributes.get(first)?;
        let mut counter_owner = current;
        for segment in segments {
            match (&current.r#type, segment) {
                (AttributeType::List(_) | AttributeType::Set(_), "#")
                | (AttributeType::Map(_), "%") => return Some(counter_owner),
                (AttributeType::List(elem) | AttributeType::Set(elem), s)
                    if s.chars().all(|c| c.is_ascii_digit()) =>
                {
                    current = elem;
                }
                (AttributeType::Map(value), _) => {
                    current = value;
                }
                (AttributeType::Object(fields), name) => {
                    current = fields.get(name)?;
                    counter_owner = current;
                }
                _ => return None,
            }
            if current.force_new {
                counter_owner = current;
            }
        }
        Some(current)
    }

    /// Whether a change to the flat attribute key forces resource replacement
    pub fn forces_replacement(&self, flat_key: &str) -> bool {
        let mut segments = flat_key.split('.');
        let Some(first) = segments.next() else {
            return false;
        };
        let Some(mut current) = self.attributes.get(first) else {
            return false;
        };
        let mut forced = current.force_new;
        for segment in segments {
            match (&current.r#type, segment) {
                (AttributeType::List(_) | AttributeType::Set(_), "#")
                | (AttributeType::Map(_), "%") => return forced,
                (AttributeType::List(elem) | AttributeType::Set(elem), s)
                    if s.chars().all(|c| c.is_ascii_digit()) =>
                {
                    current = elem;
                }
                (AttributeType::Map(value), _) => {
                    current = value;
                }
                (AttributeType::Object(fields), name) => match fields.get(name) {
                    Some(field) => current = field,
                    None => return forced,
                },
                _ => return forced,
            }
            forced = forced || current.force_new;
        }
        forced
    }

    /// Whether the flat attribute key resolves to a sensitive attribute
    pub fn is_sensitive(&self, flat_key: &str) -> bool {
        self.lookup(flat_key).is_some_and(|s| s.sensitive)
    }

    /// Rebuild a typed observation tree from flat instance-state attributes.
    ///
    /// Attributes absent from the schema are skipped; the `id` attribute is
    /// carried by [`crate::provider::state::InstanceState`] separately.
    pub fn expand_attributes(
        &self,
        attrs: &BTreeMap<String, String>,
    ) -> Result<Map<String, Value>, ValueError> {
        let mut out = Map::new();
        for (name, schema) in &self.attributes {
            if let Some(value) = expand_attribute(name, schema, attrs)? {
                out.insert(name.clone(), value);
            }
        }
        Ok(out)
    }
}

fn expand_attribute(
    prefix: &str,
    schema: &AttributeSchema,
    attrs: &BTreeMap<String, String>,
) -> Result<Option<Value>, ValueError> {
    match &schema.r#type {
        AttributeType::String => Ok(attrs.get(prefix).map(|s| Value::String(s.clone()))),
        AttributeType::Int => attrs
            .get(prefix)
            .map(|s| {
                s.parse::<i64>()
                    .map(|i| Value::Number(i.into()))
                    .map_err(|_| parse_failure(prefix, s, "an integer"))
            })
            .transpose(),
        AttributeType::Float => attrs
            .get(prefix)
            .map(|s| {
                s.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or_else(|| parse_failure(prefix, s, "a float"))
            })
            .transpose(),
        AttributeType::Bool => attrs
            .get(prefix)
            .map(|s| {
                s.parse::<bool>()
                    .map(Value::Bool)
                    .map_err(|_| parse_failure(prefix, s, "a bool"))
            })
            .transpose(),
        AttributeType::List(element) | AttributeType::Set(element) => {
            let Some(count) = attrs.get(&format!("{prefix}.#")) else {
                return Ok(None);
            };
            let count: usize = count
                .parse()
                .map_err(|_| parse_failure(&format!("{prefix}.#"), count, "a count"))?;
            let mut items = Vec::with_capacity(count);
            for i in 0..count {
                items.push(
                    expand_attribute(&format!("{prefix}.{i}"), element, attrs)?
                        .unwrap_or(Value::Null),
                );
            }
            Ok(Some(Value::Array(items)))
        }
        AttributeType::Map(value_schema) => {
            if !attrs.contains_key(&format!("{prefix}.%")) {
                return Ok(None);
            }
            let mut entries = Map::new();
            let entry_prefix = format!("{prefix}.");
            for (key, _) in attrs.range(entry_prefix.clone()..) {
                if !key.starts_with(&entry_prefix) {
                    break;
                }
                let map_key = &key[entry_prefix.len()..];
                if map_key == "%" {
                    continue;
                }
                if let Some(v) = expand_attribute(key, value_schema, attrs)? {
                    entries.insert(map_key.to_string(), v);
                }
            }
            Ok(Some(Value::Object(entries)))
        }
        AttributeType::Object(fields) => {
            let mut out = Map::new();
            for (name, field) in fields {
                if let Some(v) = expand_attribute(&format!("{prefix}.{name}"), field, attrs)? {
                    out.insert(name.clone(), v);
                }
            }
            if out.is_empty() {
                Ok(None)
            } else {
                Ok(Some(Value::Object(out)))
            }
        }
        AttributeType::Dynamic => Err(ValueError::DynamicPseudoType {
            path: prefix.to_string(),
        }),
    }
}

fn parse_failure(path: &str, value: &str, expected: &'static str) -> ValueError {
    ValueError::ParseFailure {
        path: path.to_string(),
        value: value.to_string(),
        expected,
    }
}

//! # Instance State and Diffs
//!
//! Cached Terraform state for a managed resource and the attribute-level diff
//! the drivers apply. The `id` attribute uniquely identifies the external
//! resource; an empty `id` means the resource does not exist.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::constants;

/// Terraform state of one external resource instance
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceState {
    /// Provider-assigned identifier; empty when the resource does not exist
    pub id: String,
    /// Flat attribute map (`list.#`, `list.0`, `map.%`, `map.key` entries for
    /// collections)
    pub attributes: BTreeMap<String, String>,
    /// Provider metadata carried alongside the attributes: operation
    /// timeouts, schema version, the framework private blob
    pub meta: Map<String, Value>,
}

impl InstanceState {
    /// Whether the state describes an existing external resource
    pub fn exists(&self) -> bool {
        !self.id.is_empty()
    }

    /// Mirror the id into the attribute map, where providers also expect it
    pub fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
        if id.is_empty() {
            self.attributes.remove(constants::ATTRIBUTE_ID);
        } else {
            self.attributes
                .insert(constants::ATTRIBUTE_ID.to_string(), id.to_string());
        }
    }
}

/// Change recorded for a single flat attribute key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeDiff {
    pub old: String,
    pub new: String,
    /// The new value will only be known after apply
    pub new_computed: bool,
    /// The attribute is removed by this change
    pub new_removed: bool,
    /// Applying this change requires destroying and re-creating the resource
    pub requires_replace: bool,
    /// The values must not be logged
    pub sensitive: bool,
}

/// The set of attribute changes required to reconcile current state to the
/// desired parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstanceDiff {
    pub attributes: BTreeMap<String, AttributeDiff>,
    /// The external resource is to be destroyed
    pub destroy: bool,
    /// Timeouts and other operation metadata stamped from resource config
    pub meta: Map<String, Value>,
}

impl InstanceDiff {
    /// A destroy diff for the given state
    pub fn destroy() -> Self {
        Self {
            destroy: true,
            ..Self::default()
        }
    }

    /// Whether applying the diff would change anything
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty() && !self.destroy
    }

    /// Flat keys whose change forces replacement of the external resource
    pub fn requires_replace_keys(&self) -> Vec<&str> {
        self.attributes
            .iter()
            .filter(|(_, d)| d.requires_replace)
            .map(|(k, _)| k.as_str())
            .collect()
    }
}

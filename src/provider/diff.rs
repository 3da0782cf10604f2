//! # Diff Engine
//!
//! Builds the attribute diff between cached Terraform state and the desired
//! parameters, then applies two policies on top of the provider-native
//! comparison:
//!
//! 1. Init-only filtering: attributes that come exclusively from
//!    `spec.initProvider` are scrubbed from the diff, along with their length
//!    counters, so one-time defaults never read as drift.
//! 2. Replacement rejection: any attribute flagged ForceNew fails the diff,
//!    naming the offending attributes. The runtime never silently re-creates
//!    an external resource.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::constants;
use crate::provider::schema::ResourceSchema;
use crate::provider::state::{AttributeDiff, InstanceDiff, InstanceState};
use crate::provider::value::{flatten_parameters, ValueError};
use crate::resource::config::ResourceConfig;

/// Errors produced while building or validating diffs
#[derive(Debug, Error)]
pub enum DiffError {
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error("custom diff hook failed: {0}")]
    CustomDiff(#[source] anyhow::Error),
}

/// Update refused because the diff would replace the external resource
#[derive(Debug, Error)]
#[error("refusing to update: change requires replacing the external resource (attributes: {})", attributes.join(", "))]
pub struct ReplacementRequiredError {
    pub attributes: Vec<String>,
}

/// Fail when any attribute change forces replacement
pub fn reject_replacement(diff: &InstanceDiff) -> Result<(), ReplacementRequiredError> {
    let attributes: Vec<String> = diff
        .requires_replace_keys()
        .into_iter()
        .map(ToString::to_string)
        .collect();
    if attributes.is_empty() {
        Ok(())
    } else {
        Err(ReplacementRequiredError { attributes })
    }
}

/// Compute the schema diff between current state and desired parameters.
///
/// Desired values run through the schema's state functions first so computed
/// equality matches Terraform's own normalization.
pub fn compute_diff(
    schema: &ResourceSchema,
    current: Option<&InstanceState>,
    desired: &Map<String, Value>,
) -> Result<InstanceDiff, DiffError> {
    let mut desired_flat = flatten_parameters(desired)?;
    for (key, value) in &mut desired_flat {
        if let Some(f) = schema.lookup(key).and_then(|s| s.state_func) {
            *value = f(value);
        }
    }

    let empty = BTreeMap::new();
    let current_attrs = current.map_or(&empty, |s| &s.attributes);

    let mut diff = InstanceDiff::default();
    for (key, new) in &desired_flat {
        if key == constants::ATTRIBUTE_ID {
            continue;
        }
        // Length counters of blocks the schema does not model as collections
        // (flattening cannot tell nested objects from maps) are noise.
        if (key.ends_with(".%") || key.ends_with(".#")) && schema.lookup(key).is_none() {
            continue;
        }
        let old = current_attrs.get(key).cloned().unwrap_or_default();
        if &old == new {
            continue;
        }
        diff.attributes.insert(
            key.clone(),
            AttributeDiff {
                old,
                new: new.clone(),
                new_computed: false,
                new_removed: false,
                requires_replace: current.is_some() && schema.forces_replacement(key),
                sensitive: schema.is_sensitive(key),
            },
        );
    }

    for (key, old) in current_attrs {
        if key == constants::ATTRIBUTE_ID || desired_flat.contains_key(key) {
            continue;
        }
        // Only attributes the schema knows and the user could have set are
        // subject to removal; computed attributes belong to the provider.
        let Some(attr) = schema.lookup(key) else {
            continue;
        };
        if attr.computed {
            continue;
        }
        diff.attributes.insert(
            key.clone(),
            AttributeDiff {
                old: old.clone(),
                new: String::new(),
                new_computed: false,
                new_removed: true,
                requires_replace: schema.forces_replacement(key),
                sensitive: attr.sensitive,
            },
        );
    }
    Ok(diff)
}

/// Flat attribute keys that appear only in the init parameters
pub fn init_only_attribute_keys(
    for_provider: &Map<String, Value>,
    init_provider: &Map<String, Value>,
) -> Result<BTreeSet<String>, ValueError> {
    let for_flat = flatten_parameters(for_provider)?;
    let init_flat = flatten_parameters(init_provider)?;
    Ok(init_flat
        .into_keys()
        .filter(|k| !for_flat.contains_key(k))
        .collect())
}

/// Remove init-only attribute keys from the diff, together with the length
/// counters of every collection that contained one
pub fn filter_init_only(
    diff: &mut InstanceDiff,
    for_provider: &Map<String, Value>,
    init_provider: &Map<String, Value>,
) -> Result<(), ValueError> {
    let init_only = init_only_attribute_keys(for_provider, init_provider)?;
    if init_only.is_empty() {
        return Ok(());
    }

    let mut counters = BTreeSet::new();
    for key in &init_only {
        let mut prefix = key.as_str();
        while let Some(pos) = prefix.rfind('.') {
            prefix = &prefix[..pos];
            counters.insert(format!("{prefix}.#"));
            counters.insert(format!("{prefix}.%"));
        }
    }

    diff.attributes.retain(|key, _| {
        if init_only.contains(key) || counters.contains(key) {
            return false;
        }
        // Entries nested under an init-only key go with it.
        !init_only
            .iter()
            .any(|io| key.starts_with(io.as_str()) && key.as_bytes().get(io.len()) == Some(&b'.'))
    });
    Ok(())
}

/// Scrub drift on the provider-maintained tags mirror
pub fn scrub_tags_all(diff: &mut InstanceDiff) {
    let prefix = format!("{}.", constants::ATTRIBUTE_TAGS_ALL);
    diff.attributes
        .retain(|key, _| key != constants::ATTRIBUTE_TAGS_ALL && !key.starts_with(&prefix));
}

/// Apply the configured policies to a computed diff: the custom diff hook,
/// init-only filtering, the tags mirror scrub, and timeout metadata from the
/// resource configuration.
pub fn apply_diff_policies(
    config: &ResourceConfig,
    diff: &mut InstanceDiff,
    current: Option<&InstanceState>,
    desired: &Map<String, Value>,
    for_provider: &Map<String, Value>,
    init_provider: &Map<String, Value>,
) -> Result<(), DiffError> {
    if let Some(hook) = &config.custom_diff {
        hook(diff, current, desired).map_err(DiffError::CustomDiff)?;
    }
    filter_init_only(diff, for_provider, init_provider)?;
    if config.mirrors_tags() {
        scrub_tags_all(diff);
    }
    diff.meta.insert(
        constants::STATE_META_TIMEOUTS.to_string(),
        config.timeouts.to_meta(),
    );
    Ok(())
}

/// Build the filtered diff the external client acts on
pub fn build_filtered_diff(
    config: &ResourceConfig,
    current: Option<&InstanceState>,
    desired: &Map<String, Value>,
    for_provider: &Map<String, Value>,
    init_provider: &Map<String, Value>,
) -> Result<InstanceDiff, DiffError> {
    let mut diff = compute_diff(&config.schema, current, desired)?;
    apply_diff_policies(config, &mut diff, current, desired, for_provider, init_provider)?;
    Ok(diff)
}

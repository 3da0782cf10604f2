//! # Resource Configuration
//!
//! Static per-Kind configuration: the Terraform type and schema, external
//! name handling, sensitive field mappings, late-initialization exclusions,
//! per-operation timeouts, and the optional hooks code generation attaches
//! for provider-specific quirks.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use crate::constants;
use crate::controller::workspace::OperationType;
use crate::provider::schema::ResourceSchema;
use crate::provider::state::{InstanceDiff, InstanceState};
use crate::resource::external_name::ExternalNameConfig;
use crate::resource::fieldpath::FieldPath;

/// Transformation applied to the computed diff before policy checks
pub type CustomDiffFn = Arc<
    dyn Fn(&mut InstanceDiff, Option<&InstanceState>, &Map<String, Value>) -> anyhow::Result<()>
        + Send
        + Sync,
>;

/// Additional connection details derived from the observed attributes.
/// Keys returned here must not collide with `attribute.`-prefixed keys.
pub type AdditionalConnectionDetailsFn =
    Arc<dyn Fn(&Map<String, Value>) -> anyhow::Result<HashMap<String, Vec<u8>>> + Send + Sync>;

/// Injects provider-specific entries into the Terraform configuration built
/// for each call
pub type ConfigInjectorFn =
    Arc<dyn Fn(&mut Map<String, Value>) -> anyhow::Result<()> + Send + Sync>;

/// Per-operation timeouts, overriding provider defaults
#[derive(Debug, Clone, Copy, Default)]
pub struct OperationTimeouts {
    pub create: Option<Duration>,
    pub read: Option<Duration>,
    pub update: Option<Duration>,
    pub delete: Option<Duration>,
}

impl OperationTimeouts {
    /// Timeout for the given operation, if configured
    pub fn for_operation(&self, op: OperationType) -> Option<Duration> {
        match op {
            OperationType::Create => self.create,
            OperationType::Update => self.update,
            OperationType::Delete => self.delete,
        }
    }

    /// Serialize into state/diff metadata as millisecond values
    pub fn to_meta(&self) -> Value {
        let mut out = Map::new();
        for (name, timeout) in [
            ("create", self.create),
            ("read", self.read),
            ("update", self.update),
            ("delete", self.delete),
        ] {
            if let Some(t) = timeout {
                out.insert(name.to_string(), Value::from(t.as_millis() as u64));
            }
        }
        Value::Object(out)
    }
}

/// Sensitive-field configuration of a resource Kind
#[derive(Clone, Default)]
pub struct SensitiveConfig {
    /// Resource field path (wildcards allowed, pointing at secret selectors)
    /// to the Terraform path receiving the secret value
    pub parameter_mappings: BTreeMap<String, String>,
    /// Terraform attribute paths (wildcards allowed) extracted from observed
    /// state into connection details
    pub observation_paths: Vec<String>,
    /// Hook producing extra connection details from the observed attributes
    pub additional_connection_details: Option<AdditionalConnectionDetailsFn>,
}

impl std::fmt::Debug for SensitiveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensitiveConfig")
            .field("parameter_mappings", &self.parameter_mappings)
            .field("observation_paths", &self.observation_paths)
            .finish_non_exhaustive()
    }
}

/// Static descriptor of a resource Kind
#[derive(Clone)]
pub struct ResourceConfig {
    /// Kubernetes Kind
    pub kind: String,
    /// Terraform resource type name
    pub resource_type: String,
    /// Attribute schema of the Terraform resource
    pub schema: ResourceSchema,
    /// External-name configuration
    pub external_name: ExternalNameConfig,
    /// Sensitive field mappings
    pub sensitive: SensitiveConfig,
    /// Parameters that must be present before provider calls
    pub required_fields: Vec<String>,
    /// Parameter paths never filled by late initialization
    pub late_init_ignored_fields: Vec<FieldPath>,
    /// List parameters merged by appending rather than replacement when
    /// combining forProvider with initProvider
    pub init_merge_append_paths: Vec<FieldPath>,
    /// Diff transformation applied after the provider-native diff
    pub custom_diff: Option<CustomDiffFn>,
    /// Provider-specific configuration injection
    pub config_injector: Option<ConfigInjectorFn>,
    /// Per-operation timeouts
    pub timeouts: OperationTimeouts,
}

impl std::fmt::Debug for ResourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceConfig")
            .field("kind", &self.kind)
            .field("resource_type", &self.resource_type)
            .field("external_name", &self.external_name)
            .field("timeouts", &self.timeouts)
            .finish_non_exhaustive()
    }
}

impl ResourceConfig {
    /// A configuration with the common defaults: provider-generated
    /// identifiers, no sensitive fields, no hooks
    pub fn new(kind: impl Into<String>, resource_type: impl Into<String>, schema: ResourceSchema) -> Self {
        Self {
            kind: kind.into(),
            resource_type: resource_type.into(),
            schema,
            external_name: ExternalNameConfig::identifier_from_provider(),
            sensitive: SensitiveConfig::default(),
            required_fields: Vec::new(),
            late_init_ignored_fields: Vec::new(),
            init_merge_append_paths: Vec::new(),
            custom_diff: None,
            config_injector: None,
            timeouts: OperationTimeouts::default(),
        }
    }

    /// Paths never late-initialized: the configured exclusions plus the
    /// identifier fields of the external-name configuration
    pub fn late_init_exclusions(&self) -> Vec<FieldPath> {
        let mut out = self.late_init_ignored_fields.clone();
        for field in &self.external_name.identifier_fields {
            if let Ok(path) = FieldPath::parse(field) {
                out.push(path);
            }
        }
        out
    }

    /// Whether the schema carries the mirrored tags pair
    pub fn mirrors_tags(&self) -> bool {
        self.schema.attributes.contains_key(constants::ATTRIBUTE_TAGS)
            && self.schema.attributes.contains_key(constants::ATTRIBUTE_TAGS_ALL)
    }
}

/// Registry of resource configurations, keyed by Terraform resource type
#[derive(Debug, Default)]
pub struct ConfigRegistry {
    configs: HashMap<String, Arc<ResourceConfig>>,
}

impl ConfigRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a configuration; the last registration for a type wins
    pub fn register(&mut self, config: ResourceConfig) {
        self.configs
            .insert(config.resource_type.clone(), Arc::new(config));
    }

    /// Configuration for a Terraform resource type
    pub fn get(&self, resource_type: &str) -> Option<Arc<ResourceConfig>> {
        self.configs.get(resource_type).cloned()
    }
}

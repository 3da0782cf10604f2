//! # Custom Resource Definitions
//!
//! CRD types for Terraform-managed resources.
//!
//! Code generation emits one Kind per Terraform resource type; all of them
//! share the shape below: desired parameters under `spec.forProvider`,
//! one-time defaults under `spec.initProvider`, and the observed attribute
//! tree under `status.atProvider`. The runtime itself only ever talks to the
//! [`crate::resource::Terraformed`] facade, so `TerraformManagedResource` also
//! doubles as the test vehicle for the external client.

pub mod status;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

pub use status::{Condition, ConditionStatus};

use crate::constants;

/// TerraformManagedResource Custom Resource Definition
///
/// A managed resource declares a single Terraform-described cloud resource.
///
/// # Example
///
/// ```yaml
/// apiVersion: terraform.microscaler.io/v1
/// kind: TerraformManagedResource
/// metadata:
///   name: primary-database
///   annotations:
///     terraform.microscaler.io/external-name: primary-database
/// spec:
///   resourceType: aws_db_instance
///   forProvider:
///     instance_class: db.t3.micro
///     allocated_storage: 20
///   initProvider:
///     backup_retention_period: 7
/// ```
///
/// Parameter keys under `forProvider` and `initProvider` are
/// terraform-shaped, exactly as the provider schema declares them.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[kube(
    kind = "TerraformManagedResource",
    group = "terraform.microscaler.io",
    version = "v1",
    namespaced,
    status = "TerraformManagedResourceStatus",
    shortname = "tfmr",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[?(@.type==\"Ready\")].status"}"#,
    printcolumn = r#"{"name":"External-Name", "type":"string", "jsonPath":".metadata.annotations.terraform\\.microscaler\\.io/external-name"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct TerraformManagedResourceSpec {
    /// Terraform resource type name (e.g. "aws_db_instance")
    pub resource_type: String,
    /// Desired parameters of the external resource
    pub for_provider: Map<String, Value>,
    /// One-time defaults applied at creation and never enforced afterwards
    #[serde(default)]
    pub init_provider: Map<String, Value>,
    /// Management policies gating which operations the controller may issue
    /// Default: ["*"] (fully managed)
    #[serde(default = "default_management_policies")]
    pub management_policies: Vec<ManagementPolicy>,
    /// Mapping of sensitive Terraform attribute paths to connection-secret
    /// keys, as generated from the provider schema
    #[serde(default)]
    pub connection_details_mapping: BTreeMap<String, String>,
}

/// Management policy entries gating controller behavior for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ManagementPolicy {
    /// All operations are permitted
    #[serde(rename = "*")]
    All,
    /// Observe the external resource
    Observe,
    /// Create the external resource
    Create,
    /// Update the external resource
    Update,
    /// Delete the external resource
    Delete,
    /// Late-initialize spec.forProvider from observed state
    LateInitialize,
}

fn default_management_policies() -> Vec<ManagementPolicy> {
    vec![ManagementPolicy::All]
}

/// Status of a TerraformManagedResource
#[derive(Debug, Clone, Deserialize, Serialize, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TerraformManagedResourceStatus {
    /// Observed attribute tree as reported by the Terraform provider
    #[serde(default)]
    pub at_provider: Map<String, Value>,
    /// Conditions represent the latest available observations
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Observed generation
    #[serde(default)]
    pub observed_generation: Option<i64>,
}

impl TerraformManagedResource {
    /// Kubernetes UID of the object, empty before admission
    pub fn uid(&self) -> &str {
        self.metadata.uid.as_deref().unwrap_or("")
    }

    /// Object name
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or("")
    }

    /// Cloud-side identifier stored in the external-name annotation
    pub fn external_name(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(constants::ANNOTATION_EXTERNAL_NAME))
            .map(String::as_str)
    }

    /// Stamp the external-name annotation
    pub fn set_external_name(&mut self, name: &str) {
        self.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(constants::ANNOTATION_EXTERNAL_NAME.to_string(), name.to_string());
    }

    /// Whether reconciliation is suspended via the paused annotation
    pub fn is_paused(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(constants::ANNOTATION_PAUSED))
            .is_some_and(|v| v == "true")
    }

    /// Whether a previous external Create failed after the provider may have
    /// allocated an identifier
    pub fn external_create_failed(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .is_some_and(|a| a.contains_key(constants::ANNOTATION_EXTERNAL_CREATE_FAILED))
    }

    /// Whether the object carries a deletion timestamp
    pub fn is_deleting(&self) -> bool {
        self.metadata.deletion_timestamp.is_some()
    }

    /// Latest Ready condition, if any
    pub fn ready_condition(&self) -> Option<&Condition> {
        self.status
            .as_ref()
            .and_then(|s| status::find_condition(&s.conditions, constants::CONDITION_TYPE_READY))
    }

    /// Insert or replace a condition by type
    pub fn set_condition(&mut self, condition: Condition) {
        let status = self.status.get_or_insert_with(Default::default);
        status::upsert_condition(&mut status.conditions, condition);
    }

    /// Whether the given management policy entry is in effect
    pub fn policy_allows(&self, policy: ManagementPolicy) -> bool {
        self.spec
            .management_policies
            .iter()
            .any(|p| *p == ManagementPolicy::All || *p == policy)
    }

    /// Observe-only resources never receive mutating calls
    pub fn is_observe_only(&self) -> bool {
        !self.spec.management_policies.contains(&ManagementPolicy::All)
            && self.spec.management_policies == [ManagementPolicy::Observe]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource() -> TerraformManagedResource {
        let mut mr = TerraformManagedResource::new(
            "primary-database",
            TerraformManagedResourceSpec {
                resource_type: "aws_db_instance".to_string(),
                for_provider: Map::new(),
                init_provider: Map::new(),
                management_policies: default_management_policies(),
                connection_details_mapping: BTreeMap::new(),
            },
        );
        mr.metadata.uid = Some("c9f0cbb2-2a6e-4d58-9d14-2f1a0f2c3b55".to_string());
        mr
    }

    #[test]
    fn test_external_name_round_trip() {
        let mut mr = resource();
        assert_eq!(mr.external_name(), None);
        mr.set_external_name("primary-database");
        assert_eq!(mr.external_name(), Some("primary-database"));
    }

    #[test]
    fn test_paused_annotation_requires_true() {
        let mut mr = resource();
        assert!(!mr.is_paused());
        mr.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(constants::ANNOTATION_PAUSED.to_string(), "false".to_string());
        assert!(!mr.is_paused());
        mr.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(constants::ANNOTATION_PAUSED.to_string(), "true".to_string());
        assert!(mr.is_paused());
    }

    #[test]
    fn test_default_policy_allows_everything() {
        let mr = resource();
        assert!(mr.policy_allows(ManagementPolicy::Create));
        assert!(mr.policy_allows(ManagementPolicy::LateInitialize));
        assert!(!mr.is_observe_only());
    }

    #[test]
    fn test_observe_only_policy() {
        let mut mr = resource();
        mr.spec.management_policies = vec![ManagementPolicy::Observe];
        assert!(mr.is_observe_only());
        assert!(!mr.policy_allows(ManagementPolicy::Create));
        assert!(mr.policy_allows(ManagementPolicy::Observe));
    }
}

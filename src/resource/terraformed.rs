//! # Terraformed Facade
//!
//! Per-Kind facade over a managed resource, exposing Terraform-shaped
//! parameters, the observed attribute tree, late initialization, and the
//! mapping tables the runtime needs. Generated Kinds implement this trait;
//! [`crate::crd::TerraformManagedResource`] carries the generic
//! implementation used by tests and dynamic Kinds.

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::crd::status::{Condition, ConditionStatus};
use crate::crd::{ManagementPolicy, TerraformManagedResource};
use crate::resource::fieldpath::FieldPath;
use crate::resource::lateinit;

/// Facade over a managed resource consumed by the external client
pub trait Terraformed: Send + Sync {
    /// Object name
    fn name(&self) -> &str;
    /// Kubernetes UID, the workspace-store key
    fn uid(&self) -> &str;
    /// Cloud-side identifier from the external-name annotation
    fn external_name(&self) -> Option<&str>;
    /// Stamp the external-name annotation
    fn set_external_name(&mut self, name: &str);
    /// Whether reconciliation is suspended
    fn is_paused(&self) -> bool;
    /// Whether the object carries a deletion timestamp
    fn is_deleting(&self) -> bool;
    /// Whether a previous external Create failed mid-flight
    fn external_create_failed(&self) -> bool;
    /// Whether the given management policy entry is in effect
    fn policy_allows(&self, policy: ManagementPolicy) -> bool;
    /// Status of the Ready condition, if present
    fn ready_status(&self) -> Option<ConditionStatus>;
    /// Insert or replace a condition by type
    fn set_condition(&mut self, condition: Condition);

    /// Terraform resource type name
    fn get_terraform_resource_type(&self) -> &str;
    /// Desired parameters, terraform-shaped
    fn get_parameters(&self) -> Map<String, Value>;
    /// One-time initialization parameters, terraform-shaped
    fn get_init_parameters(&self) -> Map<String, Value>;
    /// Desired parameters, optionally deep-merged over the init parameters.
    /// forProvider wins for scalars and lists are replaced, not concatenated.
    fn get_merged_parameters(&self, merge_init: bool) -> Map<String, Value> {
        if merge_init {
            lateinit::merge_parameters(&self.get_parameters(), &self.get_init_parameters(), &[])
        } else {
            self.get_parameters()
        }
    }
    /// Observed attribute tree from status
    fn get_observation(&self) -> Map<String, Value>;
    /// Replace the observed attribute tree
    fn set_observation(&mut self, observation: Map<String, Value>);
    /// Fill absent spec parameters from observed state, skipping the ignored
    /// paths. Returns whether the spec changed.
    fn late_initialize(&mut self, observed: &[u8], ignored: &[FieldPath]) -> anyhow::Result<bool>;
    /// Mapping of sensitive Terraform attribute paths to connection-secret keys
    fn get_connection_details_mapping(&self) -> BTreeMap<String, String>;
    /// Deep copy for detached async workers
    fn clone_terraformed(&self) -> Box<dyn Terraformed>;
}

impl Terraformed for TerraformManagedResource {
    fn name(&self) -> &str {
        TerraformManagedResource::name(self)
    }

    fn uid(&self) -> &str {
        TerraformManagedResource::uid(self)
    }

    fn external_name(&self) -> Option<&str> {
        TerraformManagedResource::external_name(self)
    }

    fn set_external_name(&mut self, name: &str) {
        TerraformManagedResource::set_external_name(self, name);
    }

    fn is_paused(&self) -> bool {
        TerraformManagedResource::is_paused(self)
    }

    fn is_deleting(&self) -> bool {
        TerraformManagedResource::is_deleting(self)
    }

    fn external_create_failed(&self) -> bool {
        TerraformManagedResource::external_create_failed(self)
    }

    fn policy_allows(&self, policy: ManagementPolicy) -> bool {
        TerraformManagedResource::policy_allows(self, policy)
    }

    fn ready_status(&self) -> Option<ConditionStatus> {
        self.ready_condition().map(|c| c.status)
    }

    fn set_condition(&mut self, condition: Condition) {
        TerraformManagedResource::set_condition(self, condition);
    }

    fn get_terraform_resource_type(&self) -> &str {
        &self.spec.resource_type
    }

    fn get_parameters(&self) -> Map<String, Value> {
        self.spec.for_provider.clone()
    }

    fn get_init_parameters(&self) -> Map<String, Value> {
        self.spec.init_provider.clone()
    }

    fn get_observation(&self) -> Map<String, Value> {
        self.status
            .as_ref()
            .map(|s| s.at_provider.clone())
            .unwrap_or_default()
    }

    fn set_observation(&mut self, observation: Map<String, Value>) {
        self.status.get_or_insert_with(Default::default).at_provider = observation;
    }

    fn late_initialize(&mut self, observed: &[u8], ignored: &[FieldPath]) -> anyhow::Result<bool> {
        let observed: Map<String, Value> = serde_json::from_slice(observed)?;
        Ok(lateinit::late_initialize(
            &mut self.spec.for_provider,
            &observed,
            ignored,
        ))
    }

    fn get_connection_details_mapping(&self) -> BTreeMap<String, String> {
        self.spec.connection_details_mapping.clone()
    }

    fn clone_terraformed(&self) -> Box<dyn Terraformed> {
        Box::new(self.clone())
    }
}

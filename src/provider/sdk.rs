//! # Plugin SDK v2 Driver
//!
//! Drives an in-process provider that speaks the Plugin SDK v2 shape:
//! refresh-without-upgrade and apply over flat instance state and instance
//! diffs. The diff itself is computed locally against the resource schema.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

use crate::provider::diagnostics::Diagnostics;
use crate::provider::diff;
use crate::provider::state::{InstanceDiff, InstanceState};
use crate::provider::{ApplyOutcome, ProviderDriver};
use crate::resource::config::ResourceConfig;

/// In-process provider resource implementing the SDK v2 operations
#[async_trait]
pub trait SdkResourceServer: Send + Sync {
    /// Refresh the instance state from the cloud API without running schema
    /// upgrades. `None` means the resource is gone.
    async fn refresh_without_upgrade(
        &self,
        resource_type: &str,
        state: InstanceState,
    ) -> (Option<InstanceState>, Diagnostics);

    /// Apply a diff to the instance. `None` result means the resource was
    /// destroyed.
    async fn apply(
        &self,
        resource_type: &str,
        state: Option<InstanceState>,
        diff: InstanceDiff,
    ) -> (Option<InstanceState>, Diagnostics);
}

/// Driver over an SDK v2 style provider resource
pub struct SdkDriver {
    server: Arc<dyn SdkResourceServer>,
    config: Arc<ResourceConfig>,
}

impl std::fmt::Debug for SdkDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkDriver")
            .field("resource_type", &self.config.resource_type)
            .finish_non_exhaustive()
    }
}

impl SdkDriver {
    pub fn new(server: Arc<dyn SdkResourceServer>, config: Arc<ResourceConfig>) -> Self {
        Self { server, config }
    }
}

#[async_trait]
impl ProviderDriver for SdkDriver {
    async fn read(&self, state: &InstanceState) -> anyhow::Result<Option<InstanceState>> {
        let (new_state, diagnostics) = self
            .server
            .refresh_without_upgrade(&self.config.resource_type, state.clone())
            .await;
        diagnostics.into_result("read")?;
        debug!(
            resource_type = %self.config.resource_type,
            exists = new_state.as_ref().is_some_and(InstanceState::exists),
            "refreshed instance state"
        );
        Ok(new_state)
    }

    async fn plan(
        &self,
        current: Option<&InstanceState>,
        desired: &Map<String, Value>,
        for_provider: &Map<String, Value>,
        init_provider: &Map<String, Value>,
    ) -> anyhow::Result<InstanceDiff> {
        Ok(diff::build_filtered_diff(
            &self.config,
            current,
            desired,
            for_provider,
            init_provider,
        )?)
    }

    async fn apply(
        &self,
        current: Option<&InstanceState>,
        diff: &InstanceDiff,
        _desired: &Map<String, Value>,
    ) -> anyhow::Result<ApplyOutcome> {
        let (state, diagnostics) = self
            .server
            .apply(
                &self.config.resource_type,
                current.cloned(),
                diff.clone(),
            )
            .await;
        // The provider may have allocated an identifier before failing, so
        // the state travels back regardless of diagnostics.
        let error = diagnostics.into_result("apply").err().map(Into::into);
        Ok(ApplyOutcome { state, error })
    }
}

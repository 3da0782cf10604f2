//! # Terraform Provider Drivers
//!
//! Invokes the in-process Terraform provider. Two wire variants expose the
//! same logical operations to the external client: the Plugin SDK v2 shape
//! (flat instance state plus instance diff) and the Plugin Framework shape
//! (typed dynamic values through a protocol-v5 style server).
//!
//! Provider diagnostics are split into errors, which are joined and
//! surfaced, and warnings, which are logged and dropped.

pub mod diagnostics;
pub mod diff;
pub mod framework;
pub mod schema;
pub mod sdk;
pub mod state;
pub mod value;

pub use diagnostics::{Diagnostic, Diagnostics, DiagnosticsError, Severity};
pub use framework::{FrameworkDriver, FrameworkProviderServer};
pub use schema::{AttributeSchema, AttributeType, ResourceSchema};
pub use sdk::{SdkDriver, SdkResourceServer};
pub use state::{AttributeDiff, InstanceDiff, InstanceState};
pub use value::DynamicValue;

use async_trait::async_trait;
use serde_json::{Map, Value};

/// Result of an apply call. The returned state is persisted even when the
/// provider reported fatal diagnostics, so server-generated identifiers are
/// never lost.
#[derive(Debug)]
pub struct ApplyOutcome {
    pub state: Option<InstanceState>,
    pub error: Option<anyhow::Error>,
}

/// Logical provider operations consumed by the external client, independent
/// of the wire variant
#[async_trait]
pub trait ProviderDriver: Send + Sync {
    /// Read the current state of the external resource. `None` means the
    /// resource no longer exists.
    async fn read(&self, state: &InstanceState) -> anyhow::Result<Option<InstanceState>>;

    /// Compute the filtered diff between current state and desired
    /// parameters
    async fn plan(
        &self,
        current: Option<&InstanceState>,
        desired: &Map<String, Value>,
        for_provider: &Map<String, Value>,
        init_provider: &Map<String, Value>,
    ) -> anyhow::Result<InstanceDiff>;

    /// Apply the diff. The outcome carries the post-apply state alongside
    /// any fatal diagnostics.
    async fn apply(
        &self,
        current: Option<&InstanceState>,
        diff: &InstanceDiff,
        desired: &Map<String, Value>,
    ) -> anyhow::Result<ApplyOutcome>;
}

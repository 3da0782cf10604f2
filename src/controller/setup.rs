//! # Terraform Setup
//!
//! The setup factory resolves provider credentials and configuration for a
//! managed resource and hands back the in-process provider handle the
//! drivers run against. Credential resolution itself (ProviderConfig
//! traversal, workload identity, secret refs) lives with the provider
//! implementation; the runtime only consumes the result.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::provider::framework::FrameworkProviderServer;
use crate::provider::sdk::SdkResourceServer;
use crate::resource::terraformed::Terraformed;

/// Everything a reconcile needs to drive the provider for one managed
/// resource
#[derive(Clone, Default)]
pub struct TerraformSetup {
    /// Provider block configuration (credentials, region, endpoints)
    pub configuration: Map<String, Value>,
    /// Extra process environment the provider expects
    pub env: Vec<String>,
    /// Plugin Framework provider server, when the resource is framework-based
    pub framework_server: Option<Arc<dyn FrameworkProviderServer>>,
    /// Plugin SDK v2 provider resource, when the resource is SDK-based
    pub sdk_server: Option<Arc<dyn SdkResourceServer>>,
}

impl std::fmt::Debug for TerraformSetup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerraformSetup")
            .field("env", &self.env)
            .field("framework", &self.framework_server.is_some())
            .field("sdk", &self.sdk_server.is_some())
            .finish_non_exhaustive()
    }
}

/// Factory producing the Terraform setup for a managed resource
#[async_trait]
pub trait TerraformSetupFactory: Send + Sync {
    async fn setup(&self, mg: &dyn Terraformed) -> anyhow::Result<TerraformSetup>;
}

/// Factory returning a fixed setup, used in tests and single-credential
/// deployments
#[derive(Clone, Default)]
pub struct StaticSetupFactory {
    pub setup: TerraformSetup,
}

impl std::fmt::Debug for StaticSetupFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticSetupFactory").finish_non_exhaustive()
    }
}

impl StaticSetupFactory {
    pub fn new(setup: TerraformSetup) -> Self {
        Self { setup }
    }
}

#[async_trait]
impl TerraformSetupFactory for StaticSetupFactory {
    async fn setup(&self, _mg: &dyn Terraformed) -> anyhow::Result<TerraformSetup> {
        Ok(self.setup.clone())
    }
}

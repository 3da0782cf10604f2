//! # Shared Test Fixtures
//!
//! A fake in-process SDK provider backed by a mutable map of external
//! resources, plus helpers to build managed resources and configurations
//! for the external-client tests.

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use terraform_controller_runtime::controller::{
    Connector, InMemorySecretClient, StaticSetupFactory, TerraformSetup, WorkspaceStore,
};
use terraform_controller_runtime::crd::{
    ManagementPolicy, TerraformManagedResource, TerraformManagedResourceSpec,
};
use terraform_controller_runtime::provider::sdk::SdkResourceServer;
use terraform_controller_runtime::provider::{
    AttributeSchema, Diagnostics, InstanceDiff, InstanceState, ResourceSchema,
};
use terraform_controller_runtime::resource::{ConfigRegistry, ResourceConfig};

/// Fake cloud: one SDK-style provider resource over an id-keyed map
#[derive(Default)]
pub struct FakeCloud {
    pub resources: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
    /// Attributes the provider computes on create
    pub computed: BTreeMap<String, String>,
    pub apply_calls: AtomicUsize,
    pub read_calls: AtomicUsize,
    next_id: AtomicUsize,
    /// Simulated cloud latency applied to every apply
    pub apply_delay: Option<Duration>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_computed(mut self, key: &str, value: &str) -> Self {
        self.computed.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_apply_delay(mut self, delay: Duration) -> Self {
        self.apply_delay = Some(delay);
        self
    }

    pub fn seed(&self, id: &str, attrs: &[(&str, &str)]) {
        let mut map: BTreeMap<String, String> = attrs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        map.insert("id".to_string(), id.to_string());
        self.resources
            .lock()
            .expect("resources lock")
            .insert(id.to_string(), map);
    }

    pub fn applies(&self) -> usize {
        self.apply_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SdkResourceServer for FakeCloud {
    async fn refresh_without_upgrade(
        &self,
        _resource_type: &str,
        state: InstanceState,
    ) -> (Option<InstanceState>, Diagnostics) {
        self.read_calls.fetch_add(1, Ordering::SeqCst);
        if state.id.is_empty() {
            return (None, Diagnostics::default());
        }
        let resources = self.resources.lock().expect("resources lock");
        match resources.get(&state.id) {
            Some(attrs) => {
                let mut refreshed = InstanceState {
                    id: String::new(),
                    attributes: attrs.clone(),
                    meta: state.meta.clone(),
                };
                refreshed.set_id(&state.id);
                (Some(refreshed), Diagnostics::default())
            }
            None => (None, Diagnostics::default()),
        }
    }

    async fn apply(
        &self,
        _resource_type: &str,
        state: Option<InstanceState>,
        diff: InstanceDiff,
    ) -> (Option<InstanceState>, Diagnostics) {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.apply_delay {
            tokio::time::sleep(delay).await;
        }

        if diff.destroy {
            if let Some(state) = &state {
                self.resources
                    .lock()
                    .expect("resources lock")
                    .remove(&state.id);
            }
            return (None, Diagnostics::default());
        }

        let (id, mut attrs) = match state.filter(|s| s.exists()) {
            Some(s) => (s.id, s.attributes),
            None => {
                let id = format!("ext-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
                (id, BTreeMap::new())
            }
        };
        for (key, change) in &diff.attributes {
            if change.new_removed {
                attrs.remove(key);
            } else if !change.new_computed {
                attrs.insert(key.clone(), change.new.clone());
            }
        }
        for (key, value) in &self.computed {
            attrs.entry(key.clone()).or_insert_with(|| value.clone());
        }
        attrs.insert("id".to_string(), id.clone());
        self.resources
            .lock()
            .expect("resources lock")
            .insert(id.clone(), attrs.clone());

        let mut new_state = InstanceState {
            id: String::new(),
            attributes: attrs,
            meta: diff.meta.clone(),
        };
        new_state.set_id(&id);
        (Some(new_state), Diagnostics::default())
    }
}

/// Database-flavored schema exercised by most tests
pub fn database_schema() -> ResourceSchema {
    ResourceSchema::new(BTreeMap::from([
        ("name".to_string(), AttributeSchema::string().optional()),
        ("size".to_string(), AttributeSchema::int().optional().force_new()),
        ("zone".to_string(), AttributeSchema::string().optional()),
        (
            "password".to_string(),
            AttributeSchema::string().optional().sensitive(),
        ),
        ("endpoint".to_string(), AttributeSchema::string().computed()),
        (
            "backup_retention_period".to_string(),
            AttributeSchema::int().optional(),
        ),
        (
            "tags".to_string(),
            AttributeSchema::map(AttributeSchema::string()).optional(),
        ),
    ]))
}

pub fn database_config() -> ResourceConfig {
    let mut config = ResourceConfig::new("Database", "fake_database", database_schema());
    config.sensitive.observation_paths = vec!["password".to_string()];
    config
}

/// Wire a connector around the fake cloud. Returns the shared workspace
/// store so tests can inspect trackers.
pub fn connector_for(
    cloud: Arc<FakeCloud>,
    config: ResourceConfig,
    secrets: Arc<InMemorySecretClient>,
) -> (Connector, Arc<WorkspaceStore>) {
    let mut registry = ConfigRegistry::new();
    registry.register(config);
    let store = Arc::new(WorkspaceStore::new());
    let connector = Connector::new(
        Arc::clone(&store),
        Arc::new(registry),
        Arc::new(StaticSetupFactory::new(TerraformSetup {
            sdk_server: Some(cloud),
            ..TerraformSetup::default()
        })),
        secrets,
        "default",
    );
    (connector, store)
}

/// Managed resource with the given desired parameters
pub fn managed_resource(for_provider: serde_json::Value) -> TerraformManagedResource {
    let mut mr = TerraformManagedResource::new(
        "primary-database",
        TerraformManagedResourceSpec {
            resource_type: "fake_database".to_string(),
            for_provider: for_provider.as_object().expect("object params").clone(),
            init_provider: json!({}).as_object().expect("object params").clone(),
            management_policies: vec![ManagementPolicy::All],
            connection_details_mapping: BTreeMap::new(),
        },
    );
    mr.metadata.uid = Some("0f8fad5b-d9cb-469f-a165-70867728950e".to_string());
    mr
}

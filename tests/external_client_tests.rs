//! # External Client Integration Tests
//!
//! Exercises the full Connect / Observe / Create / Update / Delete state
//! machine against a fake in-process SDK provider.
//!
//! These tests verify:
//! - Resource lifecycle with server-generated identifiers
//! - Idempotent Observe on an unchanged external resource
//! - Init-only parameters never reading as drift
//! - Replacement rejection before any provider Apply
//! - External-name adoption and stability across reconciles
//! - Sensitive parameter hydration into state and connection details

mod common;

use common::{connector_for, database_config, managed_resource, FakeCloud};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use terraform_controller_runtime::controller::InMemorySecretClient;
use terraform_controller_runtime::resource::Terraformed;

#[tokio::test]
async fn test_lifecycle_create_observe_update_delete() {
    let cloud = Arc::new(FakeCloud::new().with_computed("endpoint", "db-1.example.com"));
    let secrets = Arc::new(InMemorySecretClient::new());
    let (connector, store) =
        connector_for(Arc::clone(&cloud), database_config(), Arc::clone(&secrets));

    let mut mr = managed_resource(json!({"name": "db", "size": 10}));

    // First reconcile: nothing exists yet.
    let client = connector.connect(&mr).await.unwrap();
    let observation = client.observe(&mut mr).await.unwrap();
    assert!(!observation.resource_exists);

    let creation = client.create(&mut mr).await.unwrap();
    assert!(creation.connection_details.is_empty());
    let external_name = mr.external_name().expect("adopted after create").to_string();
    assert!(external_name.starts_with("ext-"));
    assert_eq!(
        mr.status.as_ref().unwrap().at_provider.get("endpoint"),
        Some(&json!("db-1.example.com"))
    );

    // Second reconcile: up to date.
    let client = connector.connect(&mr).await.unwrap();
    let observation = client.observe(&mut mr).await.unwrap();
    assert!(observation.resource_exists);
    assert!(observation.resource_up_to_date);

    // Drift the desired size downstream of ForceNew-free attributes.
    mr.spec.for_provider.insert("zone".to_string(), json!("eu-west-1a"));
    let client = connector.connect(&mr).await.unwrap();
    let observation = client.observe(&mut mr).await.unwrap();
    assert!(observation.resource_exists);
    assert!(!observation.resource_up_to_date);
    client.update(&mut mr).await.unwrap();
    assert_eq!(
        cloud.resources.lock().unwrap()[&external_name].get("zone"),
        Some(&"eu-west-1a".to_string())
    );

    // Delete and latch.
    let client = connector.connect(&mr).await.unwrap();
    client.delete(&mut mr).await.unwrap();
    assert!(cloud.resources.lock().unwrap().is_empty());
    let tracker = store.tracker(mr.name(), Terraformed::uid(&mr));
    assert!(tracker.is_deleted());
}

#[tokio::test]
async fn test_observe_is_idempotent() {
    let cloud = Arc::new(FakeCloud::new());
    cloud.seed("db-fixed", &[("name", "db"), ("size", "10")]);
    let secrets = Arc::new(InMemorySecretClient::new());
    let (connector, store) =
        connector_for(Arc::clone(&cloud), database_config(), Arc::clone(&secrets));

    let mut mr = managed_resource(json!({"name": "db", "size": 10}));
    mr.set_external_name("db-fixed");

    let client = connector.connect(&mr).await.unwrap();
    let first = client.observe(&mut mr).await.unwrap();
    let state_after_first = store
        .tracker(mr.name(), Terraformed::uid(&mr))
        .state()
        .unwrap();
    let second = client.observe(&mut mr).await.unwrap();
    let state_after_second = store
        .tracker(mr.name(), Terraformed::uid(&mr))
        .state()
        .unwrap();

    assert_eq!(first.resource_exists, second.resource_exists);
    assert_eq!(first.resource_up_to_date, second.resource_up_to_date);
    assert!(first.resource_exists && first.resource_up_to_date);
    assert_eq!(state_after_first, state_after_second);
}

#[tokio::test]
async fn test_init_only_parameters_do_not_drift() {
    let cloud = Arc::new(FakeCloud::new());
    // The server applied a different retention than the one-time default.
    cloud.seed(
        "db-fixed",
        &[("name", "db"), ("backup_retention_period", "9")],
    );
    let secrets = Arc::new(InMemorySecretClient::new());
    let (connector, _store) =
        connector_for(Arc::clone(&cloud), database_config(), Arc::clone(&secrets));

    let mut mr = managed_resource(json!({"name": "db"}));
    mr.spec.init_provider = json!({"backup_retention_period": 7})
        .as_object()
        .unwrap()
        .clone();
    mr.set_external_name("db-fixed");

    let client = connector.connect(&mr).await.unwrap();
    let observation = client.observe(&mut mr).await.unwrap();
    assert!(observation.resource_exists);
    assert!(
        observation.resource_up_to_date,
        "init-only defaults must not read as drift"
    );
}

#[tokio::test]
async fn test_update_refuses_replacement_without_apply() {
    let cloud = Arc::new(FakeCloud::new());
    cloud.seed("db-fixed", &[("name", "db"), ("size", "1")]);
    let secrets = Arc::new(InMemorySecretClient::new());
    let (connector, _store) =
        connector_for(Arc::clone(&cloud), database_config(), Arc::clone(&secrets));

    let mut mr = managed_resource(json!({"name": "db", "size": 2}));
    mr.set_external_name("db-fixed");

    let client = connector.connect(&mr).await.unwrap();
    let observation = client.observe(&mut mr).await.unwrap();
    assert!(!observation.resource_up_to_date);

    let err = client.update(&mut mr).await.unwrap_err();
    assert!(err.to_string().contains("size"), "error names the attribute: {err}");
    assert_eq!(cloud.applies(), 0, "no provider apply may be issued");
}

#[tokio::test]
async fn test_external_name_latch() {
    let cloud = Arc::new(FakeCloud::new());
    let secrets = Arc::new(InMemorySecretClient::new());
    let (connector, _store) =
        connector_for(Arc::clone(&cloud), database_config(), Arc::clone(&secrets));

    let mut mr = managed_resource(json!({"name": "db"}));
    let client = connector.connect(&mr).await.unwrap();
    client.observe(&mut mr).await.unwrap();
    client.create(&mut mr).await.unwrap();
    let adopted = mr.external_name().unwrap().to_string();

    // A copy that lost the annotation adopts the provider ID on Observe.
    let mut stale = managed_resource(json!({"name": "db"}));
    let client = connector.connect(&stale).await.unwrap();
    let observation = client.observe(&mut stale).await.unwrap();
    assert!(observation.resource_late_initialized);
    assert_eq!(stale.external_name(), Some(adopted.as_str()));

    // Subsequent reconciles leave it untouched.
    let client = connector.connect(&stale).await.unwrap();
    let observation = client.observe(&mut stale).await.unwrap();
    assert!(!observation.resource_late_initialized);
    assert_eq!(stale.external_name(), Some(adopted.as_str()));
}

#[tokio::test]
async fn test_sensitive_hydration_and_connection_details() {
    let cloud = Arc::new(FakeCloud::new());
    let secrets = Arc::new(InMemorySecretClient::new());
    secrets.insert(
        "default",
        "db-credentials",
        BTreeMap::from([("root".to_string(), b"hunter2".to_vec())]),
    );

    let mut config = database_config();
    config.sensitive.parameter_mappings = BTreeMap::from([(
        "passwordSecretRef".to_string(),
        "password".to_string(),
    )]);
    let (connector, store) = connector_for(Arc::clone(&cloud), config, Arc::clone(&secrets));

    let mut mr = managed_resource(json!({
        "name": "db",
        "passwordSecretRef": {"name": "db-credentials", "key": "root"}
    }));

    let client = connector.connect(&mr).await.unwrap();
    client.observe(&mut mr).await.unwrap();
    client.create(&mut mr).await.unwrap();

    let state = store
        .tracker(mr.name(), Terraformed::uid(&mr))
        .state()
        .unwrap();
    assert_eq!(
        state.attributes.get("password").map(String::as_str),
        Some("hunter2")
    );

    let client = connector.connect(&mr).await.unwrap();
    let observation = client.observe(&mut mr).await.unwrap();
    assert_eq!(
        observation
            .connection_details
            .get("attribute.password")
            .map(Vec::as_slice),
        Some(b"hunter2".as_slice())
    );
}

#[tokio::test]
async fn test_paused_resource_skips_provider() {
    let cloud = Arc::new(FakeCloud::new());
    let secrets = Arc::new(InMemorySecretClient::new());
    let (connector, _store) =
        connector_for(Arc::clone(&cloud), database_config(), Arc::clone(&secrets));

    let mut mr = managed_resource(json!({"name": "db"}));
    mr.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(
            "terraform.microscaler.io/paused".to_string(),
            "true".to_string(),
        );

    let client = connector.connect(&mr).await.unwrap();
    let observation = client.observe(&mut mr).await.unwrap();
    assert!(observation.resource_exists);
    assert!(observation.resource_up_to_date);
    assert_eq!(cloud.read_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

//! # Plugin Framework Driver
//!
//! Drives an in-process provider that speaks the Plugin Framework shape: a
//! protocol-v5 style server configured once per managed object, with
//! ReadResource / PlanResourceChange / ApplyResourceChange flowing typed
//! dynamic values. The planned-value diff comes from the provider; local
//! policies (init-only filtering, the tags scrub) apply on top.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::constants;
use crate::provider::diagnostics::Diagnostics;
use crate::provider::diff;
use crate::provider::schema::{AttributeSchema, AttributeType, ResourceSchema};
use crate::provider::state::{AttributeDiff, InstanceDiff, InstanceState};
use crate::provider::value::{DynamicValue, ValueError};
use crate::provider::{ApplyOutcome, ProviderDriver};
use crate::resource::config::ResourceConfig;

/// In-process provider server implementing the Plugin Framework operations
#[async_trait]
pub trait FrameworkProviderServer: Send + Sync {
    /// Configure the provider with the setup's provider configuration
    async fn configure(&self, config: DynamicValue) -> Diagnostics;

    /// Read the current state. `None` means the resource no longer exists.
    async fn read_resource(
        &self,
        type_name: &str,
        current: DynamicValue,
        private: Vec<u8>,
    ) -> (Option<DynamicValue>, Vec<u8>, Diagnostics);

    /// Plan a change from prior state to the proposed new state. Returns the
    /// planned state, the attribute paths that require replacement, and the
    /// planned private blob.
    async fn plan_resource_change(
        &self,
        type_name: &str,
        prior: DynamicValue,
        proposed: DynamicValue,
        prior_private: Vec<u8>,
    ) -> (DynamicValue, Vec<String>, Vec<u8>, Diagnostics);

    /// Apply a planned change. `None` result means the resource was
    /// destroyed.
    async fn apply_resource_change(
        &self,
        type_name: &str,
        prior: DynamicValue,
        planned: DynamicValue,
        planned_private: Vec<u8>,
    ) -> (Option<DynamicValue>, Vec<u8>, Diagnostics);
}

/// Driver over a Plugin Framework style provider server
pub struct FrameworkDriver {
    server: Arc<dyn FrameworkProviderServer>,
    config: Arc<ResourceConfig>,
}

impl std::fmt::Debug for FrameworkDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameworkDriver")
            .field("resource_type", &self.config.resource_type)
            .finish_non_exhaustive()
    }
}

impl FrameworkDriver {
    /// Configure the provider server and validate the schema. Called once
    /// per managed object during Connect.
    pub async fn connect(
        server: Arc<dyn FrameworkProviderServer>,
        config: Arc<ResourceConfig>,
        provider_config: &Map<String, Value>,
    ) -> anyhow::Result<Self> {
        reject_dynamic_types(&config.schema)?;
        let configuration = DynamicValue::from_json(&Value::Object(provider_config.clone()))?;
        server.configure(configuration).await.into_result("configure")?;
        Ok(Self { server, config })
    }

    fn state_to_dynamic(&self, state: &InstanceState) -> Result<DynamicValue, ValueError> {
        if let Some(raw) = state.meta.get(constants::STATE_META_RAW_STATE) {
            return DynamicValue::from_json(raw);
        }
        let mut tree = self.config.schema.expand_attributes(&state.attributes)?;
        if state.exists() {
            tree.insert(
                constants::ATTRIBUTE_ID.to_string(),
                Value::String(state.id.clone()),
            );
        }
        DynamicValue::from_json(&Value::Object(tree))
    }

    fn dynamic_to_state(
        &self,
        value: &DynamicValue,
        private: &[u8],
        timeouts: Option<&Value>,
    ) -> Result<InstanceState, ValueError> {
        let json = value.to_json()?;
        let mut state = InstanceState::default();
        if let Value::Object(map) = &json {
            let mut attributes = BTreeMap::new();
            crate::provider::value::flatten_json("", &json, &mut attributes)?;
            state.attributes = attributes;
            if let Some(Value::String(id)) = map.get(constants::ATTRIBUTE_ID) {
                state.set_id(id);
            }
        }
        state
            .meta
            .insert(constants::STATE_META_RAW_STATE.to_string(), json);
        if !private.is_empty() {
            state.meta.insert(
                constants::STATE_META_PRIVATE.to_string(),
                Value::String(BASE64.encode(private)),
            );
        }
        if let Some(t) = timeouts {
            state
                .meta
                .insert(constants::STATE_META_TIMEOUTS.to_string(), t.clone());
        }
        Ok(state)
    }

    fn private_of(state: &InstanceState) -> Vec<u8> {
        state
            .meta
            .get(constants::STATE_META_PRIVATE)
            .and_then(Value::as_str)
            .and_then(|s| BASE64.decode(s).ok())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProviderDriver for FrameworkDriver {
    async fn read(&self, state: &InstanceState) -> anyhow::Result<Option<InstanceState>> {
        let current = self.state_to_dynamic(state)?;
        let (new_value, new_private, diagnostics) = self
            .server
            .read_resource(
                &self.config.resource_type,
                current,
                Self::private_of(state),
            )
            .await;
        diagnostics.into_result("read")?;
        let Some(new_value) = new_value else {
            return Ok(None);
        };
        let timeouts = state.meta.get(constants::STATE_META_TIMEOUTS).cloned();
        let new_state = self.dynamic_to_state(&new_value, &new_private, timeouts.as_ref())?;
        debug!(
            resource_type = %self.config.resource_type,
            exists = new_state.exists(),
            "read resource state"
        );
        Ok(Some(new_state))
    }

    async fn plan(
        &self,
        current: Option<&InstanceState>,
        desired: &Map<String, Value>,
        for_provider: &Map<String, Value>,
        init_provider: &Map<String, Value>,
    ) -> anyhow::Result<InstanceDiff> {
        let prior = match current {
            Some(state) => self.state_to_dynamic(state)?,
            None => DynamicValue::Null,
        };
        let proposed = DynamicValue::from_json(&Value::Object(desired.clone()))?;
        let prior_private = current.map(Self::private_of).unwrap_or_default();
        let (planned, replace_paths, _planned_private, diagnostics) = self
            .server
            .plan_resource_change(&self.config.resource_type, prior, proposed, prior_private)
            .await;
        diagnostics.into_result("plan")?;

        let planned_flat = flatten_dynamic_root(&planned)?;
        let empty = BTreeMap::new();
        let current_attrs = current.map_or(&empty, |s| &s.attributes);
        let replace_prefixes: Vec<String> =
            replace_paths.iter().map(|p| attribute_path_to_flat(p)).collect();
        let schema = &self.config.schema;

        let mut result = InstanceDiff::default();
        for (key, planned_value) in &planned_flat {
            if key == constants::ATTRIBUTE_ID {
                continue;
            }
            if (key.ends_with(".%") || key.ends_with(".#")) && schema.lookup(key).is_none() {
                continue;
            }
            let old = current_attrs.get(key).cloned().unwrap_or_default();
            let requires_replace = current.is_some()
                && (matches_any_prefix(key, &replace_prefixes) || schema.forces_replacement(key));
            match planned_value {
                Some(new) if *new != old => {
                    result.attributes.insert(
                        key.clone(),
                        AttributeDiff {
                            old,
                            new: new.clone(),
                            new_computed: false,
                            new_removed: false,
                            requires_replace,
                            sensitive: schema.is_sensitive(key),
                        },
                    );
                }
                Some(_) => {}
                None => {
                    result.attributes.insert(
                        key.clone(),
                        AttributeDiff {
                            old,
                            new: String::new(),
                            new_computed: true,
                            new_removed: false,
                            requires_replace,
                            sensitive: schema.is_sensitive(key),
                        },
                    );
                }
            }
        }
        for (key, old) in current_attrs {
            if key == constants::ATTRIBUTE_ID || planned_flat.contains_key(key) {
                continue;
            }
            let Some(attr) = schema.lookup(key) else {
                continue;
            };
            if attr.computed {
                continue;
            }
            result.attributes.insert(
                key.clone(),
                AttributeDiff {
                    old: old.clone(),
                    new: String::new(),
                    new_computed: false,
                    new_removed: true,
                    requires_replace: matches_any_prefix(key, &replace_prefixes)
                        || schema.forces_replacement(key),
                    sensitive: attr.sensitive,
                },
            );
        }

        diff::apply_diff_policies(
            &self.config,
            &mut result,
            current,
            desired,
            for_provider,
            init_provider,
        )?;
        Ok(result)
    }

    async fn apply(
        &self,
        current: Option<&InstanceState>,
        diff: &InstanceDiff,
        desired: &Map<String, Value>,
    ) -> anyhow::Result<ApplyOutcome> {
        let prior = match current {
            Some(state) => self.state_to_dynamic(state)?,
            None => DynamicValue::Null,
        };
        let prior_private = current.map(Self::private_of).unwrap_or_default();

        let (planned, planned_private) = if diff.destroy {
            (DynamicValue::Null, prior_private.clone())
        } else {
            let proposed = DynamicValue::from_json(&Value::Object(desired.clone()))?;
            let (planned, _replace, planned_private, diagnostics) = self
                .server
                .plan_resource_change(
                    &self.config.resource_type,
                    prior.clone(),
                    proposed,
                    prior_private.clone(),
                )
                .await;
            diagnostics.into_result("plan")?;
            (planned, planned_private)
        };

        let (new_value, new_private, diagnostics) = self
            .server
            .apply_resource_change(&self.config.resource_type, prior, planned, planned_private)
            .await;
        let error = diagnostics.into_result("apply").err().map(Into::into);
        let timeouts = diff.meta.get(constants::STATE_META_TIMEOUTS);
        let state = new_value
            .as_ref()
            .map(|v| self.dynamic_to_state(v, &new_private, timeouts))
            .transpose()?;
        Ok(ApplyOutcome { state, error })
    }
}

/// Flatten a planned dynamic value; `None` marks a leaf only known after
/// apply
fn flatten_dynamic_root(
    value: &DynamicValue,
) -> Result<BTreeMap<String, Option<String>>, ValueError> {
    let mut out = BTreeMap::new();
    match value {
        DynamicValue::Null => {}
        DynamicValue::Object(entries) | DynamicValue::Map(entries) => {
            for (k, v) in entries {
                flatten_dynamic(k, v, &mut out);
            }
        }
        _ => {
            return Err(ValueError::ParseFailure {
                path: "<root>".to_string(),
                value: format!("{value:?}"),
                expected: "an object-shaped planned value",
            })
        }
    }
    Ok(out)
}

fn flatten_dynamic(prefix: &str, value: &DynamicValue, out: &mut BTreeMap<String, Option<String>>) {
    match value {
        DynamicValue::Null => {}
        DynamicValue::Unknown => {
            out.insert(prefix.to_string(), None);
        }
        DynamicValue::Bool(b) => {
            out.insert(prefix.to_string(), Some(b.to_string()));
        }
        DynamicValue::Int(i) => {
            out.insert(prefix.to_string(), Some(i.to_string()));
        }
        DynamicValue::Float(f) => {
            out.insert(prefix.to_string(), Some(f.to_string()));
        }
        DynamicValue::String(s) => {
            out.insert(prefix.to_string(), Some(s.clone()));
        }
        DynamicValue::List(items) => {
            out.insert(format!("{prefix}.#"), Some(items.len().to_string()));
            for (i, item) in items.iter().enumerate() {
                flatten_dynamic(&format!("{prefix}.{i}"), item, out);
            }
        }
        DynamicValue::Map(entries) | DynamicValue::Object(entries) => {
            out.insert(format!("{prefix}.%"), Some(entries.len().to_string()));
            for (k, v) in entries {
                flatten_dynamic(&format!("{prefix}.{k}"), v, out);
            }
        }
    }
}

/// Convert a provider attribute path (`replicas[0].zone`) to the flat key
/// form (`replicas.0.zone`)
fn attribute_path_to_flat(path: &str) -> String {
    path.replace("[", ".").replace("]", "")
}

fn matches_any_prefix(key: &str, prefixes: &[String]) -> bool {
    prefixes.iter().any(|p| {
        key == p || (key.starts_with(p.as_str()) && key.as_bytes().get(p.len()) == Some(&b'.'))
    })
}

/// Framework resources may declare DynamicPseudoType attributes; those are
/// unsupported and fail at Connect
fn reject_dynamic_types(schema: &ResourceSchema) -> Result<(), ValueError> {
    fn scan(prefix: &str, attr: &AttributeSchema) -> Result<(), ValueError> {
        match &attr.r#type {
            AttributeType::Dynamic => Err(ValueError::DynamicPseudoType {
                path: prefix.to_string(),
            }),
            AttributeType::List(inner) | AttributeType::Set(inner) | AttributeType::Map(inner) => {
                scan(prefix, inner)
            }
            AttributeType::Object(fields) => {
                for (name, field) in fields {
                    scan(&format!("{prefix}.{name}"), field)?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
    for (name, attr) in &schema.attributes {
        scan(name, attr)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::diagnostics::Diagnostic;
    use serde_json::json;
    use std::sync::Mutex;

    /// Provider double backed by a JSON tree, echoing framework semantics
    struct FakeFramework {
        state: Mutex<Option<Value>>,
        configured: Mutex<bool>,
    }

    impl FakeFramework {
        fn new(state: Option<Value>) -> Self {
            Self {
                state: Mutex::new(state),
                configured: Mutex::new(false),
            }
        }
    }

    #[async_trait]
    impl FrameworkProviderServer for FakeFramework {
        async fn configure(&self, _config: DynamicValue) -> Diagnostics {
            *self.configured.lock().expect("configured lock") = true;
            Diagnostics::default()
        }

        async fn read_resource(
            &self,
            _type_name: &str,
            _current: DynamicValue,
            private: Vec<u8>,
        ) -> (Option<DynamicValue>, Vec<u8>, Diagnostics) {
            let state = self.state.lock().expect("state lock").clone();
            match state {
                Some(v) => (
                    Some(DynamicValue::from_json(&v).expect("state is convertible")),
                    private,
                    Diagnostics::default(),
                ),
                None => (None, private, Diagnostics::default()),
            }
        }

        async fn plan_resource_change(
            &self,
            _type_name: &str,
            prior: DynamicValue,
            proposed: DynamicValue,
            prior_private: Vec<u8>,
        ) -> (DynamicValue, Vec<String>, Vec<u8>, Diagnostics) {
            // Planned state: proposed config with the prior id carried over,
            // or unknown id on create.
            let mut planned = match proposed {
                DynamicValue::Object(entries) => entries,
                _ => return (
                    DynamicValue::Null,
                    Vec::new(),
                    prior_private,
                    Diagnostics(vec![Diagnostic::error("bad proposed value", "")]),
                ),
            };
            let prior_id = match &prior {
                DynamicValue::Object(entries) => entries.get("id").cloned(),
                _ => None,
            };
            planned.insert(
                "id".to_string(),
                prior_id.unwrap_or(DynamicValue::Unknown),
            );
            (
                DynamicValue::Object(planned),
                Vec::new(),
                prior_private,
                Diagnostics::default(),
            )
        }

        async fn apply_resource_change(
            &self,
            _type_name: &str,
            _prior: DynamicValue,
            planned: DynamicValue,
            planned_private: Vec<u8>,
        ) -> (Option<DynamicValue>, Vec<u8>, Diagnostics) {
            if matches!(planned, DynamicValue::Null) {
                *self.state.lock().expect("state lock") = None;
                return (None, planned_private, Diagnostics::default());
            }
            let DynamicValue::Object(mut entries) = planned else {
                return (
                    None,
                    planned_private,
                    Diagnostics(vec![Diagnostic::error("bad planned value", "")]),
                );
            };
            if matches!(entries.get("id"), Some(DynamicValue::Unknown) | None) {
                entries.insert("id".to_string(), DynamicValue::String("fw-123".to_string()));
            }
            let value = DynamicValue::Object(entries);
            let json = value.to_json().expect("known after apply");
            *self.state.lock().expect("state lock") = Some(json);
            (Some(value), planned_private, Diagnostics::default())
        }
    }

    fn config() -> Arc<ResourceConfig> {
        Arc::new(ResourceConfig::new(
            "Instance",
            "fw_instance",
            ResourceSchema::new(BTreeMap::from([
                ("name".to_string(), AttributeSchema::string().required()),
                ("size".to_string(), AttributeSchema::int().optional()),
            ])),
        ))
    }

    #[tokio::test]
    async fn test_connect_rejects_dynamic_schema() {
        let mut cfg = ResourceConfig::new(
            "Instance",
            "fw_instance",
            ResourceSchema::new(BTreeMap::from([(
                "blob".to_string(),
                AttributeSchema::object(BTreeMap::new()),
            )])),
        );
        cfg.schema.attributes.insert(
            "anything".to_string(),
            AttributeSchema::string().optional(),
        );
        cfg.schema.attributes.get_mut("blob").unwrap().r#type = AttributeType::Dynamic;
        let err = FrameworkDriver::connect(
            Arc::new(FakeFramework::new(None)),
            Arc::new(cfg),
            &Map::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("dynamic pseudo-types"));
    }

    #[tokio::test]
    async fn test_create_plan_marks_unknown_id_computed() {
        let driver = FrameworkDriver::connect(
            Arc::new(FakeFramework::new(None)),
            config(),
            &Map::new(),
        )
        .await
        .unwrap();
        let desired = json!({"name": "db", "size": 10}).as_object().unwrap().clone();
        let diff = driver.plan(None, &desired, &desired, &Map::new()).await.unwrap();
        assert_eq!(diff.attributes["name"].new, "db");
        assert_eq!(diff.attributes["size"].new, "10");
        // id is identity, not a diffable attribute
        assert!(!diff.attributes.contains_key("id"));
    }

    #[tokio::test]
    async fn test_apply_materializes_server_assigned_id() {
        let server = Arc::new(FakeFramework::new(None));
        let driver = FrameworkDriver::connect(server, config(), &Map::new())
            .await
            .unwrap();
        let desired = json!({"name": "db"}).as_object().unwrap().clone();
        let diff = driver.plan(None, &desired, &desired, &Map::new()).await.unwrap();
        let outcome = driver.apply(None, &diff, &desired).await.unwrap();
        assert!(outcome.error.is_none());
        let state = outcome.state.unwrap();
        assert_eq!(state.id, "fw-123");
        assert_eq!(state.attributes.get("name").map(String::as_str), Some("db"));
        assert!(state.meta.contains_key(constants::STATE_META_RAW_STATE));
    }

    #[tokio::test]
    async fn test_destroy_clears_state() {
        let initial = json!({"id": "fw-123", "name": "db"});
        let server = Arc::new(FakeFramework::new(Some(initial)));
        let driver = FrameworkDriver::connect(server, config(), &Map::new())
            .await
            .unwrap();
        let mut current = InstanceState::default();
        current.set_id("fw-123");
        current.attributes.insert("name".to_string(), "db".to_string());
        let outcome = driver
            .apply(Some(&current), &InstanceDiff::destroy(), &Map::new())
            .await
            .unwrap();
        assert!(outcome.error.is_none());
        assert!(outcome.state.is_none());
    }

    #[tokio::test]
    async fn test_read_round_trips_state() {
        let initial = json!({"id": "fw-123", "name": "db", "size": 10});
        let server = Arc::new(FakeFramework::new(Some(initial)));
        let driver = FrameworkDriver::connect(server, config(), &Map::new())
            .await
            .unwrap();
        let mut current = InstanceState::default();
        current.set_id("fw-123");
        let state = driver.read(&current).await.unwrap().unwrap();
        assert_eq!(state.id, "fw-123");
        assert_eq!(state.attributes.get("size").map(String::as_str), Some("10"));
    }
}

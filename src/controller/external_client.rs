//! # External Client
//!
//! The per-resource state machine driving the in-process Terraform provider:
//! Connect builds the extended parameter set and synthesizes cached state,
//! Observe reads and diffs, Create/Update/Delete apply. The reconciliation
//! manager calls these in order; Observe always precedes any mutating call
//! within a reconcile tick.

use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, info_span, warn};

use crate::constants;
use crate::controller::connection::{build_connection_details, ConnectionDetails};
use crate::controller::setup::TerraformSetupFactory;
use crate::controller::workspace::{OperationTracker, OperationType, WorkspaceStore};
use crate::crd::status::{Condition, ConditionStatus};
use crate::crd::ManagementPolicy;
use crate::observability::metrics;
use crate::provider::framework::FrameworkDriver;
use crate::provider::sdk::SdkDriver;
use crate::provider::state::{InstanceDiff, InstanceState};
use crate::provider::value::flatten_parameters;
use crate::provider::{diff, ProviderDriver};
use crate::resource::config::{ConfigRegistry, ResourceConfig};
use crate::resource::external_name::ExternalNameError;
use crate::resource::fieldpath::FieldPath;
use crate::resource::lateinit;
use crate::resource::sensitive::{hydrate_parameters, SecretClient};
use crate::resource::terraformed::Terraformed;

/// Result of an Observe call
#[derive(Debug, Default)]
pub struct Observation {
    /// The external resource exists
    pub resource_exists: bool,
    /// The external resource matches the desired parameters
    pub resource_up_to_date: bool,
    /// Connection details extracted from the observed state
    pub connection_details: ConnectionDetails,
    /// The spec or metadata changed and must be persisted by the caller
    pub resource_late_initialized: bool,
}

/// Result of a Create call
#[derive(Debug, Default)]
pub struct Creation {
    pub connection_details: ConnectionDetails,
}

/// Result of an Update call
#[derive(Debug, Default)]
pub struct Update {
    pub connection_details: ConnectionDetails,
}

/// Errors of the external client state machine
#[derive(Debug, Error)]
pub enum ExternalClientError {
    #[error("no resource configuration registered for terraform type {resource_type:?}")]
    UnknownResourceType { resource_type: String },
    #[error("required parameter {field:?} is not set")]
    MissingRequiredField { field: String },
    #[error("terraform setup carries no in-process provider handle")]
    MissingProviderHandle,
    #[error("terraform setup carries both an SDK and a framework provider handle")]
    AmbiguousProviderHandle,
    #[error("create returned no identifier for the external resource")]
    EmptyIdAfterCreate,
    #[error(
        "previous create failed after the provider may have allocated an identifier; \
         clear the {} annotation to retry",
        constants::ANNOTATION_EXTERNAL_CREATE_FAILED
    )]
    CreatePreviouslyFailed,
    #[error("reconciliation is paused; no provider call is permitted")]
    Paused,
    #[error("{operation} is not permitted by the management policies")]
    PolicyForbidden { operation: OperationType },
    #[error("async {operation} failed: {message}")]
    AsyncOperationFailed {
        operation: OperationType,
        message: String,
    },
}

/// Produces an [`ExternalClient`] per managed resource and reconcile
pub struct Connector {
    store: Arc<WorkspaceStore>,
    registry: Arc<ConfigRegistry>,
    setup_factory: Arc<dyn TerraformSetupFactory>,
    secrets: Arc<dyn SecretClient>,
    /// Namespace assumed for secret references that do not carry one
    default_namespace: String,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("default_namespace", &self.default_namespace)
            .finish_non_exhaustive()
    }
}

impl Connector {
    pub fn new(
        store: Arc<WorkspaceStore>,
        registry: Arc<ConfigRegistry>,
        setup_factory: Arc<dyn TerraformSetupFactory>,
        secrets: Arc<dyn SecretClient>,
        default_namespace: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            setup_factory,
            secrets,
            default_namespace: default_namespace.into(),
        }
    }

    /// Build the external client for one reconcile of a managed resource
    pub async fn connect(&self, mg: &dyn Terraformed) -> anyhow::Result<ExternalClient> {
        let resource_type = mg.get_terraform_resource_type().to_string();
        let config = self
            .registry
            .get(&resource_type)
            .ok_or(ExternalClientError::UnknownResourceType {
                resource_type: resource_type.clone(),
            })?;

        let span = info_span!(
            "external_client",
            resource.uid = mg.uid(),
            resource.kind = %config.kind,
            resource.name = mg.name()
        );
        let _guard = span.enter();

        if mg.is_paused() {
            info!("reconciliation paused via annotation");
            return Ok(ExternalClient::paused(config));
        }

        let setup = self.setup_factory.setup(mg).await?;
        let external_name = mg.external_name().unwrap_or_default().to_string();

        // Extended parameters: merged spec, hydrated secrets, identifier
        // arguments, provider-specific mirrors. Init parameters always
        // participate in the merge; the diff filter keeps init-only keys
        // from reading as drift, and append overrides must survive for
        // policies without Create.
        let mut desired = lateinit::merge_parameters(
            &mg.get_parameters(),
            &mg.get_init_parameters(),
            &config.init_merge_append_paths,
        );

        for field in &config.required_fields {
            let present = FieldPath::parse(field)
                .ok()
                .and_then(|p| p.get(&Value::Object(desired.clone())).cloned())
                .is_some();
            if !present {
                return Err(ExternalClientError::MissingRequiredField {
                    field: field.clone(),
                }
                .into());
            }
        }

        let cr_tree = Value::Object(desired.clone());
        hydrate_parameters(
            self.secrets.as_ref(),
            &cr_tree,
            &self.default_namespace,
            &config.sensitive.parameter_mappings,
            &mut desired,
        )
        .await?;

        // Secret selectors and identifier-carried fields are Kubernetes-side
        // constructs; the provider never sees them.
        let mut desired_value = Value::Object(desired);
        for cr_path in config.sensitive.parameter_mappings.keys() {
            let parsed = FieldPath::parse(cr_path)?;
            for concrete in parsed.expand(&desired_value.clone()) {
                concrete.remove(&mut desired_value);
            }
        }
        for omitted in &config.external_name.omitted_fields {
            FieldPath::parse(omitted)?.remove(&mut desired_value);
        }
        let mut desired = match desired_value {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        if !external_name.is_empty() {
            config
                .external_name
                .set_identifier_argument(&mut desired, &external_name);
        }
        let tf_id = match config
            .external_name
            .get_id(&external_name, &desired, &setup.configuration)
        {
            Ok(id) => id,
            // Identity does not exist yet; Observe will report not-exists
            // and Create will establish it.
            Err(ExternalNameError::MissingExternalName) => String::new(),
            Err(e) => return Err(e.into()),
        };
        if !tf_id.is_empty() {
            desired.insert(
                constants::ATTRIBUTE_ID.to_string(),
                Value::String(tf_id.clone()),
            );
        }

        if config.mirrors_tags() {
            if let Some(tags) = desired.get(constants::ATTRIBUTE_TAGS).cloned() {
                desired
                    .entry(constants::ATTRIBUTE_TAGS_ALL.to_string())
                    .or_insert(tags);
            }
        }

        if let Some(injector) = &config.config_injector {
            injector(&mut desired)?;
        }

        let tracker = self.store.tracker(mg.name(), mg.uid());
        if !tracker.has_state() {
            tracker.set_state(Some(synthesize_state(&config, mg, &desired, &tf_id)?));
            debug!("synthesized initial terraform state from spec");
        }

        let driver: Box<dyn ProviderDriver> = match (setup.sdk_server, setup.framework_server) {
            (Some(_), Some(_)) => return Err(ExternalClientError::AmbiguousProviderHandle.into()),
            (Some(sdk), None) => Box::new(SdkDriver::new(sdk, Arc::clone(&config))),
            (None, Some(framework)) => Box::new(
                FrameworkDriver::connect(framework, Arc::clone(&config), &setup.configuration)
                    .await?,
            ),
            (None, None) => return Err(ExternalClientError::MissingProviderHandle.into()),
        };

        Ok(ExternalClient {
            driver: Some(driver),
            tracker: Some(tracker),
            config,
            desired,
            for_provider: mg.get_parameters(),
            init_provider: mg.get_init_parameters(),
            connection_mapping: mg.get_connection_details_mapping(),
            last_diff: Mutex::new(None),
            paused: false,
        })
    }
}

/// Synthesize the initial cached state for a tracker that has none: the
/// observation overlaid with sensitive parameters and the identifier, or a
/// copy of the parameters when nothing was observed yet.
fn synthesize_state(
    config: &ResourceConfig,
    mg: &dyn Terraformed,
    desired: &Map<String, Value>,
    tf_id: &str,
) -> anyhow::Result<InstanceState> {
    let observation = mg.get_observation();
    let mut tree = if observation.is_empty() {
        desired.clone()
    } else {
        observation
    };

    // Observed state never carries secret values; copy them over from the
    // hydrated parameters so refresh does not see them as drift.
    let desired_tree = Value::Object(desired.clone());
    let mut tree_value = Value::Object(tree);
    for tf_path in config.sensitive.parameter_mappings.values() {
        let parsed = FieldPath::parse(tf_path)?;
        for concrete in parsed.expand(&desired_tree) {
            if let Some(value) = concrete.get(&desired_tree) {
                concrete.set(&mut tree_value, value.clone())?;
            }
        }
    }
    tree = match tree_value {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    let mut state = InstanceState {
        id: String::new(),
        attributes: flatten_parameters(&tree)?,
        meta: Map::new(),
    };
    state.set_id(tf_id);
    state.meta.insert(
        constants::STATE_META_TIMEOUTS.to_string(),
        config.timeouts.to_meta(),
    );
    Ok(state)
}

/// Rebuild the observation tree from cached state
fn state_to_observation(
    config: &ResourceConfig,
    state: &InstanceState,
) -> anyhow::Result<Map<String, Value>> {
    if let Some(Value::Object(raw)) = state.meta.get(constants::STATE_META_RAW_STATE) {
        return Ok(raw.clone());
    }
    let mut tree = config.schema.expand_attributes(&state.attributes)?;
    if state.exists() {
        tree.insert(
            constants::ATTRIBUTE_ID.to_string(),
            Value::String(state.id.clone()),
        );
    }
    Ok(tree)
}

/// External client for one managed resource and reconcile
pub struct ExternalClient {
    driver: Option<Box<dyn ProviderDriver>>,
    tracker: Option<Arc<OperationTracker>>,
    config: Arc<ResourceConfig>,
    /// Extended parameters built during Connect
    desired: Map<String, Value>,
    for_provider: Map<String, Value>,
    init_provider: Map<String, Value>,
    connection_mapping: std::collections::BTreeMap<String, String>,
    /// Diff computed by Observe, reused by the mutating calls of the same
    /// reconcile tick
    last_diff: Mutex<Option<InstanceDiff>>,
    paused: bool,
}

impl std::fmt::Debug for ExternalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalClient")
            .field("kind", &self.config.kind)
            .field("paused", &self.paused)
            .finish_non_exhaustive()
    }
}

impl ExternalClient {
    fn paused(config: Arc<ResourceConfig>) -> Self {
        Self {
            driver: None,
            tracker: None,
            config,
            desired: Map::new(),
            for_provider: Map::new(),
            init_provider: Map::new(),
            connection_mapping: Default::default(),
            last_diff: Mutex::new(None),
            paused: true,
        }
    }

    pub(crate) fn is_paused(&self) -> bool {
        self.paused
    }

    pub(crate) fn tracker(&self) -> Arc<OperationTracker> {
        Arc::clone(self.tracker.as_ref().expect("paused client has no tracker"))
    }

    pub(crate) fn config(&self) -> Arc<ResourceConfig> {
        Arc::clone(&self.config)
    }

    fn driver(&self) -> &dyn ProviderDriver {
        self.driver
            .as_deref()
            .expect("paused client never reaches the provider")
    }

    fn take_last_diff(&self) -> Option<InstanceDiff> {
        self.last_diff.lock().expect("diff mutex poisoned").take()
    }

    fn set_last_diff(&self, value: Option<InstanceDiff>) {
        *self.last_diff.lock().expect("diff mutex poisoned") = value;
    }

    /// Observe the external resource and report existence, up-to-dateness,
    /// connection details, and whether the spec changed
    pub async fn observe(&self, mg: &mut dyn Terraformed) -> anyhow::Result<Observation> {
        if self.paused {
            return Ok(Observation {
                resource_exists: true,
                resource_up_to_date: true,
                ..Observation::default()
            });
        }
        let tracker = self.tracker();
        if tracker.is_deleted() && mg.is_deleting() {
            return Ok(Observation::default());
        }

        let current = tracker.state().unwrap_or_default();
        let started = Instant::now();
        let refreshed = self.driver().read(&current).await.inspect_err(|_| {
            metrics::increment_operation_errors("read");
        })?;
        metrics::observe_external_api_duration("read", started.elapsed().as_secs_f64());

        let new_state = refreshed.unwrap_or_default();
        let exists = new_state.exists();
        tracker.set_state(Some(new_state.clone()));
        if !exists {
            self.set_last_diff(None);
            debug!("external resource does not exist");
            return Ok(Observation::default());
        }

        let plan = self
            .driver()
            .plan(
                Some(&new_state),
                &self.desired,
                &self.for_provider,
                &self.init_provider,
            )
            .await?;
        let up_to_date = plan.is_empty();
        self.set_last_diff(Some(plan));

        let observation_tree = state_to_observation(&self.config, &new_state)?;
        let connection_details = build_connection_details(
            &Value::Object(observation_tree.clone()),
            &self.connection_mapping,
            &self.config,
        )?;

        let mut late_initialized = false;
        if !mg.is_deleting() && mg.policy_allows(ManagementPolicy::LateInitialize) {
            let bytes = serde_json::to_vec(&observation_tree)?;
            late_initialized = mg.late_initialize(&bytes, &self.config.late_init_exclusions())?;
        }

        // Adopt or correct the external-name annotation from observed state.
        if let Some(name) = self.config.external_name.get_external_name(&new_state)? {
            if mg.external_name() != Some(name.as_str()) {
                info!(external_name = %name, "adopting external name from provider state");
                mg.set_external_name(&name);
                late_initialized = true;
            }
        }

        let previously_ready = mg.ready_status() == Some(ConditionStatus::True);
        mg.set_observation(observation_tree);
        mg.set_condition(Condition::available());
        if !previously_ready {
            if let (Some(OperationType::Create), Some(started_at)) =
                (tracker.last_operation(), tracker.started_at())
            {
                let elapsed = (chrono::Utc::now() - started_at)
                    .to_std()
                    .unwrap_or_default();
                metrics::observe_time_to_readiness(&self.config.kind, elapsed.as_secs_f64());
            }
        }

        Ok(Observation {
            resource_exists: true,
            resource_up_to_date: up_to_date,
            connection_details,
            resource_late_initialized: late_initialized,
        })
    }

    /// Create the external resource
    pub async fn create(&self, mg: &mut dyn Terraformed) -> anyhow::Result<Creation> {
        if self.paused {
            return Err(ExternalClientError::Paused.into());
        }
        if !mg.policy_allows(ManagementPolicy::Create) {
            return Err(ExternalClientError::PolicyForbidden {
                operation: OperationType::Create,
            }
            .into());
        }
        if mg.external_create_failed() {
            return Err(ExternalClientError::CreatePreviouslyFailed.into());
        }
        let tracker = self.tracker();
        mg.set_condition(Condition::creating());

        let plan = match self.take_last_diff() {
            Some(diff) => diff,
            None => {
                self.driver()
                    .plan(None, &self.desired, &self.for_provider, &self.init_provider)
                    .await?
            }
        };

        let started = Instant::now();
        let outcome = self
            .driver()
            .apply(None, &plan, &self.desired)
            .await
            .inspect_err(|_| metrics::increment_operation_errors("create"))?;
        metrics::observe_external_api_duration("create", started.elapsed().as_secs_f64());

        // Persist whatever came back before error handling, so a
        // server-generated identifier survives a partial failure.
        if let Some(state) = &outcome.state {
            tracker.set_state(Some(state.clone()));
        }
        if let Some(error) = outcome.error {
            metrics::increment_operation_errors("create");
            return Err(error);
        }
        let state = outcome.state.filter(InstanceState::exists).ok_or(
            ExternalClientError::EmptyIdAfterCreate,
        )?;

        let observation_tree = state_to_observation(&self.config, &state)?;
        let connection_details = build_connection_details(
            &Value::Object(observation_tree.clone()),
            &self.connection_mapping,
            &self.config,
        )?;
        mg.set_observation(observation_tree);
        if let Some(name) = self.config.external_name.get_external_name(&state)? {
            if mg.external_name() != Some(name.as_str()) {
                mg.set_external_name(&name);
            }
        }
        info!(id = %state.id, "created external resource");
        Ok(Creation { connection_details })
    }

    /// Update the external resource in place. Fails without touching the
    /// provider when the pending diff would replace the resource.
    pub async fn update(&self, mg: &mut dyn Terraformed) -> anyhow::Result<Update> {
        if self.paused {
            return Err(ExternalClientError::Paused.into());
        }
        if !mg.policy_allows(ManagementPolicy::Update) {
            return Err(ExternalClientError::PolicyForbidden {
                operation: OperationType::Update,
            }
            .into());
        }
        let tracker = self.tracker();
        let current = tracker.state().unwrap_or_default();
        let plan = match self.take_last_diff() {
            Some(diff) => diff,
            None => {
                self.driver()
                    .plan(
                        Some(&current),
                        &self.desired,
                        &self.for_provider,
                        &self.init_provider,
                    )
                    .await?
            }
        };
        diff::reject_replacement(&plan)?;

        let started = Instant::now();
        let outcome = self
            .driver()
            .apply(Some(&current), &plan, &self.desired)
            .await
            .inspect_err(|_| metrics::increment_operation_errors("update"))?;
        metrics::observe_external_api_duration("update", started.elapsed().as_secs_f64());

        if let Some(state) = &outcome.state {
            tracker.set_state(Some(state.clone()));
        }
        if let Some(error) = outcome.error {
            metrics::increment_operation_errors("update");
            return Err(error);
        }
        let state = tracker.state().unwrap_or_default();
        let observation_tree = state_to_observation(&self.config, &state)?;
        let connection_details = build_connection_details(
            &Value::Object(observation_tree.clone()),
            &self.connection_mapping,
            &self.config,
        )?;
        mg.set_observation(observation_tree);
        info!("updated external resource");
        Ok(Update { connection_details })
    }

    /// Delete the external resource
    pub async fn delete(&self, mg: &mut dyn Terraformed) -> anyhow::Result<()> {
        if self.paused {
            return Err(ExternalClientError::Paused.into());
        }
        if !mg.policy_allows(ManagementPolicy::Delete) {
            return Err(ExternalClientError::PolicyForbidden {
                operation: OperationType::Delete,
            }
            .into());
        }
        let tracker = self.tracker();
        mg.set_condition(Condition::deleting());

        let mut plan = InstanceDiff::destroy();
        plan.meta.insert(
            constants::STATE_META_TIMEOUTS.to_string(),
            self.config.timeouts.to_meta(),
        );
        let current = tracker.state().unwrap_or_default();

        let started = Instant::now();
        let outcome = self
            .driver()
            .apply(Some(&current), &plan, &self.desired)
            .await
            .inspect_err(|_| metrics::increment_operation_errors("delete"))?;
        metrics::observe_external_api_duration("delete", started.elapsed().as_secs_f64());

        let cleared = outcome
            .state
            .as_ref()
            .is_none_or(|state| !state.exists());
        tracker.set_state(Some(outcome.state.unwrap_or_default()));
        if let Some(error) = outcome.error {
            metrics::increment_operation_errors("delete");
            return Err(error);
        }
        if cleared {
            tracker.set_deleted(true);
            if let Some(started_at) = tracker.started_at() {
                let elapsed = (chrono::Utc::now() - started_at)
                    .to_std()
                    .unwrap_or_default();
                metrics::observe_deletion_time(&self.config.kind, elapsed.as_secs_f64());
            }
            info!("external resource deleted");
        } else {
            warn!("delete applied but the provider still reports state");
        }
        Ok(())
    }
}

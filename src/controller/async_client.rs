//! # Async External Client
//!
//! Wraps the external client so that long-running provider operations do not
//! hold a reconcile slot. Mutating calls record the operation on the tracker
//! and return immediately; a detached worker drives the provider with a
//! deadline derived from the per-operation timeout and requeues the managed
//! object on completion.
//!
//! The reconcile context is deliberately not propagated to the worker: the
//! reconcile returns long before the cloud operation finishes, and the
//! caller can only inspect the tracker, never cancel the work.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::constants;
use crate::controller::external_client::{
    Creation, ExternalClient, ExternalClientError, Observation, Update,
};
use crate::controller::workspace::OperationType;
use crate::observability::metrics;
use crate::resource::config::OperationTimeouts;
use crate::resource::terraformed::Terraformed;

/// Requeue seam towards the controller's work queue
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Enqueue a reconcile for the named resource, optionally bounding how
    /// often a failing resource may be requeued. Returns whether the request
    /// was accepted.
    async fn request_reconcile(&self, rate_limiter: &str, name: &str, failure_limit: Option<u32>)
        -> bool;
    /// Reset the rate limiter for the named resource after a success
    async fn forget(&self, rate_limiter: &str, name: &str);
}

/// Event handler that drops all requests, for wiring without a queue
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventHandler;

#[async_trait]
impl EventHandler for NoopEventHandler {
    async fn request_reconcile(
        &self,
        _rate_limiter: &str,
        _name: &str,
        _failure_limit: Option<u32>,
    ) -> bool {
        true
    }

    async fn forget(&self, _rate_limiter: &str, _name: &str) {}
}

/// Async wrapper around [`ExternalClient`]
pub struct AsyncExternalClient {
    inner: Arc<ExternalClient>,
    events: Arc<dyn EventHandler>,
    rate_limiter_name: String,
    timeouts: OperationTimeouts,
}

impl std::fmt::Debug for AsyncExternalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncExternalClient")
            .field("rate_limiter_name", &self.rate_limiter_name)
            .finish_non_exhaustive()
    }
}

impl AsyncExternalClient {
    pub fn new(
        client: ExternalClient,
        events: Arc<dyn EventHandler>,
        rate_limiter_name: impl Into<String>,
    ) -> Self {
        let timeouts = client.config().timeouts;
        Self {
            inner: Arc::new(client),
            events,
            rate_limiter_name: rate_limiter_name.into(),
            timeouts,
        }
    }

    fn deadline(&self, op: OperationType) -> Duration {
        self.timeouts.for_operation(op).unwrap_or(Duration::from_secs(
            constants::DEFAULT_ASYNC_OPERATION_TIMEOUT_SECS,
        ))
    }

    /// Observe, reporting up-to-date while an async operation is running so
    /// the controller does not issue a second mutating call
    pub async fn observe(&self, mg: &mut dyn Terraformed) -> anyhow::Result<Observation> {
        if self.inner.is_paused() {
            return self.inner.observe(mg).await;
        }
        let tracker = self.inner.tracker();
        if tracker.is_running() {
            debug!(
                operation = ?tracker.last_operation(),
                "async operation in progress, skipping provider read"
            );
            return Ok(Observation {
                resource_exists: true,
                resource_up_to_date: true,
                ..Observation::default()
            });
        }
        if let Some(message) = tracker.take_error() {
            let operation = tracker.last_operation().unwrap_or(OperationType::Create);
            return Err(ExternalClientError::AsyncOperationFailed { operation, message }.into());
        }
        self.inner.observe(mg).await
    }

    /// Start a detached Create and return immediately
    pub async fn create(&self, mg: &dyn Terraformed) -> anyhow::Result<Creation> {
        self.spawn(OperationType::Create, mg)?;
        Ok(Creation::default())
    }

    /// Start a detached Update and return immediately
    pub async fn update(&self, mg: &dyn Terraformed) -> anyhow::Result<Update> {
        self.spawn(OperationType::Update, mg)?;
        Ok(Update::default())
    }

    /// Start a detached Delete and return immediately
    pub async fn delete(&self, mg: &dyn Terraformed) -> anyhow::Result<()> {
        self.spawn(OperationType::Delete, mg)
    }

    fn spawn(&self, op: OperationType, mg: &dyn Terraformed) -> anyhow::Result<()> {
        if self.inner.is_paused() {
            return Err(ExternalClientError::Paused.into());
        }
        let tracker = self.inner.tracker();
        if let Err(overlap) = tracker.mark_start(op) {
            tracker.set_error(Some(overlap.to_string()));
            return Err(overlap.into());
        }
        metrics::increment_async_operations(&op.to_string());

        let deadline = self.deadline(op);
        let mut copy = mg.clone_terraformed();
        let inner = Arc::clone(&self.inner);
        let events = Arc::clone(&self.events);
        let rate_limiter = self.rate_limiter_name.clone();
        let name = mg.name().to_string();

        tokio::spawn(async move {
            let result = tokio::time::timeout(deadline, async {
                match op {
                    OperationType::Create => inner.create(copy.as_mut()).await.map(|_| ()),
                    OperationType::Update => inner.update(copy.as_mut()).await.map(|_| ()),
                    OperationType::Delete => inner.delete(copy.as_mut()).await,
                }
            })
            .await;
            let error = match result {
                Err(_elapsed) => Some(format!("{op} did not complete within {deadline:?}")),
                Ok(Err(e)) => Some(format!("{e:#}")),
                Ok(Ok(())) => None,
            };
            if error.is_some() {
                metrics::increment_operation_errors(&op.to_string());
            }
            tracker.set_error(error.clone());
            tracker.mark_end();
            if error.is_none() {
                events.forget(&rate_limiter, &name).await;
            }
            if !events.request_reconcile(&rate_limiter, &name, None).await {
                warn!(resource = %name, operation = %op, "failed to requeue after async operation");
            }
        });
        Ok(())
    }
}

//! # Operation Trackers and the Workspace Store
//!
//! One tracker per managed-resource UID serializes asynchronous operations
//! and caches the Terraform state between reconciles. The workspace store is
//! the process-global map from UID to tracker; it only guards lookup and
//! insert, the trackers themselves are thread-safe.
//!
//! A tracker is created lazily on the first Connect for a UID and removed
//! when the managed object's finalizer is cleared.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

use crate::provider::state::InstanceState;

/// Mutating operation driven against the external resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationType::Create => write!(f, "create"),
            OperationType::Update => write!(f, "update"),
            OperationType::Delete => write!(f, "delete"),
        }
    }
}

/// Attempt to start an operation while another one is still running.
/// Not retryable; the running operation must finish first.
#[derive(Debug, Error)]
#[error("cannot start {requested} for {name}: {running} is still running")]
pub struct OperationInProgressError {
    pub requested: OperationType,
    pub running: OperationType,
    pub name: String,
}

#[derive(Debug, Default)]
struct TrackerInner {
    last_op: Option<OperationType>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    error: Option<String>,
    state: Option<InstanceState>,
    deleted: bool,
}

impl TrackerInner {
    fn is_running(&self) -> bool {
        self.last_op.is_some() && self.started_at.is_some() && self.ended_at.is_none()
    }
}

/// Per-UID async operation state and cached Terraform state
#[derive(Debug)]
pub struct OperationTracker {
    name: String,
    uid: String,
    inner: Mutex<TrackerInner>,
}

impl OperationTracker {
    fn new(name: &str, uid: &str) -> Self {
        Self {
            name: name.to_string(),
            uid: uid.to_string(),
            inner: Mutex::new(TrackerInner::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// Record the start of an operation. Fails when another operation is
    /// still running.
    pub fn mark_start(&self, op: OperationType) -> Result<(), OperationInProgressError> {
        let mut inner = self.lock();
        if inner.is_running() {
            return Err(OperationInProgressError {
                requested: op,
                running: inner.last_op.expect("running implies an operation"),
                name: self.name.clone(),
            });
        }
        inner.last_op = Some(op);
        inner.started_at = Some(Utc::now());
        inner.ended_at = None;
        inner.error = None;
        debug!(resource = %self.name, operation = %op, "async operation started");
        Ok(())
    }

    /// Record the end of the running operation, preserving the last error
    pub fn mark_end(&self) {
        let mut inner = self.lock();
        inner.ended_at = Some(Utc::now());
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_running()
    }

    /// Type of the last started operation
    pub fn last_operation(&self) -> Option<OperationType> {
        self.lock().last_op
    }

    /// Start time of the last operation
    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.lock().started_at
    }

    pub fn error(&self) -> Option<String> {
        self.lock().error.clone()
    }

    pub fn set_error(&self, error: Option<String>) {
        self.lock().error = error;
    }

    /// Surface the last error once, clearing it
    pub fn take_error(&self) -> Option<String> {
        self.lock().error.take()
    }

    pub fn state(&self) -> Option<InstanceState> {
        self.lock().state.clone()
    }

    pub fn set_state(&self, state: Option<InstanceState>) {
        self.lock().state = state;
    }

    pub fn has_state(&self) -> bool {
        self.lock().state.is_some()
    }

    /// Latch the deleted flag; once set it stays set for the tracker's
    /// lifetime
    pub fn set_deleted(&self, deleted: bool) {
        let mut inner = self.lock();
        inner.deleted = inner.deleted || deleted;
    }

    pub fn is_deleted(&self) -> bool {
        self.lock().deleted
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        self.inner.lock().expect("operation tracker mutex poisoned")
    }
}

/// Process-global mapping from managed-resource UID to its tracker
#[derive(Debug, Default)]
pub struct WorkspaceStore {
    trackers: Mutex<HashMap<String, Arc<OperationTracker>>>,
}

impl WorkspaceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker for the given resource, created lazily on first use
    pub fn tracker(&self, name: &str, uid: &str) -> Arc<OperationTracker> {
        let mut trackers = self.trackers.lock().expect("workspace store mutex poisoned");
        Arc::clone(
            trackers
                .entry(uid.to_string())
                .or_insert_with(|| Arc::new(OperationTracker::new(name, uid))),
        )
    }

    /// Drop the tracker for a UID, once the finalizer is cleared
    pub fn remove(&self, uid: &str) {
        let mut trackers = self.trackers.lock().expect("workspace store mutex poisoned");
        if trackers.remove(uid).is_some() {
            debug!(uid, "removed operation tracker");
        }
    }

    pub fn len(&self) -> usize {
        self.trackers.lock().expect("workspace store mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mark_start_rejects_overlap() {
        let tracker = OperationTracker::new("db", "uid-1");
        tracker.mark_start(OperationType::Create).unwrap();
        let err = tracker.mark_start(OperationType::Update).unwrap_err();
        assert_eq!(err.running, OperationType::Create);
        assert_eq!(err.requested, OperationType::Update);
        assert!(tracker.is_running());
    }

    #[test]
    fn test_mark_end_returns_to_idle_preserving_error() {
        let tracker = OperationTracker::new("db", "uid-1");
        tracker.mark_start(OperationType::Create).unwrap();
        tracker.set_error(Some("cloud API exploded".to_string()));
        tracker.mark_end();
        assert!(!tracker.is_running());
        assert_eq!(tracker.error().as_deref(), Some("cloud API exploded"));
        // A new operation may start now and clears the stale error.
        tracker.mark_start(OperationType::Update).unwrap();
        assert_eq!(tracker.error(), None);
    }

    #[test]
    fn test_deleted_flag_latches() {
        let tracker = OperationTracker::new("db", "uid-1");
        tracker.set_deleted(true);
        tracker.set_deleted(false);
        assert!(tracker.is_deleted());
    }

    #[test]
    fn test_store_returns_same_tracker_per_uid() {
        let store = WorkspaceStore::new();
        let a = store.tracker("db", "uid-1");
        let b = store.tracker("db", "uid-1");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.len(), 1);
        store.remove("uid-1");
        assert!(store.is_empty());
    }

    #[test]
    fn test_state_cache_round_trip() {
        let tracker = OperationTracker::new("db", "uid-1");
        assert!(!tracker.has_state());
        let mut state = InstanceState::default();
        state.set_id("i-1");
        tracker.set_state(Some(state.clone()));
        assert!(tracker.has_state());
        assert_eq!(tracker.state(), Some(state));
    }
}

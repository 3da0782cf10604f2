//! # External Client Metrics
//!
//! Metrics for the external client state machine: provider call latency by
//! operation, time to readiness and deletion time by kind, async operation
//! counts and failures, and the delay between an async completion and the
//! next reconcile.

use crate::observability::metrics::registry::REGISTRY;
use anyhow::Result;
use prometheus::{HistogramVec, IntCounterVec};
use std::sync::LazyLock;

static EXTERNAL_API_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "terraform_controller_external_api_duration_seconds",
            "Duration of in-process Terraform provider calls by operation",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0]),
        &["operation"],
    )
    .expect("Failed to create EXTERNAL_API_DURATION metric - this should never happen")
});

static TIME_TO_READINESS: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "terraform_controller_time_to_readiness_seconds",
            "Time from create start until the Ready condition first turns True",
        )
        .buckets(vec![1.0, 5.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["kind"],
    )
    .expect("Failed to create TIME_TO_READINESS metric - this should never happen")
});

static DELETION_TIME: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "terraform_controller_deletion_seconds",
            "Time from delete start until the provider cleared the state",
        )
        .buckets(vec![1.0, 5.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        &["kind"],
    )
    .expect("Failed to create DELETION_TIME metric - this should never happen")
});

static RECONCILE_DELAY: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "terraform_controller_reconcile_delay_seconds",
            "Delay between an async operation completing and the requeued reconcile running",
        )
        .buckets(vec![0.1, 0.5, 1.0, 5.0, 15.0, 60.0]),
        &["kind"],
    )
    .expect("Failed to create RECONCILE_DELAY metric - this should never happen")
});

static ASYNC_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "terraform_controller_async_operations_total",
            "Total number of detached async operations started",
        ),
        &["operation"],
    )
    .expect("Failed to create ASYNC_OPERATIONS_TOTAL metric - this should never happen")
});

static OPERATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "terraform_controller_operation_errors_total",
            "Total number of failed external operations by operation",
        ),
        &["operation"],
    )
    .expect("Failed to create OPERATION_ERRORS_TOTAL metric - this should never happen")
});

/// Register external client metrics with the global registry
pub fn register_client_metrics() -> Result<()> {
    REGISTRY.register(Box::new(EXTERNAL_API_DURATION.clone()))?;
    REGISTRY.register(Box::new(TIME_TO_READINESS.clone()))?;
    REGISTRY.register(Box::new(DELETION_TIME.clone()))?;
    REGISTRY.register(Box::new(RECONCILE_DELAY.clone()))?;
    REGISTRY.register(Box::new(ASYNC_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(OPERATION_ERRORS_TOTAL.clone()))?;
    Ok(())
}

pub fn observe_external_api_duration(operation: &str, seconds: f64) {
    EXTERNAL_API_DURATION
        .with_label_values(&[operation])
        .observe(seconds);
}

pub fn observe_time_to_readiness(kind: &str, seconds: f64) {
    TIME_TO_READINESS.with_label_values(&[kind]).observe(seconds);
}

pub fn observe_deletion_time(kind: &str, seconds: f64) {
    DELETION_TIME.with_label_values(&[kind]).observe(seconds);
}

pub fn observe_reconcile_delay(kind: &str, seconds: f64) {
    RECONCILE_DELAY.with_label_values(&[kind]).observe(seconds);
}

pub fn increment_async_operations(operation: &str) {
    ASYNC_OPERATIONS_TOTAL.with_label_values(&[operation]).inc();
}

pub fn increment_operation_errors(operation: &str) {
    OPERATION_ERRORS_TOTAL.with_label_values(&[operation]).inc();
}

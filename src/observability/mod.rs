//! # Observability Module
//!
//! Prometheus metrics for the controller runtime.

pub mod metrics;

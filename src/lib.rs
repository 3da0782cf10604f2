//! Terraform Controller Runtime Library
//!
//! This library provides the runtime reconciliation core that drives an
//! in-process Terraform provider to bring a cloud resource into the state
//! declared by a Kubernetes custom resource.
//!
//! The crate is consumed by a controller-runtime style manager: the manager
//! watches managed resources and hands each one to a [`controller::Connector`],
//! which produces an external client exposing Observe / Create / Update /
//! Delete. Everything below that seam - sensitive-parameter hydration,
//! external-name resolution, diff computation, provider invocation and the
//! per-resource operation trackers - lives here.

pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod provider;
pub mod resource;

// Re-export CRD types for convenience
pub use crd::*;

//! # Resource Layer
//!
//! Everything that is static, per-Kind knowledge about a managed resource:
//! the Terraformed facade, resource configuration, external-name strategies,
//! sensitive field handling, field paths, and late initialization.

pub mod config;
pub mod external_name;
pub mod fieldpath;
pub mod lateinit;
pub mod sensitive;
pub mod terraformed;

pub use config::{ConfigRegistry, OperationTimeouts, ResourceConfig, SensitiveConfig};
pub use external_name::{ExternalNameConfig, ExternalNameStrategy};
pub use fieldpath::FieldPath;
pub use sensitive::{SecretClient, SecretKeySelector, SecretReference};
pub use terraformed::Terraformed;

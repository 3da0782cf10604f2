//! # Controller Layer
//!
//! The runtime half of the crate: the Connect/Observe/Create/Update/Delete
//! state machine, its async wrapper, the per-UID operation trackers, secret
//! clients, connection-detail assembly, and the terraform setup seam.

pub mod async_client;
pub mod connection;
pub mod external_client;
pub mod secret;
pub mod setup;
pub mod workspace;

pub use async_client::{AsyncExternalClient, EventHandler, NoopEventHandler};
pub use connection::{build_connection_details, ConnectionDetails};
pub use external_client::{Connector, Creation, ExternalClient, ExternalClientError, Observation, Update};
pub use secret::{InMemorySecretClient, KubeSecretClient};
pub use setup::{StaticSetupFactory, TerraformSetup, TerraformSetupFactory};
pub use workspace::{OperationInProgressError, OperationTracker, OperationType, WorkspaceStore};

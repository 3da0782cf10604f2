//! # Constants
//!
//! Annotation keys, condition strings, and default timeouts shared across the
//! controller runtime.

/// Annotation carrying the cloud-side identifier of the managed resource.
pub const ANNOTATION_EXTERNAL_NAME: &str = "terraform.microscaler.io/external-name";

/// Annotation that suspends reconciliation for a managed resource.
pub const ANNOTATION_PAUSED: &str = "terraform.microscaler.io/paused";

/// Annotation stamped by the reconciler when an external Create failed after
/// the provider may already have allocated an identifier.
pub const ANNOTATION_EXTERNAL_CREATE_FAILED: &str =
    "terraform.microscaler.io/external-create-failed";

/// Prefix for connection-detail keys derived from observed attributes.
pub const CONNECTION_DETAILS_ATTRIBUTE_PREFIX: &str = "attribute.";

/// Default deadline for detached async operations when the resource
/// configuration does not override it.
pub const DEFAULT_ASYNC_OPERATION_TIMEOUT_SECS: u64 = 120;

/// Condition type reported on every managed resource.
pub const CONDITION_TYPE_READY: &str = "Ready";

/// Condition reasons used by the external client state machine.
pub const REASON_AVAILABLE: &str = "Available";
pub const REASON_CREATING: &str = "Creating";
pub const REASON_DELETING: &str = "Deleting";
pub const REASON_UNAVAILABLE: &str = "Unavailable";

/// Meta key under which per-operation timeouts are stamped into cached
/// Terraform state.
pub const STATE_META_TIMEOUTS: &str = "timeouts";

/// Meta key carrying the opaque framework private state blob.
pub const STATE_META_PRIVATE: &str = "private";

/// Meta key carrying the typed framework state as JSON, so flat attributes
/// can be rebuilt into the provider's dynamic value without schema guessing.
pub const STATE_META_RAW_STATE: &str = "raw_state";

/// Terraform attribute that uniquely identifies the external resource. An
/// empty value means the resource does not exist.
pub const ATTRIBUTE_ID: &str = "id";

/// Provider-specific attribute pair mirrored during Connect and scrubbed from
/// diffs.
pub const ATTRIBUTE_TAGS: &str = "tags";
pub const ATTRIBUTE_TAGS_ALL: &str = "tags_all";

//! # Managed Resource Status
//!
//! Condition types and constructors for tracking external-resource state.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::constants;

/// Status values a condition may take
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Condition represents a condition of a resource
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,
    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,
    /// Last transition time
    #[serde(default)]
    pub last_transition_time: Option<String>,
    /// Reason for the condition
    #[serde(default)]
    pub reason: Option<String>,
    /// Message describing the condition
    #[serde(default)]
    pub message: Option<String>,
}

impl Condition {
    fn ready(status: ConditionStatus, reason: &str, message: Option<String>) -> Self {
        Self {
            r#type: constants::CONDITION_TYPE_READY.to_string(),
            status,
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
            reason: Some(reason.to_string()),
            message,
        }
    }

    /// The external resource is observed and matches the desired state
    pub fn available() -> Self {
        Self::ready(ConditionStatus::True, constants::REASON_AVAILABLE, None)
    }

    /// A create operation has been issued and has not completed yet
    pub fn creating() -> Self {
        Self::ready(ConditionStatus::False, constants::REASON_CREATING, None)
    }

    /// A delete operation has been issued and has not completed yet
    pub fn deleting() -> Self {
        Self::ready(ConditionStatus::False, constants::REASON_DELETING, None)
    }

    /// The external resource exists but does not match the desired state
    pub fn unavailable(message: String) -> Self {
        Self::ready(
            ConditionStatus::False,
            constants::REASON_UNAVAILABLE,
            Some(message),
        )
    }
}

/// Find a condition by type
pub fn find_condition<'a>(conditions: &'a [Condition], r#type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == r#type)
}

/// Insert or replace a condition by type
///
/// The transition timestamp of the existing condition is preserved when the
/// status did not change, so repeated Observes do not churn the object.
pub fn upsert_condition(conditions: &mut Vec<Condition>, mut condition: Condition) {
    if let Some(existing) = conditions.iter_mut().find(|c| c.r#type == condition.r#type) {
        if existing.status == condition.status {
            condition.last_transition_time = existing.last_transition_time.clone();
        }
        *existing = condition;
    } else {
        conditions.push(condition);
    }
}

//! # Connection Details
//!
//! Assembles the opaque key/value map surfaced to consumers from the
//! observed attribute tree: sensitive attributes under `attribute.` keys,
//! named keys from the Terraformed mapping, and the per-Kind additional
//! details hook. Caller-supplied keys must never shadow an existing entry.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

use crate::resource::config::ResourceConfig;
use crate::resource::fieldpath::{FieldPath, FieldPathError};
use crate::resource::sensitive::{extract_sensitive_observation, SensitiveError};

/// Opaque connection data written to the managed resource's connection
/// secret
pub type ConnectionDetails = HashMap<String, Vec<u8>>;

/// Errors produced while assembling connection details
#[derive(Debug, Error)]
pub enum ConnectionDetailsError {
    #[error("connection details key {key:?} is already set and may not be shadowed")]
    KeyCollision { key: String },
    #[error(transparent)]
    Sensitive(#[from] SensitiveError),
    #[error(transparent)]
    FieldPath(#[from] FieldPathError),
    #[error("additional connection details hook failed: {0}")]
    Hook(#[source] anyhow::Error),
}

/// Build the connection details for an observed attribute tree
pub fn build_connection_details(
    attrs: &Value,
    mapping: &BTreeMap<String, String>,
    config: &ResourceConfig,
) -> Result<ConnectionDetails, ConnectionDetailsError> {
    let mut details =
        extract_sensitive_observation(attrs, &config.sensitive.observation_paths)?;

    // Named keys from the Terraformed mapping (tf path -> secret key).
    for (tf_path, key) in mapping {
        let parsed = FieldPath::parse(tf_path)?;
        for concrete in parsed.expand(attrs) {
            let Some(value) = concrete.get(attrs) else {
                continue;
            };
            let Value::String(s) = value else {
                return Err(SensitiveError::NotAString {
                    path: concrete.to_string(),
                }
                .into());
            };
            insert_unique(&mut details, key.clone(), s.clone().into_bytes())?;
        }
    }

    if let Some(hook) = &config.sensitive.additional_connection_details {
        let attrs_obj = attrs.as_object().cloned().unwrap_or_default();
        for (key, value) in hook(&attrs_obj).map_err(ConnectionDetailsError::Hook)? {
            insert_unique(&mut details, key, value)?;
        }
    }
    Ok(details)
}

fn insert_unique(
    details: &mut ConnectionDetails,
    key: String,
    value: Vec<u8>,
) -> Result<(), ConnectionDetailsError> {
    if details.contains_key(&key) {
        return Err(ConnectionDetailsError::KeyCollision { key });
    }
    details.insert(key, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::schema::ResourceSchema;
    use serde_json::json;
    use std::sync::Arc;

    fn config_with_paths(paths: &[&str]) -> ResourceConfig {
        let mut config = ResourceConfig::new("Instance", "aws_db_instance", ResourceSchema::default());
        config.sensitive.observation_paths =
            paths.iter().map(ToString::to_string).collect();
        config
    }

    #[test]
    fn test_attribute_keys_and_named_keys() {
        let config = config_with_paths(&["password"]);
        let attrs = json!({"password": "hunter2", "endpoint": "db.example.com"});
        let mapping = BTreeMap::from([("endpoint".to_string(), "host".to_string())]);
        let details = build_connection_details(&attrs, &mapping, &config).unwrap();
        assert_eq!(details["attribute.password"], b"hunter2".to_vec());
        assert_eq!(details["host"], b"db.example.com".to_vec());
    }

    #[test]
    fn test_hook_may_not_shadow_existing_key() {
        let mut config = config_with_paths(&["password"]);
        config.sensitive.additional_connection_details = Some(Arc::new(|_attrs| {
            Ok(HashMap::from([(
                "attribute.password".to_string(),
                b"shadow".to_vec(),
            )]))
        }));
        let attrs = json!({"password": "hunter2"});
        let err = build_connection_details(&attrs, &BTreeMap::new(), &config).unwrap_err();
        assert!(matches!(err, ConnectionDetailsError::KeyCollision { .. }));
    }

    #[test]
    fn test_hook_adds_fresh_keys() {
        let mut config = config_with_paths(&[]);
        config.sensitive.additional_connection_details = Some(Arc::new(|attrs| {
            let endpoint = attrs
                .get("endpoint")
                .and_then(|v| v.as_str())
                .unwrap_or_default();
            Ok(HashMap::from([(
                "uri".to_string(),
                format!("postgres://{endpoint}").into_bytes(),
            )]))
        }));
        let attrs = json!({"endpoint": "db.example.com"});
        let details = build_connection_details(&attrs, &BTreeMap::new(), &config).unwrap();
        assert_eq!(details["uri"], b"postgres://db.example.com".to_vec());
    }
}

//! # Sensitive Parameters
//!
//! Round-trips secret material between Kubernetes Secrets and Terraform
//! attribute trees.
//!
//! Going in, secret references declared on the managed resource are resolved
//! and their values written into the Terraform parameters. Coming out,
//! sensitive attributes of the observed state are extracted into connection
//! details under `attribute.`-prefixed keys.
//!
//! Secret keys must survive the trip back to field paths, so map keys that
//! contain dots are escaped with triple-dot segments:
//! `metadata.annotations[crossplane.io/external-name]` becomes
//! `metadata.annotations...crossplane.io/external-name...`.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::debug;

use crate::resource::fieldpath::{FieldPath, FieldPathError, Segment};

/// Reference to a whole Secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReference {
    pub name: String,
    pub namespace: String,
}

/// Reference to a single key of a Secret
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretKeySelector {
    pub reference: SecretReference,
    pub key: String,
}

/// Errors surfaced by secret stores
#[derive(Debug, Error)]
pub enum SecretError {
    #[error("cannot access secret {namespace}/{name}: {message}")]
    Access {
        namespace: String,
        name: String,
        message: String,
    },
}

/// Client for opaque secret data keyed by (namespace, name, key).
///
/// NotFound is modelled as `Ok(None)`: during hydration a missing secret is
/// tolerated and the parameter is emitted as an empty string.
#[async_trait]
pub trait SecretClient: Send + Sync {
    async fn get_value(&self, selector: &SecretKeySelector) -> Result<Option<Vec<u8>>, SecretError>;
    async fn get_data(
        &self,
        reference: &SecretReference,
    ) -> Result<Option<BTreeMap<String, Vec<u8>>>, SecretError>;
}

/// Errors produced while hydrating or extracting sensitive data
#[derive(Debug, Error)]
pub enum SensitiveError {
    #[error("cannot get string for field path {path}")]
    NotAString { path: String },
    #[error("secret selector at {path} is malformed: {reason}")]
    InvalidSelector { path: String, reason: String },
    #[error("wildcard counts differ between resource path {cr_path:?} and terraform path {tf_path:?}")]
    WildcardMismatch { cr_path: String, tf_path: String },
    #[error(transparent)]
    FieldPath(#[from] FieldPathError),
    #[error(transparent)]
    Secret(#[from] SecretError),
}

/// Encode a concrete field path as a connection-secret key.
///
/// Plain fields and indices join with `.`; a field containing reserved
/// characters is wrapped in triple dots without a joining separator.
pub fn field_path_to_secret_key(path: &FieldPath) -> String {
    let mut out = String::new();
    for (i, segment) in path.0.iter().enumerate() {
        match segment {
            Segment::Field(name) if name.contains('.') => {
                out.push_str("...");
                out.push_str(name);
                out.push_str("...");
            }
            Segment::Field(name) => {
                if i > 0 && !out.ends_with("...") {
                    out.push('.');
                }
                out.push_str(name);
            }
            Segment::Index(idx) => {
                if i > 0 && !out.ends_with("...") {
                    out.push('.');
                }
                out.push_str(&idx.to_string());
            }
            Segment::Wildcard => {
                // Wildcards never survive expansion; keep the key parseable
                // if one slips through.
                if i > 0 && !out.ends_with("...") {
                    out.push('.');
                }
                out.push('*');
            }
        }
    }
    out
}

/// Decode a connection-secret key back into a field path
pub fn secret_key_to_field_path(key: &str) -> Result<FieldPath, FieldPathError> {
    let mut segments = Vec::new();
    for (i, part) in key.split("...").enumerate() {
        if i % 2 == 1 {
            // Between triple dots: a verbatim map key.
            segments.push(Segment::Field(part.to_string()));
            continue;
        }
        for piece in part.split('.') {
            if piece.is_empty() {
                continue;
            }
            if let Ok(idx) = piece.parse::<usize>() {
                segments.push(Segment::Index(idx));
            } else if piece == "*" {
                segments.push(Segment::Wildcard);
            } else {
                segments.push(Segment::Field(piece.to_string()));
            }
        }
    }
    if segments.is_empty() {
        return Err(FieldPathError::Parse {
            path: key.to_string(),
            reason: "empty secret key".to_string(),
        });
    }
    Ok(FieldPath(segments))
}

/// Resolve secret references on the managed resource and write their values
/// into the Terraform parameters.
///
/// `mapping` pairs a resource field path (with wildcards) holding secret
/// selectors with the Terraform path receiving the value. Wildcards fan out
/// element by element, preserving positional alignment between the two trees.
/// An absent selector yields no write; a selector whose secret is missing
/// writes an empty string.
pub async fn hydrate_parameters(
    client: &dyn SecretClient,
    cr_params: &Value,
    default_namespace: &str,
    mapping: &BTreeMap<String, String>,
    into: &mut Map<String, Value>,
) -> Result<(), SensitiveError> {
    let mut target = Value::Object(std::mem::take(into));
    for (cr_path, tf_path) in mapping {
        let cr_parsed = FieldPath::parse(cr_path)?;
        let tf_parsed = FieldPath::parse(tf_path)?;
        let cr_wildcards = cr_parsed.0.iter().filter(|s| **s == Segment::Wildcard).count();
        let tf_wildcards = tf_parsed.0.iter().filter(|s| **s == Segment::Wildcard).count();
        if cr_wildcards != tf_wildcards {
            return Err(SensitiveError::WildcardMismatch {
                cr_path: cr_path.clone(),
                tf_path: tf_path.clone(),
            });
        }

        for concrete in cr_parsed.expand(cr_params) {
            let Some(selector_value) = concrete.get(cr_params) else {
                continue;
            };
            if selector_value.is_null() {
                continue;
            }
            let fillers = wildcard_fillers(&cr_parsed, &concrete);
            let target_path = substitute_wildcards(&tf_parsed, &fillers);
            match parse_selector(selector_value, default_namespace, &concrete.to_string())? {
                SelectorKind::Key(selector) => {
                    let value = client.get_value(&selector).await?.unwrap_or_else(|| {
                        debug!(
                            secret = %selector.reference.name,
                            key = %selector.key,
                            "sensitive secret not found, emitting empty value"
                        );
                        Vec::new()
                    });
                    target_path.set(
                        &mut target,
                        Value::String(String::from_utf8_lossy(&value).into_owned()),
                    )?;
                }
                SelectorKind::Whole(reference) => {
                    let Some(data) = client.get_data(&reference).await? else {
                        continue;
                    };
                    let mut entries = Map::new();
                    for (k, v) in data {
                        entries.insert(k, Value::String(String::from_utf8_lossy(&v).into_owned()));
                    }
                    target_path.set(&mut target, Value::Object(entries))?;
                }
            }
        }
    }
    if let Value::Object(map) = target {
        *into = map;
    }
    Ok(())
}

enum SelectorKind {
    Key(SecretKeySelector),
    Whole(SecretReference),
}

fn parse_selector(
    value: &Value,
    default_namespace: &str,
    at: &str,
) -> Result<SelectorKind, SensitiveError> {
    let obj = value
        .as_object()
        .ok_or_else(|| SensitiveError::InvalidSelector {
            path: at.to_string(),
            reason: "expected an object with name and key fields".to_string(),
        })?;
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| SensitiveError::InvalidSelector {
            path: at.to_string(),
            reason: "missing name".to_string(),
        })?;
    let namespace = obj
        .get("namespace")
        .and_then(Value::as_str)
        .unwrap_or(default_namespace);
    let reference = SecretReference {
        name: name.to_string(),
        namespace: namespace.to_string(),
    };
    match obj.get("key").and_then(Value::as_str) {
        Some(key) => Ok(SelectorKind::Key(SecretKeySelector {
            reference,
            key: key.to_string(),
        })),
        None => Ok(SelectorKind::Whole(reference)),
    }
}

/// Collect the concrete segments that replaced wildcards during expansion
fn wildcard_fillers(template: &FieldPath, concrete: &FieldPath) -> Vec<Segment> {
    template
        .0
        .iter()
        .zip(&concrete.0)
        .filter(|(t, _)| **t == Segment::Wildcard)
        .map(|(_, c)| c.clone())
        .collect()
}

/// Substitute wildcards in a path with the recorded fillers, in order
fn substitute_wildcards(path: &FieldPath, fillers: &[Segment]) -> FieldPath {
    let mut next = fillers.iter();
    FieldPath(
        path.0
            .iter()
            .map(|segment| match segment {
                Segment::Wildcard => next.next().cloned().unwrap_or(Segment::Wildcard),
                other => other.clone(),
            })
            .collect(),
    )
}

/// Extract sensitive attributes of the observed state into connection
/// details, keyed under the `attribute.` prefix.
///
/// Wildcards enumerate all elements of the node they land on. Every resolved
/// leaf must be a string; anything else is a configuration error.
pub fn extract_sensitive_observation(
    attrs: &Value,
    paths: &[String],
) -> Result<HashMap<String, Vec<u8>>, SensitiveError> {
    let mut out = HashMap::new();
    for path in paths {
        let parsed = FieldPath::parse(path)?;
        for concrete in parsed.expand(attrs) {
            let Some(value) = concrete.get(attrs) else {
                continue;
            };
            match value {
                Value::Null => {}
                Value::String(s) => {
                    let key = format!(
                        "{}{}",
                        crate::constants::CONNECTION_DETAILS_ATTRIBUTE_PREFIX,
                        field_path_to_secret_key(&concrete)
                    );
                    out.insert(key, s.clone().into_bytes());
                }
                _ => {
                    return Err(SensitiveError::NotAString {
                        path: concrete.to_string(),
                    })
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct FakeSecrets(BTreeMap<(String, String, String), Vec<u8>>);

    #[async_trait]
    impl SecretClient for FakeSecrets {
        async fn get_value(
            &self,
            selector: &SecretKeySelector,
        ) -> Result<Option<Vec<u8>>, SecretError> {
            Ok(self
                .0
                .get(&(
                    selector.reference.namespace.clone(),
                    selector.reference.name.clone(),
                    selector.key.clone(),
                ))
                .cloned())
        }

        async fn get_data(
            &self,
            reference: &SecretReference,
        ) -> Result<Option<BTreeMap<String, Vec<u8>>>, SecretError> {
            let entries: BTreeMap<String, Vec<u8>> = self
                .0
                .iter()
                .filter(|((ns, name, _), _)| {
                    *ns == reference.namespace && *name == reference.name
                })
                .map(|((_, _, key), v)| (key.clone(), v.clone()))
                .collect();
            if entries.is_empty() {
                Ok(None)
            } else {
                Ok(Some(entries))
            }
        }
    }

    fn db_passwords() -> FakeSecrets {
        FakeSecrets(BTreeMap::from([
            (
                ("default".to_string(), "db-passwords".to_string(), "admin".to_string()),
                b"foo".to_vec(),
            ),
            (
                (
                    "default".to_string(),
                    "db-passwords".to_string(),
                    "maintenance".to_string(),
                ),
                b"baz".to_vec(),
            ),
        ]))
    }

    #[test]
    fn test_dotted_map_key_round_trip() {
        let key = "metadata.annotations...crossplane.io/external-name...";
        let path = secret_key_to_field_path(key).unwrap();
        assert_eq!(
            path.to_string(),
            "metadata.annotations[crossplane.io/external-name]"
        );
        assert_eq!(field_path_to_secret_key(&path), key);
    }

    #[test]
    fn test_secret_key_round_trip_law() {
        for key in [
            "endpoint",
            "nodes.0.address",
            "metadata.annotations...crossplane.io/external-name...",
            "cluster...a.b.c...0.token",
        ] {
            let path = secret_key_to_field_path(key).unwrap();
            assert_eq!(field_path_to_secret_key(&path), key, "round trip of {key}");
        }
    }

    #[test]
    fn test_wildcard_sensitive_extraction() {
        let attrs = json!({
            "top_config_array": [
                {}, {},
                {"inner_config_array": [
                    {"bottom_level_secret": "A"},
                    {"bottom_level_secret": "B"}
                ]}
            ]
        });
        let details = extract_sensitive_observation(
            &attrs,
            &["top_config_array[2].inner_config_array[*].bottom_level_secret".to_string()],
        )
        .unwrap();
        assert_eq!(
            details
                .get("attribute.top_config_array.2.inner_config_array.0.bottom_level_secret")
                .map(Vec::as_slice),
            Some(b"A".as_slice())
        );
        assert_eq!(
            details
                .get("attribute.top_config_array.2.inner_config_array.1.bottom_level_secret")
                .map(Vec::as_slice),
            Some(b"B".as_slice())
        );
        assert_eq!(details.len(), 2);
    }

    #[test]
    fn test_extraction_rejects_non_string_leaf() {
        let attrs = json!({"port": 5432});
        let err = extract_sensitive_observation(&attrs, &["port".to_string()]).unwrap_err();
        assert_eq!(err.to_string(), "cannot get string for field path port");
    }

    #[tokio::test]
    async fn test_hydration_fans_out_preserving_positions() {
        let cr_params = json!({
            "databaseUsers": [
                {"name": "admin", "passwordSecretRef": {"name": "db-passwords", "key": "admin"}},
                {"name": "reporting"},
                {"name": "maintenance", "passwordSecretRef": {"name": "db-passwords", "key": "maintenance"}}
            ]
        });
        let mut tf_params = json!({
            "database_users": [
                {"name": "admin"},
                {"name": "reporting"},
                {"name": "maintenance"}
            ]
        })
        .as_object()
        .unwrap()
        .clone();

        let mapping = BTreeMap::from([(
            "databaseUsers[*].passwordSecretRef".to_string(),
            "database_users[*].password".to_string(),
        )]);
        hydrate_parameters(&db_passwords(), &cr_params, "default", &mapping, &mut tf_params)
            .await
            .unwrap();

        let users = tf_params["database_users"].as_array().unwrap();
        assert_eq!(users[0]["password"], json!("foo"));
        assert!(users[1].get("password").is_none());
        assert_eq!(users[2]["password"], json!("baz"));
    }

    #[tokio::test]
    async fn test_hydration_missing_secret_writes_empty_string() {
        let cr_params = json!({
            "passwordSecretRef": {"name": "absent", "key": "root"}
        });
        let mut tf_params = Map::new();
        let mapping =
            BTreeMap::from([("passwordSecretRef".to_string(), "password".to_string())]);
        hydrate_parameters(
            &FakeSecrets(BTreeMap::new()),
            &cr_params,
            "default",
            &mapping,
            &mut tf_params,
        )
        .await
        .unwrap();
        assert_eq!(tf_params.get("password"), Some(&json!("")));
    }

    #[tokio::test]
    async fn test_hydration_rejects_wildcard_mismatch() {
        let mapping =
            BTreeMap::from([("users[*].ref".to_string(), "password".to_string())]);
        let mut tf_params = Map::new();
        let err = hydrate_parameters(
            &FakeSecrets(BTreeMap::new()),
            &json!({}),
            "default",
            &mapping,
            &mut tf_params,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SensitiveError::WildcardMismatch { .. }));
    }

    #[tokio::test]
    async fn test_hydration_whole_secret_reference() {
        let cr_params = json!({
            "credentialsSecretRef": {"name": "db-passwords"}
        });
        let mut tf_params = Map::new();
        let mapping = BTreeMap::from([(
            "credentialsSecretRef".to_string(),
            "credentials".to_string(),
        )]);
        hydrate_parameters(&db_passwords(), &cr_params, "default", &mapping, &mut tf_params)
            .await
            .unwrap();
        assert_eq!(
            tf_params.get("credentials"),
            Some(&json!({"admin": "foo", "maintenance": "baz"}))
        );
    }
}

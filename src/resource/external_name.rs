//! # External Name Resolution
//!
//! Maps between the Kubernetes external-name annotation and the Terraform
//! resource ID. Five strategies cover the identifier shapes cloud APIs use:
//! client-chosen names, name-bearing parameters, server-generated IDs,
//! templated composite IDs, and fully custom conversions.

use crate::provider::state::InstanceState;
use crate::resource::fieldpath::FieldPath;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// Errors produced while resolving external names
#[derive(Debug, Error)]
pub enum ExternalNameError {
    #[error("template variable {variable:?} cannot be resolved")]
    TemplateVariableMissing { variable: String },
    #[error("template variable {variable:?} resolved to a non-scalar value")]
    TemplateVariableNotScalar { variable: String },
    #[error("id {id:?} does not match the identifier template {template:?}")]
    TemplateMismatch { id: String, template: String },
    #[error("invalid identifier template {template:?}: {reason}")]
    InvalidTemplate { template: String, reason: String },
    #[error("external name is required but not set")]
    MissingExternalName,
    #[error(transparent)]
    Custom(#[from] anyhow::Error),
}

/// Custom conversion from external name and parameters to a Terraform ID
pub type GetIdFn = Arc<
    dyn Fn(&str, &Map<String, Value>, &Map<String, Value>) -> anyhow::Result<String>
        + Send
        + Sync,
>;

/// Custom extraction of the external name from Terraform state
pub type GetExternalNameFn =
    Arc<dyn Fn(&InstanceState) -> anyhow::Result<Option<String>> + Send + Sync>;

/// Identifier strategy for a resource Kind
#[derive(Clone)]
pub enum ExternalNameStrategy {
    /// The external name is the resource's name field; the Terraform ID is
    /// the external name itself
    NameAsIdentifier,
    /// The Terraform ID is the external name, and the named parameter is
    /// stamped with it before provider calls
    ParameterAsIdentifier { field: String },
    /// The provider generates the ID; Observe adopts it into the annotation
    IdentifierFromProvider,
    /// The ID is rendered from a template over `{{ .externalName }}`,
    /// `{{ .parameters.* }}` and `{{ .setup.* }}`; the inverse matches the
    /// template's literal parts against the state ID
    TemplatedString {
        template: String,
        /// Parameter stamped with the external name, when the API carries a
        /// name field besides the composite ID
        name_field: Option<String>,
    },
    /// Caller-supplied conversion functions
    Custom {
        get_id: GetIdFn,
        get_external_name: GetExternalNameFn,
    },
}

impl std::fmt::Debug for ExternalNameStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NameAsIdentifier => write!(f, "NameAsIdentifier"),
            Self::ParameterAsIdentifier { field } => {
                write!(f, "ParameterAsIdentifier({field})")
            }
            Self::IdentifierFromProvider => write!(f, "IdentifierFromProvider"),
            Self::TemplatedString { template, .. } => write!(f, "TemplatedString({template})"),
            Self::Custom { .. } => write!(f, "Custom"),
        }
    }
}

/// External-name configuration of a resource Kind
#[derive(Debug, Clone)]
pub struct ExternalNameConfig {
    pub strategy: ExternalNameStrategy,
    /// Parameters that make up the identifier and must not be late-initialized
    pub identifier_fields: Vec<String>,
    /// Parameters removed from the Terraform configuration because the
    /// identifier carries them
    pub omitted_fields: Vec<String>,
}

impl ExternalNameConfig {
    pub fn name_as_identifier() -> Self {
        Self::with_strategy(ExternalNameStrategy::NameAsIdentifier)
    }

    pub fn parameter_as_identifier(field: impl Into<String>) -> Self {
        Self::with_strategy(ExternalNameStrategy::ParameterAsIdentifier {
            field: field.into(),
        })
    }

    pub fn identifier_from_provider() -> Self {
        Self::with_strategy(ExternalNameStrategy::IdentifierFromProvider)
    }

    pub fn templated_string(template: impl Into<String>) -> Self {
        Self::with_strategy(ExternalNameStrategy::TemplatedString {
            template: template.into(),
            name_field: None,
        })
    }

    pub fn custom(get_id: GetIdFn, get_external_name: GetExternalNameFn) -> Self {
        Self::with_strategy(ExternalNameStrategy::Custom {
            get_id,
            get_external_name,
        })
    }

    fn with_strategy(strategy: ExternalNameStrategy) -> Self {
        Self {
            strategy,
            identifier_fields: Vec::new(),
            omitted_fields: Vec::new(),
        }
    }

    /// Compute the Terraform ID for the given external name
    pub fn get_id(
        &self,
        external_name: &str,
        params: &Map<String, Value>,
        setup: &Map<String, Value>,
    ) -> Result<String, ExternalNameError> {
        match &self.strategy {
            ExternalNameStrategy::NameAsIdentifier
            | ExternalNameStrategy::ParameterAsIdentifier { .. } => {
                if external_name.is_empty() {
                    return Err(ExternalNameError::MissingExternalName);
                }
                Ok(external_name.to_string())
            }
            // The provider will assign the ID on create; before that the
            // external name (possibly empty) is the best identifier we have.
            ExternalNameStrategy::IdentifierFromProvider => Ok(external_name.to_string()),
            ExternalNameStrategy::TemplatedString { template, .. } => {
                render_template(template, external_name, params, setup)
            }
            ExternalNameStrategy::Custom { get_id, .. } => {
                Ok(get_id(external_name, params, setup)?)
            }
        }
    }

    /// Extract the external name from observed Terraform state.
    ///
    /// Returns None when the state carries no identity.
    pub fn get_external_name(
        &self,
        state: &InstanceState,
    ) -> Result<Option<String>, ExternalNameError> {
        if !state.exists() {
            return Ok(None);
        }
        match &self.strategy {
            ExternalNameStrategy::NameAsIdentifier
            | ExternalNameStrategy::ParameterAsIdentifier { .. }
            | ExternalNameStrategy::IdentifierFromProvider => Ok(Some(state.id.clone())),
            ExternalNameStrategy::TemplatedString { template, .. } => {
                extract_from_template(template, &state.id).map(Some)
            }
            ExternalNameStrategy::Custom {
                get_external_name, ..
            } => Ok(get_external_name(state)?),
        }
    }

    /// Stamp the identifier-bearing parameter with the external name
    pub fn set_identifier_argument(&self, params: &mut Map<String, Value>, external_name: &str) {
        match &self.strategy {
            ExternalNameStrategy::ParameterAsIdentifier { field } => {
                params.insert(field.clone(), Value::String(external_name.to_string()));
            }
            ExternalNameStrategy::TemplatedString {
                name_field: Some(field),
                ..
            } => {
                params.insert(field.clone(), Value::String(external_name.to_string()));
            }
            _ => {}
        }
    }
}

/// Matches `{{ .externalName }}`-style template variables
fn variable_regex() -> Regex {
    Regex::new(r"\{\{\s*\.([A-Za-z_][A-Za-z0-9_]*(?:\.[^{}\s]+)?)\s*\}\}")
        .expect("template variable regex is valid")
}

fn is_external_name_variable(variable: &str) -> bool {
    variable == "externalName" || variable == "external_name"
}

fn render_template(
    template: &str,
    external_name: &str,
    params: &Map<String, Value>,
    setup: &Map<String, Value>,
) -> Result<String, ExternalNameError> {
    let re = variable_regex();
    let mut out = String::new();
    let mut last = 0;
    for captures in re.captures_iter(template) {
        let whole = captures.get(0).expect("capture group 0 always exists");
        let variable = &captures[1];
        out.push_str(&template[last..whole.start()]);
        out.push_str(&resolve_variable(variable, external_name, params, setup)?);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Ok(out)
}

fn resolve_variable(
    variable: &str,
    external_name: &str,
    params: &Map<String, Value>,
    setup: &Map<String, Value>,
) -> Result<String, ExternalNameError> {
    if is_external_name_variable(variable) {
        if external_name.is_empty() {
            return Err(ExternalNameError::MissingExternalName);
        }
        return Ok(external_name.to_string());
    }
    let (root, rest) = variable
        .split_once('.')
        .ok_or_else(|| ExternalNameError::TemplateVariableMissing {
            variable: variable.to_string(),
        })?;
    let tree = match root {
        "parameters" => Value::Object(params.clone()),
        "setup" => Value::Object(setup.clone()),
        _ => {
            return Err(ExternalNameError::TemplateVariableMissing {
                variable: variable.to_string(),
            })
        }
    };
    let path = FieldPath::parse(rest).map_err(|_| ExternalNameError::TemplateVariableMissing {
        variable: variable.to_string(),
    })?;
    let value = path
        .get(&tree)
        .ok_or_else(|| ExternalNameError::TemplateVariableMissing {
            variable: variable.to_string(),
        })?;
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(ExternalNameError::TemplateVariableNotScalar {
            variable: variable.to_string(),
        }),
    }
}

/// Invert template expansion by escaping literal parts into a regex and
/// matching once against the ID. The first `externalName` occurrence becomes
/// the capture; other variables match any non-empty run.
fn extract_from_template(template: &str, id: &str) -> Result<String, ExternalNameError> {
    let re = variable_regex();
    let mut pattern = String::from("^");
    let mut last = 0;
    let mut captured = false;
    for captures in re.captures_iter(template) {
        let whole = captures.get(0).expect("capture group 0 always exists");
        let variable = &captures[1];
        pattern.push_str(&regex::escape(&template[last..whole.start()]));
        if is_external_name_variable(variable) && !captured {
            pattern.push_str("(?P<name>.+?)");
            captured = true;
        } else {
            pattern.push_str(".+?");
        }
        last = whole.end();
    }
    pattern.push_str(&regex::escape(&template[last..]));
    pattern.push('$');

    let matcher = Regex::new(&pattern).map_err(|e| ExternalNameError::InvalidTemplate {
        template: template.to_string(),
        reason: e.to_string(),
    })?;
    let Some(captures) = matcher.captures(id) else {
        return Err(ExternalNameError::TemplateMismatch {
            id: id.to_string(),
            template: template.to_string(),
        });
    };
    if captured {
        Ok(captures["name"].to_string())
    } else {
        // No externalName variable: the whole ID is the identity.
        Ok(id.to_string())
    }
}

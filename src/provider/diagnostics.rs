//! # Provider Diagnostics
//!
//! Diagnostics returned by in-process Terraform providers. Fatal diagnostics
//! are joined into a single error per call; warnings are logged and dropped.

use std::fmt;
use thiserror::Error;
use tracing::warn;

/// Severity of a single diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
}

/// One diagnostic emitted by a provider call
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    pub summary: String,
    pub detail: String,
    /// Attribute path the diagnostic refers to, verbatim from the provider
    pub attribute_path: Option<String>,
}

impl Diagnostic {
    pub fn error(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            summary: summary.into(),
            detail: detail.into(),
            attribute_path: None,
        }
    }

    pub fn warning(summary: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            summary: summary.into(),
            detail: detail.into(),
            attribute_path: None,
        }
    }

    pub fn with_attribute_path(mut self, path: impl Into<String>) -> Self {
        self.attribute_path = Some(path.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary)?;
        if !self.detail.is_empty() {
            write!(f, ": {}", self.detail)?;
        }
        if let Some(path) = &self.attribute_path {
            write!(f, " (at {path})")?;
        }
        Ok(())
    }
}

/// Collection of diagnostics from one provider call
#[derive(Debug, Clone, Default)]
pub struct Diagnostics(pub Vec<Diagnostic>);

impl Diagnostics {
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    pub fn has_errors(&self) -> bool {
        self.0.iter().any(|d| d.severity == Severity::Error)
    }

    /// Log warnings and fold fatal diagnostics into a single error.
    ///
    /// `operation` names the provider call for log and error context.
    pub fn into_result(self, operation: &str) -> Result<(), DiagnosticsError> {
        let mut errors = Vec::new();
        for diagnostic in self.0 {
            match diagnostic.severity {
                Severity::Warning => {
                    warn!(operation, "provider warning: {diagnostic}");
                }
                Severity::Error => errors.push(diagnostic.to_string()),
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(DiagnosticsError {
                operation: operation.to_string(),
                message: errors.join("; "),
            })
        }
    }
}

/// Fatal provider diagnostics joined into one error
#[derive(Debug, Error)]
#[error("terraform provider {operation} failed: {message}")]
pub struct DiagnosticsError {
    pub operation: String,
    pub message: String,
}

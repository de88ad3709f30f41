//! Diagnostics returned to the engine.
//!
//! Every recoverable problem ends up as a [`Diagnostic`]: type errors, failed
//! validation, callback errors, deferral violations. Attribute-scoped problems
//! carry the structural [`AttributePath`] of the offending value.

use crate::error::ProviderError;
use crate::path::AttributePath;
use serde::{Deserialize, Serialize};

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    /// An error that prevents the operation from completing.
    Error,
    /// A warning that doesn't prevent the operation but should be addressed.
    Warning,
}

/// A diagnostic message from the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// The severity of the diagnostic.
    pub severity: DiagnosticSeverity,
    /// A short summary of the issue.
    pub summary: String,
    /// A detailed description of the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// The attribute path where the issue occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<AttributePath>,
}

impl Diagnostic {
    /// Create an error diagnostic.
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Create a warning diagnostic.
    pub fn warning(summary: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            summary: summary.into(),
            detail: None,
            attribute: None,
        }
    }

    /// Add detail to this diagnostic.
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Set the attribute path for this diagnostic. The root path leaves the
    /// diagnostic unattached.
    pub fn with_attribute(mut self, attribute: impl Into<AttributePath>) -> Self {
        let path = attribute.into();
        self.attribute = if path.is_empty() { None } else { Some(path) };
        self
    }

    /// True for error severity.
    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }
}

impl From<ProviderError> for Diagnostic {
    fn from(err: ProviderError) -> Self {
        let summary = err.summary();
        let diag = Diagnostic::error(summary).with_detail(err.message());
        match err.attribute_path() {
            Some(path) => diag.with_attribute(path),
            None => diag,
        }
    }
}

/// True if any diagnostic is an error.
pub fn has_errors(diagnostics: &[Diagnostic]) -> bool {
    diagnostics.iter().any(Diagnostic::is_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::TypeError;

    #[test]
    fn test_diagnostic() {
        let err = Diagnostic::error("Invalid configuration")
            .with_detail("The value must be positive")
            .with_attribute("count");

        assert_eq!(err.severity, DiagnosticSeverity::Error);
        assert_eq!(err.summary, "Invalid configuration");
        assert_eq!(err.detail, Some("The value must be positive".to_string()));
        assert_eq!(err.attribute, Some(AttributePath::parse("count")));
    }

    #[test]
    fn test_root_attribute_is_unattached() {
        let diag = Diagnostic::warning("careful").with_attribute(AttributePath::root());
        assert!(diag.attribute.is_none());
        assert!(!diag.is_error());
    }

    #[test]
    fn test_from_provider_error_keeps_path() {
        let err = ProviderError::from(TypeError::new(
            AttributePath::parse("rules.0.port"),
            "number required, got string",
        ));
        let diag = Diagnostic::from(err);
        assert!(diag.is_error());
        assert_eq!(diag.attribute.as_ref().map(|p| p.to_string()), Some("rules.0.port".to_string()));
        assert!(has_errors(&[diag]));
    }
}

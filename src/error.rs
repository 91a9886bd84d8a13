use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::template::TemplateError;

/// crudify errors
#[derive(Error, Debug)]
pub enum CrudifyError {
    #[error("Validation failed for '{target}': {message}")]
    Validation { target: String, message: String },

    #[error(
        "Foreign key '{table}.{column}' references '{referenced_table}.{referenced_column}', which is not in the schema snapshot"
    )]
    UnresolvedForeignKey {
        table: String,
        column: String,
        referenced_table: String,
        referenced_column: String,
    },

    #[error("Artifact '{path}' already exists and overwrite is disabled")]
    ArtifactExists { path: String },

    #[error("Template '{template}' failed to resolve: {source}")]
    TemplateResolution {
        template: String,
        #[source]
        source: TemplateError,
    },

    #[error("Failed to connect to database: {0}")]
    Connection(String),

    #[error("Failed to introspect schema '{schema}': {message}")]
    Introspection { schema: String, message: String },

    #[error("Malformed generation request: {0}")]
    Request(#[from] serde_json::Error),

    #[error("Failed to write output: {0}")]
    Output(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Generation task did not complete: {0}")]
    Task(String),

    #[error("Failed to render report: {0}")]
    Report(#[from] minijinja::Error),
}

impl CrudifyError {
    pub fn validation(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            target: target.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::UnresolvedForeignKey { .. } => ErrorKind::UnresolvedForeignKey,
            Self::ArtifactExists { .. } => ErrorKind::ArtifactExists,
            Self::TemplateResolution { .. } => ErrorKind::TemplateResolution,
            Self::Connection(_) | Self::Introspection { .. } => ErrorKind::Introspection,
            Self::Request(_) | Self::Config(_) => ErrorKind::Configuration,
            Self::Output(_) | Self::Report(_) => ErrorKind::Output,
            Self::Task(_) => ErrorKind::Task,
        }
    }
}

/// Operator-facing error category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    UnresolvedForeignKey,
    ArtifactExists,
    TemplateResolution,
    Introspection,
    Configuration,
    Output,
    Task,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::UnresolvedForeignKey => "UnresolvedForeignKeyError",
            Self::ArtifactExists => "ArtifactExistsError",
            Self::TemplateResolution => "TemplateResolutionError",
            Self::Introspection => "IntrospectionError",
            Self::Configuration => "ConfigurationError",
            Self::Output => "OutputError",
            Self::Task => "TaskError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_labels() {
        let err = CrudifyError::ArtifactExists {
            path: "backend/crm/invoices.get.endpoint.yaml".to_string(),
        };
        assert_eq!(err.kind(), ErrorKind::ArtifactExists);
        assert_eq!(err.kind().to_string(), "ArtifactExistsError");
    }

    #[test]
    fn test_template_error_is_source() {
        let err = CrudifyError::TemplateResolution {
            template: "endpoint.get".to_string(),
            source: TemplateError::UnresolvedScalar {
                name: "table".to_string(),
                line: 3,
            },
        };
        assert_eq!(err.kind(), ErrorKind::TemplateResolution);
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().contains("endpoint.get"));
    }
}

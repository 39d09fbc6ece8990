//! Error types for the migration engine.

use serde_json::Value;
use thiserror::Error;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Mapping failed validation against the provider schemas.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A single field transform failed for one artifact.
    #[error(transparent)]
    Field(#[from] FieldError),

    /// Retryable provider failure (timeout, rate limit, 5xx-class error).
    #[error("Transient provider error: {0}")]
    Transient(String),

    /// Non-retryable failure (auth, missing artifact, exhausted retries).
    #[error("Fatal error: {0}")]
    Fatal(String),

    /// Snapshot file error
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Config hash mismatch on resume
    #[error("Config has changed since the snapshot was taken - cannot resume")]
    ConfigChanged,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled
    #[error("Migration cancelled")]
    Cancelled,
}

/// How the retry policy treats a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying with backoff.
    Transient,
    /// Deterministic; retrying wastes quota.
    NeverRetry,
    /// Not retryable; escalated to the error-handling strategy.
    Fatal,
}

impl MigrateError {
    /// Create a Transient error.
    pub fn transient(message: impl Into<String>) -> Self {
        MigrateError::Transient(message.into())
    }

    /// Create a Fatal error.
    pub fn fatal(message: impl Into<String>) -> Self {
        MigrateError::Fatal(message.into())
    }

    /// Classify this error for the retry policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            MigrateError::Transient(_) => ErrorClass::Transient,
            MigrateError::Validation(_) | MigrateError::Field(_) => ErrorClass::NeverRetry,
            _ => ErrorClass::Fatal,
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Mapping validation failure, detected before any run starts.
///
/// Each variant is a distinct reason so callers can report precisely
/// which rule the mapping broke.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A mapping references a source field the source schema lacks.
    #[error("Mapping references unknown source field '{0}'")]
    UnknownSourceField(String),

    /// A mapping references a target field the target schema lacks.
    #[error("Mapping references unknown target field '{0}'")]
    UnknownTargetField(String),

    /// Two mappings write the same target field.
    #[error("Duplicate mapping for target field '{0}'")]
    DuplicateTarget(String),

    /// A required target field has neither a mapping nor a default value.
    #[error("Required target field '{0}' has no mapping and no default value")]
    MissingRequiredTarget(String),

    /// A value-map output or default value falls outside the target
    /// field's allowed values.
    #[error("Value '{value}' is not allowed for target field '{field}'")]
    ValueNotAllowed { field: String, value: String },

    /// A custom transformation name is not registered.
    #[error("Unknown transformation '{0}'")]
    UnknownTransformation(String),
}

/// A single field transform failure for one artifact.
///
/// Artifact-level: contributes to the failed count but never aborts the
/// batch, and is never retried.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Field transform failed for artifact {artifact_id} ({source_id} -> {target_id}): {reason}")]
pub struct FieldError {
    /// Artifact being transformed.
    pub artifact_id: String,
    /// Source field id.
    pub source_id: String,
    /// Target field id.
    pub target_id: String,
    /// The offending source value.
    pub value: Value,
    /// Human-readable reason.
    pub reason: String,
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            MigrateError::transient("rate limited").class(),
            ErrorClass::Transient
        );
        assert_eq!(MigrateError::fatal("auth").class(), ErrorClass::Fatal);
        assert_eq!(
            MigrateError::from(ValidationError::DuplicateTarget("state".into())).class(),
            ErrorClass::NeverRetry
        );
        let field_err = FieldError {
            artifact_id: "TC-1".into(),
            source_id: "status".into(),
            target_id: "state".into(),
            value: Value::String("Closed".into()),
            reason: "no table entry".into(),
        };
        assert_eq!(MigrateError::from(field_err).class(), ErrorClass::NeverRetry);
    }

    #[test]
    fn test_format_detailed_includes_message() {
        let err = MigrateError::Config("batch_size must be at least 1".into());
        let detailed = err.format_detailed();
        assert!(detailed.contains("batch_size must be at least 1"));
    }
}

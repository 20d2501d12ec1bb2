//! Domain-level error taxonomy for topology definitions.

use std::fmt;

/// Category of a definition-time validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationErrorKind {
    /// Missing required field.
    MissingField,
    /// Invalid value for a field.
    InvalidValue,
    /// Duplicate stage, action or resource name.
    DuplicateName,
    /// Artifact produced by more than one action.
    DuplicateProducer,
    /// Artifact consumed before (or without) being produced.
    UnresolvedArtifact,
    /// Artifact handoffs form a cycle.
    CycleDetected,
    /// Stage or run-order placement breaks the sequencing rules.
    InvalidOrdering,
    /// Reference to an undeclared project, deployment group or topic.
    InvalidReference,
    /// Event pattern or message template the provider would reject.
    MalformedPattern,
}

impl fmt::Display for ValidationErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::MissingField => "MISSING_FIELD",
            Self::InvalidValue => "INVALID_VALUE",
            Self::DuplicateName => "DUPLICATE_NAME",
            Self::DuplicateProducer => "DUPLICATE_PRODUCER",
            Self::UnresolvedArtifact => "UNRESOLVED_ARTIFACT",
            Self::CycleDetected => "CYCLE_DETECTED",
            Self::InvalidOrdering => "INVALID_ORDERING",
            Self::InvalidReference => "INVALID_REFERENCE",
            Self::MalformedPattern => "MALFORMED_PATTERN",
        };
        f.write_str(s)
    }
}

/// A single validation failure with the location it was found at,
/// e.g. `stages[Deploy-Production].actions[ABlueGreen-deployECS]`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("[{kind}] {location}: {message}")]
pub struct ValidationError {
    pub kind: ValidationErrorKind,
    pub location: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(
        kind: ValidationErrorKind,
        location: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            location: location.into(),
            message: message.into(),
        }
    }

    pub fn missing_field(location: impl Into<String>, field: &str) -> Self {
        Self::new(
            ValidationErrorKind::MissingField,
            location,
            format!("missing required field '{}'", field),
        )
    }

    pub fn invalid_value(location: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ValidationErrorKind::InvalidValue, location, message)
    }

    pub fn duplicate_name(location: impl Into<String>, name: &str) -> Self {
        Self::new(
            ValidationErrorKind::DuplicateName,
            location,
            format!("duplicate name '{}'", name),
        )
    }

    pub fn invalid_reference(location: impl Into<String>, what: &str, name: &str) -> Self {
        Self::new(
            ValidationErrorKind::InvalidReference,
            location,
            format!("reference to undeclared {} '{}'", what, name),
        )
    }
}

/// Topology domain errors.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("duplicate stage: {0}")]
    DuplicateStage(String),

    #[error("topology failed validation with {} error(s)", .0.len())]
    Invalid(Vec<ValidationError>),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing environment variable: {0}")]
    MissingEnv(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for topology domain operations.
pub type Result<T> = std::result::Result<T, TopologyError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::duplicate_name("stages[Source]", "Source");
        assert_eq!(
            err.to_string(),
            "[DUPLICATE_NAME] stages[Source]: duplicate name 'Source'"
        );
    }

    #[test]
    fn test_invalid_reports_count() {
        let err = TopologyError::Invalid(vec![
            ValidationError::missing_field("pipeline", "name"),
            ValidationError::invalid_value("stages", "empty"),
        ]);
        assert!(err.to_string().contains("2 error(s)"));
    }

    #[test]
    fn test_missing_env_error() {
        let err = TopologyError::MissingEnv("CDK_DEFAULT_REGION".to_string());
        assert!(err.to_string().contains("CDK_DEFAULT_REGION"));
    }
}

// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for Corral operations
#[derive(Error, Debug, Diagnostic)]
pub enum CorralError {
    /// Malformed queue/object key
    #[error("Invalid object key: {key}")]
    #[diagnostic(
        code(corral::invalid_key),
        help("Keys have the form 'namespace/name' or 'name' for cluster-scoped objects")
    )]
    InvalidKey {
        #[allow(unused)]
        key: String,
    },

    /// Resource is missing a field the controller relies on
    #[error("Invalid resource: {reason}")]
    #[diagnostic(code(corral::invalid_resource), help("{suggestion}"))]
    InvalidResource {
        #[allow(unused)]
        reason: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(corral::serialization_error),
        help("Ensure the resource format is valid JSON or YAML")
    )]
    SerializationError {
        #[allow(unused)]
        message: String,
        #[source]
        #[allow(unused)]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for Corral core operations
pub type Result<T> = std::result::Result<T, CorralError>;

impl CorralError {
    /// Create an InvalidKey error
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }

    /// Create an InvalidResource error
    pub fn invalid_resource(reason: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidResource {
            reason: reason.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a SerializationError
    pub fn serialization_error(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = CorralError::invalid_key("a/b/c");
        assert!(matches!(err, CorralError::InvalidKey { .. }));
        assert_eq!(err.to_string(), "Invalid object key: a/b/c");

        let err = CorralError::invalid_resource("Replica has no name", "Set metadata.name");
        assert!(matches!(err, CorralError::InvalidResource { .. }));
    }
}

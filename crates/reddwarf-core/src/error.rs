// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Core error type for Reddwarf operations
#[derive(Error, Debug, Diagnostic)]
pub enum ReddwarfError {
    /// A resource quantity string could not be parsed
    #[error("Invalid quantity '{value}': {reason}")]
    #[diagnostic(
        code(reddwarf::invalid_quantity),
        help("Use Kubernetes quantity notation such as '500m', '2', '128Mi' or '1Gi'")
    )]
    InvalidQuantity {
        #[allow(unused)]
        value: String,
        #[allow(unused)]
        reason: String,
    },

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(reddwarf::serialization_error),
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

/// Result type alias for Reddwarf operations
pub type Result<T> = std::result::Result<T, ReddwarfError>;

impl ReddwarfError {
    /// Create an InvalidQuantity error
    pub fn invalid_quantity(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidQuantity {
            value: value.into(),
            reason: reason.into(),
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
        let err = ReddwarfError::invalid_quantity("12Q", "unknown suffix");
        assert!(matches!(err, ReddwarfError::InvalidQuantity { .. }));
        assert_eq!(err.to_string(), "Invalid quantity '12Q': unknown suffix");

        let err = ReddwarfError::serialization_error("bad document", None);
        assert_eq!(err.to_string(), "Serialization error: bad document");
    }
}

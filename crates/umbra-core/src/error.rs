use miette::Diagnostic;
use thiserror::Error;

/// Core error type for umbra operations
#[derive(Error, Debug, Diagnostic)]
pub enum CoreError {
    /// Malformed object key
    #[error("Invalid object key: {key}")]
    #[diagnostic(
        code(umbra::invalid_key),
        help("Object keys take the form 'namespace/name'")
    )]
    InvalidKey { key: String },

    /// Object is missing required identity metadata
    #[error("Object has no name")]
    #[diagnostic(
        code(umbra::unnamed_object),
        help("Every intent object must carry metadata.name")
    )]
    UnnamedObject,

    /// Serialization error
    #[error("Serialization error: {message}")]
    #[diagnostic(
        code(umbra::serialization_error),
        help("Ensure the object wire format is valid JSON")
    )]
    SerializationError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for umbra core operations
pub type Result<T> = std::result::Result<T, CoreError>;

impl CoreError {
    /// Create an InvalidKey error
    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
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
        let err = CoreError::invalid_key("no-slash");
        assert!(matches!(err, CoreError::InvalidKey { .. }));
        assert_eq!(err.to_string(), "Invalid object key: no-slash");
    }
}

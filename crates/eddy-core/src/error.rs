//! Error types for Eddy
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for Eddy core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Eddy core error types
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Invalid instance ID: {id}, reason: {reason}")]
    InvalidInstanceId { id: String, reason: String },

    #[error("Invalid instance {id}: field {field}, reason: {reason}")]
    InvalidInstance {
        id: String,
        field: String,
        reason: String,
    },

    #[error("Invalid status: {value}")]
    InvalidStatus { value: String },

    #[error("Delta for {delta_id} cannot be applied to instance {instance_id}")]
    DeltaMismatch {
        delta_id: String,
        instance_id: String,
    },

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {message}")]
    Internal { message: String },

    #[error("Serialization failed: {reason}")]
    SerializationFailed { reason: String },

    #[error("Deserialization failed: {reason}")]
    DeserializationFailed { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an invalid instance error
    pub fn invalid_instance(
        id: impl Into<String>,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidInstance {
            id: id.into(),
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error is retriable
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            Self::DeserializationFailed {
                reason: err.to_string(),
            }
        } else {
            Self::SerializationFailed {
                reason: err.to_string(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_instance("i-1", "app", "must not be empty");
        assert!(err.to_string().contains("i-1"));
        assert!(err.to_string().contains("app"));
    }

    #[test]
    fn test_error_is_retriable() {
        assert!(Error::internal("flaky").is_retriable());
        assert!(!Error::InvalidStatus {
            value: "SIDEWAYS".into()
        }
        .is_retriable());
    }

    #[test]
    fn test_json_error_conversion() {
        let err: Error = serde_json::from_str::<u32>("not json").unwrap_err().into();
        assert!(matches!(err, Error::DeserializationFailed { .. }));
    }
}

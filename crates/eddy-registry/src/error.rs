//! Registry error types
//!
//! TigerStyle: Explicit error variants with context.
//!
//! Absence of an instance is not an error: it is reported through
//! [`Outcome::NotFound`](crate::registry::Outcome).

use thiserror::Error;

/// Registry-specific errors
#[derive(Error, Debug)]
pub enum RegistryError {
    /// The incoming record failed validation
    #[error("invalid instance: {0}")]
    InvalidInstance(#[from] eddy_core::Error),

    /// The registry holds the maximum number of instances
    #[error("registry full: {count} instances, limit {limit}")]
    CapacityExceeded { count: usize, limit: usize },

    /// The app named in a request does not own the instance
    #[error("instance {id} belongs to app {actual}, not {requested}")]
    AppMismatch {
        id: String,
        requested: String,
        actual: String,
    },

    /// A subscription stream ended while its interest was still active
    #[error("upstream for interest {interest} completed while subscribed")]
    UpstreamCompleted { interest: String },

    /// A subscriber fell behind the change stream and lost notifications
    #[error("subscriber for interest {interest} lagged by {skipped} notifications")]
    SubscriberLagged { interest: String, skipped: u64 },

    /// The registry is shutting down
    #[error("registry is shutting down")]
    ShuttingDown,

    /// Internal registry error
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl RegistryError {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an upstream-completed error for `interest`
    pub fn upstream_completed(interest: impl std::fmt::Debug) -> Self {
        Self::UpstreamCompleted {
            interest: format!("{:?}", interest),
        }
    }

    /// Check if this error indicates a retriable condition
    ///
    /// A lagged or completed subscription can be re-established.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::UpstreamCompleted { .. } | Self::SubscriberLagged { .. }
        )
    }
}

/// Result type for registry operations
pub type RegistryResult<T> = std::result::Result<T, RegistryError>;

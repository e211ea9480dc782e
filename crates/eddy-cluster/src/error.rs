//! Replication error types
//!
//! TigerStyle: Explicit error variants with context.

use eddy_core::HttpError;
use eddy_registry::RegistryError;
use thiserror::Error;

/// Peer replication errors
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// Transport-level failure talking to a peer
    #[error("peer {peer} request failed: {source}")]
    Http {
        peer: String,
        #[source]
        source: HttpError,
    },

    /// Peer answered 503
    #[error("peer {peer} is busy (503)")]
    ServerBusy { peer: String },

    /// Peer answered with a 5xx other than 503
    #[error("peer {peer} failed with status {status}")]
    ServerError { peer: String, status: u16 },

    /// Peer rejected the request
    #[error("peer {peer} rejected request with status {status}")]
    Rejected { peer: String, status: u16 },

    /// A followed redirect redirected again
    #[error("peer {peer} redirected twice (second hop to {location})")]
    RedirectLoop { peer: String, location: String },

    /// Redirect without a usable target
    #[error("peer {peer} sent an invalid redirect: {reason}")]
    InvalidRedirect { peer: String, reason: String },

    /// Response list does not line up with the request list
    #[error("peer {peer} answered {received} items for a batch of {sent}")]
    ResponseMismatch {
        peer: String,
        sent: usize,
        received: usize,
    },

    /// Per-peer queue is full
    #[error("replication queue for {peer} is full ({limit} items)")]
    QueueFull { peer: String, limit: usize },

    /// Peer node has shut down
    #[error("replication to {peer} has shut down")]
    ShuttingDown { peer: String },

    /// Malformed replication item
    #[error("invalid replication item {id}: {reason}")]
    InvalidItem { id: String, reason: String },

    /// Body could not be encoded or decoded
    #[error("serialization failed: {reason}")]
    Serialization { reason: String },

    /// HTTP client could not be built
    #[error("http client setup failed: {reason}")]
    ClientSetup { reason: String },

    /// Local registry error
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl ReplicationError {
    /// Create an HTTP error for `peer`
    pub fn http(peer: impl Into<String>, source: HttpError) -> Self {
        Self::Http {
            peer: peer.into(),
            source,
        }
    }

    /// Map a non-success HTTP status to an error
    pub fn from_status(peer: impl Into<String>, status: u16) -> Self {
        let peer = peer.into();
        match status {
            503 => Self::ServerBusy { peer },
            500..=599 => Self::ServerError { peer, status },
            _ => Self::Rejected { peer, status },
        }
    }

    /// Create an invalid item error
    pub fn invalid_item(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidItem {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Whether the same batch may succeed after a backoff delay
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Http { source, .. } => source.is_retriable(),
            Self::ServerBusy { .. } | Self::ServerError { .. } => true,
            Self::Registry(e) => e.is_retriable(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for ReplicationError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            reason: err.to_string(),
        }
    }
}

/// Result type for replication operations
pub type ReplicationResult<T> = Result<T, ReplicationError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            ReplicationError::from_status("b", 503),
            ReplicationError::ServerBusy { .. }
        ));
        assert!(matches!(
            ReplicationError::from_status("b", 502),
            ReplicationError::ServerError { status: 502, .. }
        ));
        assert!(matches!(
            ReplicationError::from_status("b", 400),
            ReplicationError::Rejected { status: 400, .. }
        ));
    }

    #[test]
    fn test_retriable() {
        let timeout = ReplicationError::http("b", HttpError::Timeout { timeout_ms: 10 });
        assert!(timeout.is_retriable());
        assert!(ReplicationError::from_status("b", 500).is_retriable());
        assert!(!ReplicationError::from_status("b", 404).is_retriable());
        assert!(!ReplicationError::RedirectLoop {
            peer: "b".into(),
            location: "http://c".into()
        }
        .is_retriable());
    }

    #[test]
    fn test_error_display() {
        let err = ReplicationError::ResponseMismatch {
            peer: "node-b".into(),
            sent: 3,
            received: 2,
        };
        assert_eq!(
            err.to_string(),
            "peer node-b answered 2 items for a batch of 3"
        );
    }
}

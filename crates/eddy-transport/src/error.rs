//! Transport error types
//!
//! TigerStyle: Explicit error variants with context.

use crate::message::{MessageKind, ProtocolType};
use thiserror::Error;

/// Transport-specific errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// The connection is shut down or the peer went away
    #[error("connection {name} is closed")]
    ConnectionClosed { name: String },

    /// No acknowledgement arrived before the deadline
    #[error("acknowledgement on {name} timed out after {timeout_ms}ms")]
    AckTimeout { name: String, timeout_ms: u64 },

    /// Too many sends are awaiting acknowledgement
    #[error("{count} acknowledgements pending, limit {limit}")]
    TooManyPending { count: usize, limit: usize },

    /// The peer broke the protocol
    #[error("protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    /// A message kind was used on a protocol that does not carry it
    #[error("{kind} is not valid on the {protocol} protocol")]
    InvalidForProtocol {
        kind: MessageKind,
        protocol: ProtocolType,
    },

    /// A frame exceeded the size limit
    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// A frame body could not be encoded or decoded
    #[error("codec error: {reason}")]
    Codec { reason: String },

    /// Socket error
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Create a connection closed error
    pub fn closed(name: impl Into<String>) -> Self {
        Self::ConnectionClosed { name: name.into() }
    }

    /// Create a protocol violation error
    pub fn protocol_violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            reason: reason.into(),
        }
    }

    /// Create a codec error
    pub fn codec(reason: impl Into<String>) -> Self {
        Self::Codec {
            reason: reason.into(),
        }
    }

    /// Check if this error is retriable
    ///
    /// Broken or timed-out connections can be re-established; protocol and
    /// codec errors repeat on a new connection.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed { .. } | Self::AckTimeout { .. } | Self::Io(_)
        )
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::codec(err.to_string())
    }
}

/// Result type for transport operations
pub type TransportResult<T> = std::result::Result<T, TransportError>;

//! Channel error types
//!
//! TigerStyle: Explicit error variants with context.

use crate::state::ChannelState;
use eddy_registry::RegistryError;
use eddy_transport::{MessageKind, TransportError};
use thiserror::Error;

/// Channel-specific errors
#[derive(Error, Debug)]
pub enum ChannelError {
    /// A message arrived that the channel does not accept in its current state
    #[error("channel {channel}: unexpected {kind} message: {reason}")]
    UnexpectedMessage {
        channel: String,
        kind: MessageKind,
        reason: String,
    },

    /// The channel is closed
    #[error("channel {channel} is closed")]
    Closed { channel: String },

    /// A state transition the state machine does not allow
    #[error("invalid channel transition from {from:?} to {to:?}")]
    InvalidTransition { from: ChannelState, to: ChannelState },

    /// The peer stopped answering heartbeats
    #[error("channel {channel}: {missed} heartbeats missed")]
    HeartbeatExpired { channel: String, missed: i64 },

    /// The reconnect wrapper gave up
    #[error("reconnect wrapper closed: {reason}")]
    RetryExhausted { reason: String },

    /// Transport failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Registry failure while applying a message
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl ChannelError {
    /// Create an unexpected-message error
    pub fn unexpected(
        channel: impl Into<String>,
        kind: MessageKind,
        reason: impl Into<String>,
    ) -> Self {
        Self::UnexpectedMessage {
            channel: channel.into(),
            kind,
            reason: reason.into(),
        }
    }

    /// Create a closed-channel error
    pub fn closed(channel: impl Into<String>) -> Self {
        Self::Closed {
            channel: channel.into(),
        }
    }

    /// Check if reconnecting could clear this error
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::Closed { .. } | Self::HeartbeatExpired { .. } => true,
            Self::Transport(e) => e.is_retriable(),
            Self::Registry(e) => e.is_retriable(),
            Self::UnexpectedMessage { .. }
            | Self::InvalidTransition { .. }
            | Self::RetryExhausted { .. } => false,
        }
    }
}

/// Result type for channel operations
pub type ChannelResult<T> = std::result::Result<T, ChannelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ChannelError::unexpected("reg-1", MessageKind::AddInstance, "not a register");
        assert!(err.to_string().contains("reg-1"));
        assert!(err.to_string().contains("AddInstance"));
    }

    #[test]
    fn test_retriable_follows_source() {
        assert!(ChannelError::closed("c").is_retriable());
        assert!(ChannelError::from(TransportError::closed("c")).is_retriable());
        assert!(!ChannelError::from(TransportError::protocol_violation("bad")).is_retriable());
        assert!(!ChannelError::unexpected("c", MessageKind::Heartbeat, "x").is_retriable());
    }
}

//! Channel state machine
//!
//! TigerStyle: Explicit states, validated transitions.
//!
//! ```text
//!   Idle ──► Open ──► Closed      registration and interest channels
//!   Idle ───────────► Closed      replication channels
//! ```

use crate::error::{ChannelError, ChannelResult};
use tokio::sync::watch;

/// Channel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Created, input handler not yet wired
    Idle,
    /// Exchanging messages
    Open,
    /// Terminal
    Closed,
}

impl ChannelState {
    /// Check if the state machine allows moving to `next`
    pub fn can_transition_to(&self, next: ChannelState) -> bool {
        matches!(
            (self, next),
            (ChannelState::Idle, ChannelState::Open)
                | (ChannelState::Idle, ChannelState::Closed)
                | (ChannelState::Open, ChannelState::Closed)
        )
    }
}

/// Observable holder of a [`ChannelState`]
#[derive(Debug)]
pub struct StateCell {
    tx: watch::Sender<ChannelState>,
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl StateCell {
    /// Start in [`ChannelState::Idle`]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ChannelState::Idle);
        Self { tx }
    }

    /// Current state
    pub fn get(&self) -> ChannelState {
        *self.tx.borrow()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.tx.subscribe()
    }

    /// Move to `next`, rejecting transitions the machine does not allow
    pub fn transition(&self, next: ChannelState) -> ChannelResult<()> {
        let mut result = Ok(());
        self.tx.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                result = Err(ChannelError::InvalidTransition {
                    from: *current,
                    to: next,
                });
                false
            }
        });
        result
    }

    /// Move to [`ChannelState::Closed`]; returns false if already closed
    pub fn close(&self) -> bool {
        self.transition(ChannelState::Closed).is_ok()
    }
}

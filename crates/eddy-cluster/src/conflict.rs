//! Conflict resolution between two copies of one instance
//!
//! TigerStyle: Pure function, no I/O.
//!
//! The copy with the higher `lastDirtyTimestamp` wins; a tie keeps the local
//! copy. An operator override then wins over either side's raw status, and
//! the peer's override takes precedence over ours.

use eddy_core::{InstanceInfo, InstanceStatus};

/// Which copy survives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Local copy already agrees with the outcome
    KeepLocal,
    /// Replace the local copy with this one
    Adopt(InstanceInfo),
}

fn meaningful(status: Option<InstanceStatus>) -> Option<InstanceStatus> {
    status.filter(|s| *s != InstanceStatus::Unknown)
}

/// Decide between the local copy and the copy a peer holds
pub fn resolve(local: &InstanceInfo, peer: &InstanceInfo) -> Resolution {
    debug_assert_eq!(local.id, peer.id);

    let peer_newer = peer.last_dirty_timestamp > local.last_dirty_timestamp;
    let mut winner = if peer_newer {
        peer.clone()
    } else {
        local.clone()
    };

    if let Some(status) =
        meaningful(peer.overridden_status).or_else(|| meaningful(local.overridden_status))
    {
        winner.overridden_status = Some(status);
        winner.status = status;
    }

    if !peer_newer && winner == *local {
        Resolution::KeepLocal
    } else {
        Resolution::Adopt(winner)
    }
}

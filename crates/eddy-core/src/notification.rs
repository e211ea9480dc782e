//! Registry change notifications

use crate::delta::Delta;
use crate::instance::{InstanceId, InstanceInfo};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Marker delimiting a bulk upload from steady-state changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamState {
    /// A batch of snapshot notifications follows
    BufferStart,
    /// The batch is complete
    BufferEnd,
}

/// Kind of a data-carrying notification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Add,
    Modify,
    Delete,
}

/// One change observed on the registry
///
/// Instances are shared snapshots; cloning a notification never copies
/// the record.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeNotification {
    /// A record became visible
    Add(Arc<InstanceInfo>),
    /// A visible record was replaced; `deltas` turn the previous snapshot
    /// into `instance`
    Modify {
        instance: Arc<InstanceInfo>,
        deltas: Vec<Delta>,
    },
    /// A record is no longer visible; carries the last snapshot
    Delete(Arc<InstanceInfo>),
    /// Bulk upload boundary
    StreamState(StreamState),
}

impl ChangeNotification {
    /// Kind of a data-carrying notification, `None` for stream markers
    pub fn kind(&self) -> Option<ChangeKind> {
        match self {
            ChangeNotification::Add(_) => Some(ChangeKind::Add),
            ChangeNotification::Modify { .. } => Some(ChangeKind::Modify),
            ChangeNotification::Delete(_) => Some(ChangeKind::Delete),
            ChangeNotification::StreamState(_) => None,
        }
    }

    /// The instance carried by this notification
    pub fn instance(&self) -> Option<&Arc<InstanceInfo>> {
        match self {
            ChangeNotification::Add(instance)
            | ChangeNotification::Modify { instance, .. }
            | ChangeNotification::Delete(instance) => Some(instance),
            ChangeNotification::StreamState(_) => None,
        }
    }

    /// Id of the instance carried by this notification
    pub fn instance_id(&self) -> Option<&InstanceId> {
        self.instance().map(|instance| &instance.id)
    }

    /// Whether this is a stream-state marker
    pub fn is_stream_state(&self) -> bool {
        matches!(self, ChangeNotification::StreamState(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::tests::test_instance;

    #[test]
    fn test_notification_accessors() {
        let instance = Arc::new(test_instance("i-1", "X"));

        let add = ChangeNotification::Add(instance.clone());
        assert_eq!(add.kind(), Some(ChangeKind::Add));
        assert_eq!(add.instance_id().map(|id| id.as_str()), Some("i-1"));

        let marker = ChangeNotification::StreamState(StreamState::BufferEnd);
        assert!(marker.is_stream_state());
        assert!(marker.kind().is_none());
        assert!(marker.instance().is_none());
    }
}

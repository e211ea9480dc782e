//! Operator status overrides
//!
//! TigerStyle: Overrides outlive individual registrations and are dropped
//! only when the last holder of the instance goes away.

use eddy_core::{InstanceId, InstanceInfo, InstanceStatus};
use std::collections::HashMap;

/// Overridden statuses keyed by instance id
#[derive(Debug, Default, Clone)]
pub struct StatusOverrides {
    overrides: HashMap<InstanceId, InstanceStatus>,
}

impl StatusOverrides {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored override for `id`
    pub fn get(&self, id: &InstanceId) -> Option<InstanceStatus> {
        self.overrides.get(id).copied()
    }

    /// Store an override
    pub fn set(&mut self, id: InstanceId, status: InstanceStatus) {
        self.overrides.insert(id, status);
    }

    /// Drop the override for `id`
    pub fn remove(&mut self, id: &InstanceId) -> Option<InstanceStatus> {
        self.overrides.remove(id)
    }

    /// Number of stored overrides
    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    /// Whether no override is stored
    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    /// Reconcile an incoming registration with the stored override
    ///
    /// An incoming override other than `UNKNOWN` is recorded; otherwise a
    /// stored override is stamped onto the record.
    pub fn reconcile(&mut self, instance: &mut InstanceInfo) {
        match instance.overridden_status {
            Some(status) if status != InstanceStatus::Unknown => {
                if self.get(&instance.id) != Some(status) {
                    tracing::debug!(
                        instance_id = %instance.id,
                        status = %status,
                        "recording overridden status from registration"
                    );
                }
                self.set(instance.id.clone(), status);
            }
            _ => {
                if let Some(stored) = self.get(&instance.id) {
                    instance.overridden_status = Some(stored);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eddy_core::InstanceFields;

    fn instance(overridden: Option<InstanceStatus>) -> InstanceInfo {
        InstanceInfo::new(InstanceFields {
            id: "i-1".into(),
            app: "X".into(),
            overridden_status: overridden,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_incoming_override_is_recorded() {
        let mut overrides = StatusOverrides::new();
        let mut info = instance(Some(InstanceStatus::OutOfService));
        overrides.reconcile(&mut info);
        assert_eq!(
            overrides.get(&info.id),
            Some(InstanceStatus::OutOfService)
        );
    }

    #[test]
    fn test_stored_override_survives_reregistration() {
        let mut overrides = StatusOverrides::new();
        let mut first = instance(Some(InstanceStatus::OutOfService));
        overrides.reconcile(&mut first);

        let mut again = instance(None);
        overrides.reconcile(&mut again);
        assert_eq!(again.overridden_status, Some(InstanceStatus::OutOfService));
        assert_eq!(again.effective_status(), InstanceStatus::OutOfService);
    }

    #[test]
    fn test_unknown_override_is_not_recorded() {
        let mut overrides = StatusOverrides::new();
        let mut info = instance(Some(InstanceStatus::Unknown));
        overrides.reconcile(&mut info);
        assert!(overrides.is_empty());
    }
}

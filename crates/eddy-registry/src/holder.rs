//! Multi-sourced instance holder
//!
//! TigerStyle: Pure state transitions, every transition returns the
//! notifications it causes.
//!
//! One instance id may be held by several sources at once (a local client
//! and one or more replicating peers). Readers see a single view:
//! - the most recent write becomes the view
//! - except that a non-local write never displaces a local view
//! - removing the view's source promotes a remaining copy, preferring a
//!   local one
//!
//! ```text
//!   write(LOCAL:a)      ──► view = LOCAL:a        Add
//!   write(REPL:b)       ──► view = LOCAL:a        (nothing)
//!   remove(LOCAL:a)     ──► view = REPL:b         Delete + Add
//!   remove(REPL:b)      ──► empty                 Delete
//! ```

use eddy_core::delta;
use eddy_core::error::{Error, Result};
use eddy_core::{ChangeNotification, InstanceId, InstanceInfo, Source};
use std::sync::Arc;

/// One source's copy of an instance
#[derive(Debug, Clone)]
pub struct HeldCopy {
    pub source: Source,
    pub instance: Arc<InstanceInfo>,
}

/// Result of removing a source's copy
#[derive(Debug, PartialEq)]
pub enum Removal {
    /// The source held no copy
    NotHeld,
    /// The copy was removed; carries the notifications readers must see
    Removed(Vec<ChangeNotification>),
}

/// All copies of one instance, keyed by source
#[derive(Debug, Clone)]
pub struct MultiSourcedHolder {
    id: InstanceId,
    /// Most recently written first
    copies: Vec<HeldCopy>,
    view_source: Option<Source>,
}

impl MultiSourcedHolder {
    /// Create an empty holder
    pub fn new(id: InstanceId) -> Self {
        Self {
            id,
            copies: Vec::new(),
            view_source: None,
        }
    }

    /// Instance id held
    pub fn id(&self) -> &InstanceId {
        &self.id
    }

    /// Source whose copy readers see
    pub fn view_source(&self) -> Option<&Source> {
        self.view_source.as_ref()
    }

    /// The copy readers see
    pub fn view(&self) -> Option<&Arc<InstanceInfo>> {
        let source = self.view_source.as_ref()?;
        self.copy(source)
    }

    /// The copy held by `source`
    pub fn copy(&self, source: &Source) -> Option<&Arc<InstanceInfo>> {
        self.copies
            .iter()
            .find(|c| &c.source == source)
            .map(|c| &c.instance)
    }

    /// Sources currently holding a copy, most recent first
    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.copies.iter().map(|c| &c.source)
    }

    /// Number of copies held
    pub fn len(&self) -> usize {
        self.copies.len()
    }

    /// Whether no source holds a copy
    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    /// Store `source`'s copy and recompute the view
    pub fn update(
        &mut self,
        source: Source,
        instance: Arc<InstanceInfo>,
    ) -> Result<Vec<ChangeNotification>> {
        if instance.id != self.id {
            return Err(Error::DeltaMismatch {
                delta_id: instance.id.to_string(),
                instance_id: self.id.to_string(),
            });
        }

        let previous_view = self.view().cloned();

        self.copies.retain(|c| c.source != source);
        self.copies.insert(
            0,
            HeldCopy {
                source: source.clone(),
                instance: instance.clone(),
            },
        );

        let displaces_view = match &self.view_source {
            None => true,
            Some(current) if *current == source => true,
            Some(current) => !(current.is_local() && !source.is_local()),
        };
        if !displaces_view {
            return Ok(Vec::new());
        }
        self.view_source = Some(source);

        let Some(previous) = previous_view else {
            return Ok(vec![ChangeNotification::Add(instance)]);
        };
        let deltas = delta::diff(&previous, &instance)?;
        if deltas.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![ChangeNotification::Modify { instance, deltas }])
    }

    /// Drop `source`'s copy, promoting another copy if it was the view
    pub fn remove(&mut self, source: &Source) -> Result<Removal> {
        let Some(position) = self.copies.iter().position(|c| &c.source == source) else {
            return Ok(Removal::NotHeld);
        };
        let removed = self.copies.remove(position);

        if self.view_source.as_ref() != Some(source) {
            return Ok(Removal::Removed(Vec::new()));
        }

        let promoted = self
            .copies
            .iter()
            .find(|c| c.source.is_local())
            .or_else(|| self.copies.first())
            .cloned();

        let Some(promoted) = promoted else {
            self.view_source = None;
            return Ok(Removal::Removed(vec![ChangeNotification::Delete(
                removed.instance,
            )]));
        };
        self.view_source = Some(promoted.source.clone());

        if removed.source.is_local() && !promoted.source.is_local() {
            return Ok(Removal::Removed(vec![
                ChangeNotification::Delete(removed.instance),
                ChangeNotification::Add(promoted.instance),
            ]));
        }

        let deltas = delta::diff(&removed.instance, &promoted.instance)?;
        if deltas.is_empty() {
            return Ok(Removal::Removed(Vec::new()));
        }
        Ok(Removal::Removed(vec![ChangeNotification::Modify {
            instance: promoted.instance,
            deltas,
        }]))
    }

    /// Drop every copy at once
    pub fn remove_all(&mut self) -> Vec<ChangeNotification> {
        let view = self.view().cloned();
        self.copies.clear();
        self.view_source = None;
        view.map(ChangeNotification::Delete).into_iter().collect()
    }

    /// Record a lease renewal on every copy
    ///
    /// Renewals are lease bookkeeping and produce no notification.
    pub fn renew(&mut self, now_ms: u64) {
        for copy in &mut self.copies {
            let lease = copy.instance.lease.renewed(now_ms);
            copy.instance = Arc::new(copy.instance.with_lease(lease));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eddy_core::{ChangeKind, InstanceFields, InstanceStatus};

    fn instance(status: InstanceStatus, host: &str) -> Arc<InstanceInfo> {
        Arc::new(
            InstanceInfo::new(InstanceFields {
                id: "i-1".into(),
                app: "X".into(),
                host_name: host.into(),
                status,
                ..Default::default()
            })
            .unwrap(),
        )
    }

    fn holder() -> MultiSourcedHolder {
        MultiSourcedHolder::new(InstanceId::new("i-1").unwrap())
    }

    fn kinds(notifications: &[ChangeNotification]) -> Vec<ChangeKind> {
        notifications.iter().filter_map(|n| n.kind()).collect()
    }

    #[test]
    fn test_first_write_adds() {
        let mut h = holder();
        let out = h
            .update(Source::local("i-1"), instance(InstanceStatus::Up, "a"))
            .unwrap();
        assert_eq!(kinds(&out), vec![ChangeKind::Add]);
        assert_eq!(h.view_source(), Some(&Source::local("i-1")));
    }

    #[test]
    fn test_same_source_write_modifies_with_deltas() {
        let mut h = holder();
        h.update(Source::local("i-1"), instance(InstanceStatus::Up, "a"))
            .unwrap();
        let out = h
            .update(Source::local("i-1"), instance(InstanceStatus::Down, "a"))
            .unwrap();

        match &out[..] {
            [ChangeNotification::Modify { deltas, .. }] => assert_eq!(deltas.len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_identical_write_is_silent() {
        let mut h = holder();
        h.update(Source::local("i-1"), instance(InstanceStatus::Up, "a"))
            .unwrap();
        let out = h
            .update(Source::local("i-1"), instance(InstanceStatus::Up, "a"))
            .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_replication_never_displaces_local_view() {
        let mut h = holder();
        h.update(Source::local("i-1"), instance(InstanceStatus::Up, "a"))
            .unwrap();
        let out = h
            .update(
                Source::replication("node-b"),
                instance(InstanceStatus::Down, "b"),
            )
            .unwrap();

        assert!(out.is_empty());
        assert_eq!(h.len(), 2);
        assert_eq!(h.view().unwrap().host_name, "a");
    }

    #[test]
    fn test_most_recent_replication_wins() {
        let mut h = holder();
        h.update(
            Source::replication("node-b"),
            instance(InstanceStatus::Up, "b"),
        )
        .unwrap();
        let out = h
            .update(
                Source::replication("node-c"),
                instance(InstanceStatus::Up, "c"),
            )
            .unwrap();

        assert_eq!(kinds(&out), vec![ChangeKind::Modify]);
        assert_eq!(h.view().unwrap().host_name, "c");
    }

    #[test]
    fn test_local_removed_promotes_replica_with_delete_then_add() {
        let mut h = holder();
        h.update(Source::local("i-1"), instance(InstanceStatus::Up, "a"))
            .unwrap();
        h.update(
            Source::replication("node-b"),
            instance(InstanceStatus::Up, "b"),
        )
        .unwrap();

        let Removal::Removed(out) = h.remove(&Source::local("i-1")).unwrap() else {
            panic!("local copy should be held");
        };
        assert_eq!(kinds(&out), vec![ChangeKind::Delete, ChangeKind::Add]);
        assert_eq!(h.view().unwrap().host_name, "b");
    }

    #[test]
    fn test_replica_removed_promotes_next_with_modify() {
        let mut h = holder();
        h.update(
            Source::replication("node-b"),
            instance(InstanceStatus::Up, "b"),
        )
        .unwrap();
        h.update(
            Source::replication("node-c"),
            instance(InstanceStatus::Up, "c"),
        )
        .unwrap();

        let Removal::Removed(out) = h.remove(&Source::replication("node-c")).unwrap() else {
            panic!("copy should be held");
        };
        assert_eq!(kinds(&out), vec![ChangeKind::Modify]);
        assert_eq!(h.view().unwrap().host_name, "b");
    }

    #[test]
    fn test_removing_non_view_copy_is_silent() {
        let mut h = holder();
        h.update(Source::local("i-1"), instance(InstanceStatus::Up, "a"))
            .unwrap();
        h.update(
            Source::replication("node-b"),
            instance(InstanceStatus::Up, "b"),
        )
        .unwrap();

        assert_eq!(
            h.remove(&Source::replication("node-b")).unwrap(),
            Removal::Removed(Vec::new())
        );
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn test_last_removal_deletes() {
        let mut h = holder();
        h.update(Source::local("i-1"), instance(InstanceStatus::Up, "a"))
            .unwrap();

        let Removal::Removed(out) = h.remove(&Source::local("i-1")).unwrap() else {
            panic!("copy should be held");
        };
        assert_eq!(kinds(&out), vec![ChangeKind::Delete]);
        assert!(h.is_empty());
        assert_eq!(
            h.remove(&Source::local("i-1")).unwrap(),
            Removal::NotHeld
        );
    }

    #[test]
    fn test_renew_is_silent_and_updates_every_copy() {
        let mut h = holder();
        h.update(Source::local("i-1"), instance(InstanceStatus::Up, "a"))
            .unwrap();
        h.update(
            Source::replication("node-b"),
            instance(InstanceStatus::Up, "b"),
        )
        .unwrap();

        h.renew(5_000);
        for source in [Source::local("i-1"), Source::replication("node-b")] {
            assert_eq!(
                h.copy(&source).unwrap().lease.last_renewal_timestamp_ms,
                5_000
            );
        }
    }

    #[test]
    fn test_rejects_foreign_instance() {
        let mut h = MultiSourcedHolder::new(InstanceId::new("other").unwrap());
        assert!(h
            .update(Source::local("x"), instance(InstanceStatus::Up, "a"))
            .is_err());
    }
}

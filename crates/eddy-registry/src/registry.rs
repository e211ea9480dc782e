//! Registry trait and in-memory lease registry
//!
//! TigerStyle: Explicit trait, single lock over all mutable state, every
//! mutation publishes its notifications while the lock is held so that a
//! snapshot taken under the read lock lines up exactly with the live stream.

use crate::error::{RegistryError, RegistryResult};
use crate::holder::{MultiSourcedHolder, Removal};
use crate::overrides::StatusOverrides;
use crate::preservation::{PreservationSnapshot, RenewalRate, SelfPreservation};
use async_trait::async_trait;
use eddy_core::constants::REGISTRY_INSTANCES_COUNT_MAX;
use eddy_core::{
    ChangeNotification, InstanceId, InstanceInfo, InstanceStatus, Interest, IoContext, LeaseInfo,
    RegistryConfig, Source, StreamState,
};
use futures::Stream;
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Capacity of the registry-wide change broadcast
pub const CHANGE_STREAM_DEPTH_MAX: usize = 4096;

/// Capacity of each per-interest stream
pub const INTEREST_STREAM_DEPTH_MAX: usize = 1024;

// =============================================================================
// Outcomes
// =============================================================================

/// Result of a write that targets an existing record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The write was applied
    Applied,
    /// No matching record; a benign, reportable result
    NotFound,
}

impl Outcome {
    /// Whether the write was applied
    pub fn is_applied(&self) -> bool {
        matches!(self, Outcome::Applied)
    }
}

/// What one eviction sweep did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvictionReport {
    /// Ids removed by this sweep
    pub evicted: Vec<InstanceId>,
    /// Leases found expired, including any held back by the eviction limit
    pub expired_count: usize,
    /// Self-preservation state when the sweep ran
    pub preservation: PreservationSnapshot,
}

impl EvictionReport {
    /// Whether self-preservation suspended this sweep
    pub fn suppressed(&self) -> bool {
        !self.preservation.eviction_allowed
    }
}

// =============================================================================
// Interest Stream
// =============================================================================

/// Live notifications for one interest
///
/// Starts with the current matching records between `BufferStart` and
/// `BufferEnd` markers, then follows live changes. The stream ends after
/// an error item, or when the registry is dropped.
pub struct InterestStream {
    interest: Interest,
    rx: mpsc::Receiver<RegistryResult<ChangeNotification>>,
    task: JoinHandle<()>,
}

impl InterestStream {
    /// Interest this stream follows
    pub fn interest(&self) -> &Interest {
        &self.interest
    }
}

impl Stream for InterestStream {
    type Item = RegistryResult<ChangeNotification>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for InterestStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// =============================================================================
// Registry Trait
// =============================================================================

/// The lease registry
///
/// # Guarantees
/// - A record disappears from reads only when its last holder is removed
/// - Notifications for one record are published in mutation order
#[async_trait]
pub trait Registry: Send + Sync {
    /// Insert or replace `source`'s copy of an instance and start its lease
    async fn register(&self, instance: InstanceInfo, source: &Source) -> RegistryResult<()>;

    /// Reset the lease of an instance
    async fn renew(&self, app: &str, id: &InstanceId) -> RegistryResult<Outcome>;

    /// Replace `source`'s copy; notifications carry the computed deltas
    async fn update(&self, instance: InstanceInfo, source: &Source) -> RegistryResult<Outcome>;

    /// Drop `source`'s hold on an instance
    async fn unregister(&self, id: &InstanceId, source: &Source) -> RegistryResult<Outcome>;

    /// Drop every hold registered by `source`; returns the number released
    async fn release_source(&self, source: &Source) -> RegistryResult<usize>;

    /// Remove records whose lease expired, unless self-preservation is active
    async fn evict(&self) -> RegistryResult<EvictionReport>;

    /// Force the status of an instance as an operator override
    async fn status_update(
        &self,
        app: &str,
        id: &InstanceId,
        status: InstanceStatus,
        last_dirty_timestamp: u64,
    ) -> RegistryResult<Outcome>;

    /// Clear an operator override; the status becomes `new_status` or UNKNOWN
    async fn delete_status_override(
        &self,
        app: &str,
        id: &InstanceId,
        new_status: Option<InstanceStatus>,
    ) -> RegistryResult<Outcome>;

    /// Record an override a peer reports for an instance we hold
    ///
    /// Only the override map and the exposed copy's overridden status change;
    /// status and dirty timestamp are left to the peer's re-registration.
    async fn store_overridden_status(
        &self,
        app: &str,
        id: &InstanceId,
        status: InstanceStatus,
    ) -> RegistryResult<Outcome>;

    /// Replace the exposed copy of an instance with the winner of a conflict
    ///
    /// The winner keeps its dirty timestamp and the current lease; the copy
    /// is stored under whichever source currently holds the view.
    async fn adopt(&self, instance: InstanceInfo) -> RegistryResult<Outcome>;

    /// Current view of one instance
    async fn get(&self, app: &str, id: &InstanceId) -> Option<Arc<InstanceInfo>>;

    /// Current views matching `interest`, ordered by id
    async fn for_snapshot(&self, interest: &Interest) -> Vec<Arc<InstanceInfo>>;

    /// Snapshot followed by live notifications for `interest`
    async fn for_interest(&self, interest: Interest) -> RegistryResult<InterestStream>;

    /// Renewals received during the last complete minute
    async fn renewals_last_minute(&self) -> u64;

    /// Current self-preservation state
    async fn self_preservation(&self) -> PreservationSnapshot;

    /// Number of instances held
    async fn size(&self) -> usize;
}

// =============================================================================
// MemoryRegistry
// =============================================================================

struct RegistryState {
    holders: HashMap<InstanceId, MultiSourcedHolder>,
    overrides: StatusOverrides,
    renewals: RenewalRate,
}

impl RegistryState {
    fn expected_renewals_per_min(&self) -> u64 {
        self.holders
            .values()
            .filter_map(MultiSourcedHolder::view)
            .map(|instance| instance.lease.expected_renewals_per_min())
            .sum()
    }

    fn holder_for_app(&mut self, app: &str, id: &InstanceId) -> Option<&mut MultiSourcedHolder> {
        self.holders
            .get_mut(id)
            .filter(|h| h.view().is_some_and(|v| v.app.eq_ignore_ascii_case(app)))
    }
}

/// In-memory lease registry
///
/// All state is lost on restart; peers repopulate it through replication.
pub struct MemoryRegistry {
    state: RwLock<RegistryState>,
    changes: broadcast::Sender<ChangeNotification>,
    preservation: SelfPreservation,
    io: IoContext,
    capacity: usize,
}

impl MemoryRegistry {
    /// Create a registry with the given configuration and I/O context
    pub fn new(config: &RegistryConfig, io: IoContext) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_STREAM_DEPTH_MAX);
        Self {
            state: RwLock::new(RegistryState {
                holders: HashMap::new(),
                overrides: StatusOverrides::new(),
                renewals: RenewalRate::new(config.renewal_bucket_ms, io.now_ms()),
            }),
            changes,
            preservation: SelfPreservation::new(
                config.self_preservation_enabled,
                config.renewal_percent_threshold,
            ),
            io,
            capacity: REGISTRY_INSTANCES_COUNT_MAX,
        }
    }

    /// Limit the number of instances held
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Subscribe to every notification, without a snapshot
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeNotification> {
        self.changes.subscribe()
    }

    fn publish(&self, notifications: Vec<ChangeNotification>) {
        for notification in notifications {
            // No receivers is fine
            let _ = self.changes.send(notification);
        }
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn register(&self, mut instance: InstanceInfo, source: &Source) -> RegistryResult<()> {
        let now_ms = self.io.now_ms();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let existing = state
            .holders
            .get(&instance.id)
            .and_then(|h| h.copy(source).or_else(|| h.view()))
            .cloned();

        if existing.is_none() && state.holders.len() >= self.capacity {
            return Err(RegistryError::CapacityExceeded {
                count: state.holders.len(),
                limit: self.capacity,
            });
        }

        let declared = LeaseInfo::new(
            instance.lease.renewal_interval_secs,
            instance.lease.duration_secs,
        );
        let mut lease = declared.started(now_ms);

        if let Some(existing) = &existing {
            if existing.last_dirty_timestamp > instance.last_dirty_timestamp {
                tracing::debug!(
                    instance_id = %instance.id,
                    existing = existing.last_dirty_timestamp,
                    incoming = instance.last_dirty_timestamp,
                    "existing copy is newer, keeping it as the registrant"
                );
                instance = existing.as_ref().clone();
            }
            lease.service_up_timestamp_ms = existing.lease.service_up_timestamp_ms;
        }

        state.overrides.reconcile(&mut instance);
        if instance.status == InstanceStatus::Up {
            lease = lease.service_up(now_ms);
        }
        instance.lease = lease;

        let id = instance.id.clone();
        let app = instance.app.clone();
        let holder = state
            .holders
            .entry(id.clone())
            .or_insert_with(|| MultiSourcedHolder::new(id.clone()));
        let notifications = holder.update(source.clone(), Arc::new(instance))?;

        tracing::info!(
            instance_id = %id,
            app = %app,
            source = %source,
            holders = holder.len(),
            "registered instance"
        );
        self.publish(notifications);
        Ok(())
    }

    async fn renew(&self, app: &str, id: &InstanceId) -> RegistryResult<Outcome> {
        let now_ms = self.io.now_ms();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let Some(holder) = state.holder_for_app(app, id) else {
            tracing::debug!(instance_id = %id, app, "renewal for unknown instance");
            return Ok(Outcome::NotFound);
        };
        holder.renew(now_ms);
        // Only renewals of held leases count toward the rate
        state.renewals.record(now_ms);
        tracing::trace!(instance_id = %id, app, "renewed lease");
        Ok(Outcome::Applied)
    }

    async fn update(&self, mut instance: InstanceInfo, source: &Source) -> RegistryResult<Outcome> {
        let now_ms = self.io.now_ms();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let stored_override = state.overrides.get(&instance.id);
        let Some(holder) = state.holders.get_mut(&instance.id) else {
            tracing::debug!(instance_id = %instance.id, "update for unknown instance");
            return Ok(Outcome::NotFound);
        };
        let Some(current) = holder.copy(source).or_else(|| holder.view()).cloned() else {
            return Ok(Outcome::NotFound);
        };

        // The lease is server-managed; never taken from the writer
        instance.lease = current.lease;
        if source.is_local() {
            instance.last_dirty_timestamp =
                now_ms.max(current.last_dirty_timestamp.saturating_add(1));
        }
        if let Some(status) = stored_override {
            instance.overridden_status = Some(status);
        }
        if instance.status == InstanceStatus::Up {
            instance.lease = instance.lease.service_up(now_ms);
        }

        let id = instance.id.clone();
        let notifications = holder.update(source.clone(), Arc::new(instance))?;
        tracing::debug!(instance_id = %id, source = %source, "updated instance");
        self.publish(notifications);
        Ok(Outcome::Applied)
    }

    async fn unregister(&self, id: &InstanceId, source: &Source) -> RegistryResult<Outcome> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let Some(holder) = state.holders.get_mut(id) else {
            return Ok(Outcome::NotFound);
        };
        let notifications = match holder.remove(source)? {
            Removal::NotHeld => return Ok(Outcome::NotFound),
            Removal::Removed(notifications) => notifications,
        };

        let remaining = holder.len();
        if remaining == 0 {
            state.holders.remove(id);
            state.overrides.remove(id);
        }

        tracing::info!(instance_id = %id, source = %source, remaining, "unregistered instance");
        self.publish(notifications);
        Ok(Outcome::Applied)
    }

    async fn release_source(&self, source: &Source) -> RegistryResult<usize> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let held: Vec<InstanceId> = state
            .holders
            .iter()
            .filter(|(_, h)| h.copy(source).is_some())
            .map(|(id, _)| id.clone())
            .collect();

        let mut notifications = Vec::new();
        for id in &held {
            if let Some(holder) = state.holders.get_mut(id) {
                if let Removal::Removed(mut out) = holder.remove(source)? {
                    notifications.append(&mut out);
                }
                if holder.is_empty() {
                    state.holders.remove(id);
                    state.overrides.remove(id);
                }
            }
        }

        if !held.is_empty() {
            tracing::info!(source = %source, released = held.len(), "released source holds");
        }
        self.publish(notifications);
        Ok(held.len())
    }

    async fn evict(&self) -> RegistryResult<EvictionReport> {
        let now_ms = self.io.now_ms();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let expected = state.expected_renewals_per_min();
        let actual = state.renewals.last_bucket(now_ms);
        let preservation = self.preservation.evaluate(expected, actual);

        if !preservation.eviction_allowed {
            tracing::warn!(
                expected_renewals_per_min = expected,
                threshold_renewals_per_min = preservation.threshold_renewals_per_min,
                renewals_last_minute = actual,
                "self-preservation active, eviction suspended"
            );
            return Ok(EvictionReport {
                evicted: Vec::new(),
                expired_count: 0,
                preservation,
            });
        }

        let mut expired: Vec<(u64, InstanceId)> = state
            .holders
            .iter()
            .filter_map(|(id, h)| {
                let view = h.view()?;
                view.lease
                    .is_expired(now_ms)
                    .then(|| (view.lease.last_renewal_timestamp_ms, id.clone()))
            })
            .collect();
        expired.sort();
        let expired_count = expired.len();

        let limit = self.preservation.eviction_limit(state.holders.len());
        if expired_count > limit {
            tracing::warn!(
                expired = expired_count,
                limit,
                "eviction limited to protect the registry"
            );
            expired.truncate(limit);
        }

        let mut evicted = Vec::with_capacity(expired.len());
        let mut notifications = Vec::new();
        for (_, id) in expired {
            if let Some(mut holder) = state.holders.remove(&id) {
                notifications.append(&mut holder.remove_all());
                state.overrides.remove(&id);
                tracing::info!(instance_id = %id, "evicted instance with expired lease");
                evicted.push(id);
            }
        }

        self.publish(notifications);
        Ok(EvictionReport {
            evicted,
            expired_count,
            preservation,
        })
    }

    async fn status_update(
        &self,
        app: &str,
        id: &InstanceId,
        status: InstanceStatus,
        last_dirty_timestamp: u64,
    ) -> RegistryResult<Outcome> {
        let now_ms = self.io.now_ms();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let Some(holder) = state.holder_for_app(app, id) else {
            return Ok(Outcome::NotFound);
        };
        let (Some(source), Some(view)) = (holder.view_source().cloned(), holder.view().cloned())
        else {
            return Ok(Outcome::NotFound);
        };

        let mut next = view.as_ref().clone();
        next.status = status;
        next.overridden_status = Some(status);
        next.last_dirty_timestamp = last_dirty_timestamp;
        if status == InstanceStatus::Up {
            next.lease = next.lease.service_up(now_ms);
        }
        let notifications = holder.update(source, Arc::new(next))?;
        state.overrides.set(id.clone(), status);

        tracing::info!(instance_id = %id, app, status = %status, "status overridden");
        self.publish(notifications);
        Ok(Outcome::Applied)
    }

    async fn delete_status_override(
        &self,
        app: &str,
        id: &InstanceId,
        new_status: Option<InstanceStatus>,
    ) -> RegistryResult<Outcome> {
        let now_ms = self.io.now_ms();
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let Some(holder) = state.holder_for_app(app, id) else {
            return Ok(Outcome::NotFound);
        };
        let (Some(source), Some(view)) = (holder.view_source().cloned(), holder.view().cloned())
        else {
            return Ok(Outcome::NotFound);
        };

        let mut next = view.as_ref().clone();
        next.overridden_status = None;
        next.status = new_status.unwrap_or(InstanceStatus::Unknown);
        next.last_dirty_timestamp = now_ms.max(view.last_dirty_timestamp.saturating_add(1));
        let notifications = holder.update(source, Arc::new(next))?;
        state.overrides.remove(id);

        tracing::info!(instance_id = %id, app, "status override removed");
        self.publish(notifications);
        Ok(Outcome::Applied)
    }

    async fn store_overridden_status(
        &self,
        app: &str,
        id: &InstanceId,
        status: InstanceStatus,
    ) -> RegistryResult<Outcome> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let stored = state.overrides.get(id);
        let Some(holder) = state.holder_for_app(app, id) else {
            return Ok(Outcome::NotFound);
        };
        let (Some(source), Some(view)) = (holder.view_source().cloned(), holder.view().cloned())
        else {
            return Ok(Outcome::NotFound);
        };
        if stored == Some(status) && view.overridden_status == Some(status) {
            return Ok(Outcome::Applied);
        }

        let mut next = view.as_ref().clone();
        next.overridden_status = Some(status);
        let notifications = holder.update(source, Arc::new(next))?;
        state.overrides.set(id.clone(), status);

        tracing::info!(instance_id = %id, app, status = %status, "stored overridden status from peer");
        self.publish(notifications);
        Ok(Outcome::Applied)
    }

    async fn adopt(&self, mut instance: InstanceInfo) -> RegistryResult<Outcome> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let app = instance.app.clone();
        let Some(holder) = state.holder_for_app(&app, &instance.id) else {
            return Ok(Outcome::NotFound);
        };
        let (Some(source), Some(view)) = (holder.view_source().cloned(), holder.view().cloned())
        else {
            return Ok(Outcome::NotFound);
        };

        instance.lease = view.lease;
        let previous_timestamp = view.last_dirty_timestamp;
        let id = instance.id.clone();
        let last_dirty_timestamp = instance.last_dirty_timestamp;
        state.overrides.reconcile(&mut instance);

        let Some(holder) = state.holders.get_mut(&id) else {
            return Ok(Outcome::NotFound);
        };
        let notifications = holder.update(source.clone(), Arc::new(instance))?;

        tracing::info!(
            instance_id = %id,
            app = %app,
            source = %source,
            previous = previous_timestamp,
            adopted = last_dirty_timestamp,
            "adopted conflicting copy"
        );
        self.publish(notifications);
        Ok(Outcome::Applied)
    }

    async fn get(&self, app: &str, id: &InstanceId) -> Option<Arc<InstanceInfo>> {
        let state = self.state.read().await;
        state
            .holders
            .get(id)
            .and_then(MultiSourcedHolder::view)
            .filter(|view| view.app.eq_ignore_ascii_case(app))
            .cloned()
    }

    async fn for_snapshot(&self, interest: &Interest) -> Vec<Arc<InstanceInfo>> {
        let state = self.state.read().await;
        let mut matching: Vec<Arc<InstanceInfo>> = state
            .holders
            .values()
            .filter_map(MultiSourcedHolder::view)
            .filter(|view| interest.matches(view))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.id.cmp(&b.id));
        matching
    }

    async fn for_interest(&self, interest: Interest) -> RegistryResult<InterestStream> {
        // Subscribe and snapshot under the same read lock
        let (mut changes, snapshot) = {
            let state = self.state.read().await;
            let changes = self.changes.subscribe();
            let mut snapshot: Vec<Arc<InstanceInfo>> = state
                .holders
                .values()
                .filter_map(MultiSourcedHolder::view)
                .filter(|view| interest.matches(view))
                .cloned()
                .collect();
            snapshot.sort_by(|a, b| a.id.cmp(&b.id));
            (changes, snapshot)
        };

        let (tx, rx) = mpsc::channel(INTEREST_STREAM_DEPTH_MAX);
        let filter = interest.clone();
        let task = tokio::spawn(async move {
            let initial = std::iter::once(ChangeNotification::StreamState(StreamState::BufferStart))
                .chain(snapshot.into_iter().map(ChangeNotification::Add))
                .chain(std::iter::once(ChangeNotification::StreamState(
                    StreamState::BufferEnd,
                )));
            for notification in initial {
                if tx.send(Ok(notification)).await.is_err() {
                    return;
                }
            }

            loop {
                match changes.recv().await {
                    Ok(notification) => {
                        let matches = notification
                            .instance()
                            .is_some_and(|instance| filter.matches(instance));
                        if matches && tx.send(Ok(notification)).await.is_err() {
                            return;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(interest = ?filter, skipped, "interest subscriber lagged");
                        let _ = tx
                            .send(Err(RegistryError::SubscriberLagged {
                                interest: format!("{:?}", filter),
                                skipped,
                            }))
                            .await;
                        return;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        });

        Ok(InterestStream { interest, rx, task })
    }

    async fn renewals_last_minute(&self) -> u64 {
        let now_ms = self.io.now_ms();
        self.state.write().await.renewals.last_bucket(now_ms)
    }

    async fn self_preservation(&self) -> PreservationSnapshot {
        let now_ms = self.io.now_ms();
        let mut state = self.state.write().await;
        let expected = state.expected_renewals_per_min();
        let actual = state.renewals.last_bucket(now_ms);
        self.preservation.evaluate(expected, actual)
    }

    async fn size(&self) -> usize {
        self.state.read().await.holders.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eddy_core::{ChangeKind, InstanceFields};
    use eddy_dst::SimClock;
    use futures::StreamExt;

    fn instance(id: &str, app: &str) -> InstanceInfo {
        InstanceInfo::new(InstanceFields {
            id: id.into(),
            app: app.into(),
            ..Default::default()
        })
        .unwrap()
    }

    fn id(value: &str) -> InstanceId {
        InstanceId::new(value).unwrap()
    }

    fn registry(clock: &SimClock, self_preservation: bool) -> MemoryRegistry {
        let config = RegistryConfig {
            self_preservation_enabled: self_preservation,
            ..RegistryConfig::for_testing()
        };
        MemoryRegistry::new(&config, IoContext::new(Arc::new(clock.clone())))
    }

    #[tokio::test]
    async fn test_register_and_get() {
        let clock = SimClock::from_millis(1_000);
        let registry = registry(&clock, false);

        registry
            .register(instance("i-1", "X"), &Source::local("i-1"))
            .await
            .unwrap();

        let stored = registry.get("x", &id("i-1")).await.unwrap();
        assert_eq!(stored.lease.registration_timestamp_ms, 1_000);
        assert_eq!(stored.lease.service_up_timestamp_ms, 1_000);
        assert!(registry.get("Y", &id("i-1")).await.is_none());
        assert_eq!(registry.size().await, 1);
    }

    #[tokio::test]
    async fn test_renew_unknown_is_not_found() {
        let clock = SimClock::from_millis(0);
        let registry = registry(&clock, false);
        assert_eq!(
            registry.renew("X", &id("missing")).await.unwrap(),
            Outcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_renewal_prevents_eviction() {
        let clock = SimClock::from_millis(0);
        let registry = registry(&clock, false);
        registry
            .register(instance("i-1", "X"), &Source::local("i-1"))
            .await
            .unwrap();

        for _ in 0..6 {
            clock.advance_ms(30_000);
            assert!(registry.renew("X", &id("i-1")).await.unwrap().is_applied());
            assert!(registry.evict().await.unwrap().evicted.is_empty());
        }
        assert_eq!(registry.size().await, 1);
    }

    #[tokio::test]
    async fn test_expired_lease_is_evicted_once() {
        let clock = SimClock::from_millis(0);
        let registry = registry(&clock, false);
        registry
            .register(instance("i-1", "X"), &Source::local("i-1"))
            .await
            .unwrap();
        let mut changes = registry.subscribe();

        clock.advance_ms(90_000);
        assert!(registry.evict().await.unwrap().evicted.is_empty());

        clock.advance_ms(1);
        let report = registry.evict().await.unwrap();
        assert_eq!(report.evicted, vec![id("i-1")]);
        assert!(registry.evict().await.unwrap().evicted.is_empty());

        let deleted = changes.recv().await.unwrap();
        assert_eq!(deleted.kind(), Some(ChangeKind::Delete));
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_self_preservation_suspends_eviction() {
        let clock = SimClock::from_millis(0);
        let registry = registry(&clock, true);
        for n in 0..10 {
            let name = format!("i-{}", n);
            registry
                .register(instance(&name, "X"), &Source::local(name.clone()))
                .await
                .unwrap();
        }

        // A full minute of healthy renewals: 10 leases x 2 per minute
        for step_ms in [15_000, 30_000] {
            clock.advance_ms(step_ms);
            for n in 0..10 {
                registry.renew("X", &id(&format!("i-{}", n))).await.unwrap();
            }
        }
        clock.advance_ms(15_001);
        assert!(registry.self_preservation().await.eviction_allowed);

        // Partition: nobody renews for two minutes
        clock.advance_ms(120_000);
        let report = registry.evict().await.unwrap();
        assert!(report.suppressed());
        assert!(report.evicted.is_empty());
        assert_eq!(report.preservation.expected_renewals_per_min, 20);
        assert_eq!(report.preservation.threshold_renewals_per_min, 17);
        assert_eq!(registry.size().await, 10);
    }

    #[tokio::test]
    async fn test_unknown_renewals_do_not_lift_self_preservation() {
        let clock = SimClock::from_millis(0);
        let registry = registry(&clock, true);
        for n in 0..10 {
            let name = format!("i-{}", n);
            registry
                .register(instance(&name, "X"), &Source::local(name.clone()))
                .await
                .unwrap();
        }

        // None of the held leases renew; strangers do, at the expected rate
        clock.advance_ms(60_000);
        for n in 0..20 {
            let outcome = registry
                .renew("X", &id(&format!("ghost-{}", n)))
                .await
                .unwrap();
            assert_eq!(outcome, Outcome::NotFound);
        }
        clock.advance_ms(60_000);

        assert_eq!(registry.renewals_last_minute().await, 0);
        assert!(!registry.self_preservation().await.eviction_allowed);
        let report = registry.evict().await.unwrap();
        assert!(report.suppressed());
        assert!(report.evicted.is_empty());
        assert_eq!(registry.size().await, 10);
    }

    #[tokio::test]
    async fn test_register_keeps_newer_existing_copy() {
        let clock = SimClock::from_millis(0);
        let registry = registry(&clock, false);
        let source = Source::local("i-1");

        let newer = instance("i-1", "X").with_last_dirty_timestamp(100);
        registry.register(newer, &source).await.unwrap();

        let older = instance("i-1", "X")
            .with_status(InstanceStatus::Down)
            .with_last_dirty_timestamp(50);
        registry.register(older, &source).await.unwrap();

        let stored = registry.get("X", &id("i-1")).await.unwrap();
        assert_eq!(stored.last_dirty_timestamp, 100);
        assert_eq!(stored.status, InstanceStatus::Up);
    }

    #[tokio::test]
    async fn test_override_survives_reregistration_until_last_unregister() {
        let clock = SimClock::from_millis(0);
        let registry = registry(&clock, false);
        let source = Source::local("i-1");

        registry.register(instance("i-1", "X"), &source).await.unwrap();
        registry
            .status_update("X", &id("i-1"), InstanceStatus::OutOfService, 10)
            .await
            .unwrap();

        registry
            .register(instance("i-1", "X").with_last_dirty_timestamp(20), &source)
            .await
            .unwrap();
        let stored = registry.get("X", &id("i-1")).await.unwrap();
        assert_eq!(stored.effective_status(), InstanceStatus::OutOfService);

        registry.unregister(&id("i-1"), &source).await.unwrap();
        registry.register(instance("i-1", "X"), &source).await.unwrap();
        let stored = registry.get("X", &id("i-1")).await.unwrap();
        assert_eq!(stored.effective_status(), InstanceStatus::Up);
    }

    #[tokio::test]
    async fn test_delete_status_override() {
        let clock = SimClock::from_millis(5_000);
        let registry = registry(&clock, false);
        registry
            .register(instance("i-1", "X"), &Source::local("i-1"))
            .await
            .unwrap();
        registry
            .status_update("X", &id("i-1"), InstanceStatus::OutOfService, 10)
            .await
            .unwrap();

        let outcome = registry
            .delete_status_override("X", &id("i-1"), None)
            .await
            .unwrap();
        assert!(outcome.is_applied());

        let stored = registry.get("X", &id("i-1")).await.unwrap();
        assert_eq!(stored.overridden_status, None);
        assert_eq!(stored.status, InstanceStatus::Unknown);
        assert_eq!(stored.last_dirty_timestamp, 5_000);
    }

    #[tokio::test]
    async fn test_local_update_bumps_dirty_timestamp() {
        let clock = SimClock::from_millis(1_000);
        let registry = registry(&clock, false);
        let source = Source::local("i-1");
        registry
            .register(instance("i-1", "X").with_last_dirty_timestamp(1_000), &source)
            .await
            .unwrap();

        let outcome = registry
            .update(instance("i-1", "X").with_status(InstanceStatus::Down), &source)
            .await
            .unwrap();
        assert!(outcome.is_applied());
        let stored = registry.get("X", &id("i-1")).await.unwrap();
        assert_eq!(stored.last_dirty_timestamp, 1_001);
        assert_eq!(stored.status, InstanceStatus::Down);

        assert_eq!(
            registry
                .update(instance("i-9", "X"), &source)
                .await
                .unwrap(),
            Outcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_record_survives_until_last_holder_leaves() {
        let clock = SimClock::from_millis(0);
        let registry = registry(&clock, false);
        let local = Source::local("i-1");
        let peer = Source::replication("node-b");

        registry.register(instance("i-1", "X"), &local).await.unwrap();
        registry.register(instance("i-1", "X"), &peer).await.unwrap();

        registry.unregister(&id("i-1"), &local).await.unwrap();
        assert!(registry.get("X", &id("i-1")).await.is_some());

        assert_eq!(registry.release_source(&peer).await.unwrap(), 1);
        assert!(registry.get("X", &id("i-1")).await.is_none());
        assert_eq!(
            registry.unregister(&id("i-1"), &local).await.unwrap(),
            Outcome::NotFound
        );
    }

    #[tokio::test]
    async fn test_for_interest_snapshot_then_live() {
        let clock = SimClock::from_millis(0);
        let registry = registry(&clock, false);
        registry
            .register(instance("i-1", "X"), &Source::local("i-1"))
            .await
            .unwrap();
        registry
            .register(instance("i-2", "Y"), &Source::local("i-2"))
            .await
            .unwrap();

        let mut stream = registry
            .for_interest(Interest::Application("X".into()))
            .await
            .unwrap();

        let start = stream.next().await.unwrap().unwrap();
        assert_eq!(start, ChangeNotification::StreamState(StreamState::BufferStart));
        let add = stream.next().await.unwrap().unwrap();
        assert_eq!(add.instance_id(), Some(&id("i-1")));
        let end = stream.next().await.unwrap().unwrap();
        assert_eq!(end, ChangeNotification::StreamState(StreamState::BufferEnd));

        registry
            .register(instance("i-3", "Y"), &Source::local("i-3"))
            .await
            .unwrap();
        registry
            .register(instance("i-4", "X"), &Source::local("i-4"))
            .await
            .unwrap();

        let live = stream.next().await.unwrap().unwrap();
        assert_eq!(live.kind(), Some(ChangeKind::Add));
        assert_eq!(live.instance_id(), Some(&id("i-4")));
    }

    #[tokio::test]
    async fn test_adopt_replaces_local_view() {
        let clock = SimClock::from_millis(1_000);
        let registry = registry(&clock, true);
        let local = instance("i-1", "X").with_last_dirty_timestamp(90);
        registry
            .register(local.clone(), &Source::local("i-1"))
            .await
            .unwrap();

        let winner = local
            .with_status(InstanceStatus::Down)
            .with_last_dirty_timestamp(100);
        assert_eq!(registry.adopt(winner).await.unwrap(), Outcome::Applied);

        let view = registry.get("X", &id("i-1")).await.unwrap();
        assert_eq!(view.last_dirty_timestamp, 100);
        assert_eq!(view.status, InstanceStatus::Down);

        // Still held by the local source only
        registry
            .unregister(&id("i-1"), &Source::local("i-1"))
            .await
            .unwrap();
        assert_eq!(registry.size().await, 0);

        let missing = instance("i-9", "X");
        assert_eq!(registry.adopt(missing).await.unwrap(), Outcome::NotFound);
    }

    #[tokio::test]
    async fn test_capacity_limit() {
        let clock = SimClock::from_millis(0);
        let registry = registry(&clock, false).with_capacity(1);
        registry
            .register(instance("i-1", "X"), &Source::local("i-1"))
            .await
            .unwrap();
        let result = registry
            .register(instance("i-2", "X"), &Source::local("i-2"))
            .await;
        assert!(matches!(result, Err(RegistryError::CapacityExceeded { .. })));
    }

    #[tokio::test]
    async fn test_renewals_last_minute() {
        let clock = SimClock::from_millis(0);
        let registry = registry(&clock, true);
        registry
            .register(instance("i-1", "X"), &Source::local("i-1"))
            .await
            .unwrap();

        registry.renew("X", &id("i-1")).await.unwrap();
        registry.renew("X", &id("i-1")).await.unwrap();
        assert_eq!(registry.renewals_last_minute().await, 0);

        clock.advance_ms(60_000);
        assert_eq!(registry.renewals_last_minute().await, 2);
    }
}

//! Replicating registry decorator
//!
//! TigerStyle: Same [`Registry`] trait in and out; replication is a side
//! effect of a successful local write, never a precondition for it.
//!
//! Only writes made under a `LOCAL` source (and renewals, which arrive from
//! local clients) are queued for peers. Writes applied by the replication
//! handler go to the inner registry directly, so they never loop back.
//! Eviction is not replicated: every node evicts on its own clock.

use crate::client::PeerClient;
use crate::peer::PeerNode;
use crate::protocol::ReplicationItem;
use async_trait::async_trait;
use eddy_core::{
    HttpClient, InstanceId, InstanceInfo, InstanceStatus, Interest, IoContext, ReplicationConfig,
    RetryConfig, Source,
};
use eddy_registry::{
    EvictionReport, InterestStream, Outcome, PreservationSnapshot, Registry, RegistryResult,
};
use std::sync::Arc;
use tracing::{error, info, trace};

/// Registry that forwards local writes to every peer
pub struct Replicator<R: Registry + ?Sized> {
    inner: Arc<R>,
    peers: Vec<PeerNode>,
}

impl<R: Registry + 'static> Replicator<R> {
    /// Wrap `inner` and start one peer per configured URL
    pub fn spawn(
        local_node: &str,
        inner: Arc<R>,
        http: Arc<dyn HttpClient>,
        config: &ReplicationConfig,
        retry: &RetryConfig,
        io: IoContext,
    ) -> Self {
        let peers = config
            .peer_urls
            .iter()
            .map(|url| {
                let client =
                    PeerClient::new(local_node, url.as_str(), http.clone(), config.request_timeout());
                PeerNode::spawn(client, inner.clone(), config, retry, io.clone())
            })
            .collect::<Vec<_>>();
        info!(local_node, peers = peers.len(), "replication started");
        Self::new(inner, peers)
    }
}

impl<R: Registry + ?Sized> Replicator<R> {
    /// Wrap `inner`, replicating to `peers`
    pub fn new(inner: Arc<R>, peers: Vec<PeerNode>) -> Self {
        Self { inner, peers }
    }

    /// Undecorated registry
    pub fn inner(&self) -> &Arc<R> {
        &self.inner
    }

    /// Replication targets
    pub fn peers(&self) -> &[PeerNode] {
        &self.peers
    }

    /// Stop every peer worker
    pub async fn shutdown(self) {
        for peer in self.peers {
            peer.shutdown().await;
        }
    }

    fn fan_out(&self, item: ReplicationItem) {
        trace!(instance_id = %item.id, action = ?item.action, peers = self.peers.len(), "replicating");
        for peer in &self.peers {
            if let Err(e) = peer.enqueue(item.clone()) {
                error!(peer = %peer.peer(), instance_id = %item.id, error = %e, "failed to queue replication item");
            }
        }
    }

    async fn current(&self, app: &str, id: &InstanceId) -> Option<InstanceInfo> {
        self.inner.get(app, id).await.map(|copy| copy.as_ref().clone())
    }
}

#[async_trait]
impl<R: Registry + ?Sized> Registry for Replicator<R> {
    async fn register(&self, instance: InstanceInfo, source: &Source) -> RegistryResult<()> {
        let app = instance.app.clone();
        let id = instance.id.clone();
        self.inner.register(instance, source).await?;
        if source.is_local() {
            if let Some(copy) = self.current(&app, &id).await {
                self.fan_out(ReplicationItem::register(&copy));
            }
        }
        Ok(())
    }

    async fn renew(&self, app: &str, id: &InstanceId) -> RegistryResult<Outcome> {
        let outcome = self.inner.renew(app, id).await?;
        if outcome.is_applied() {
            if let Some(copy) = self.current(app, id).await {
                self.fan_out(ReplicationItem::heartbeat(&copy));
            }
        }
        Ok(outcome)
    }

    async fn update(&self, instance: InstanceInfo, source: &Source) -> RegistryResult<Outcome> {
        let app = instance.app.clone();
        let id = instance.id.clone();
        let outcome = self.inner.update(instance, source).await?;
        if outcome.is_applied() && source.is_local() {
            if let Some(copy) = self.current(&app, &id).await {
                self.fan_out(ReplicationItem::update(&copy));
            }
        }
        Ok(outcome)
    }

    async fn unregister(&self, id: &InstanceId, source: &Source) -> RegistryResult<Outcome> {
        let before = self
            .inner
            .for_snapshot(&Interest::Instance(id.to_string()))
            .await;
        let outcome = self.inner.unregister(id, source).await?;
        if outcome.is_applied() && source.is_local() {
            for copy in before {
                self.fan_out(ReplicationItem::unregister(
                    copy.app.clone(),
                    copy.id.clone(),
                    copy.last_dirty_timestamp,
                ));
            }
        }
        Ok(outcome)
    }

    async fn release_source(&self, source: &Source) -> RegistryResult<usize> {
        // Local sources are named after the instance they hold
        let before = if source.is_local() {
            self.inner
                .for_snapshot(&Interest::Instance(source.name.clone()))
                .await
        } else {
            Vec::new()
        };
        let released = self.inner.release_source(source).await?;
        if released > 0 {
            for copy in before {
                self.fan_out(ReplicationItem::unregister(
                    copy.app.clone(),
                    copy.id.clone(),
                    copy.last_dirty_timestamp,
                ));
            }
        }
        Ok(released)
    }

    async fn evict(&self) -> RegistryResult<EvictionReport> {
        self.inner.evict().await
    }

    async fn status_update(
        &self,
        app: &str,
        id: &InstanceId,
        status: InstanceStatus,
        last_dirty_timestamp: u64,
    ) -> RegistryResult<Outcome> {
        let outcome = self
            .inner
            .status_update(app, id, status, last_dirty_timestamp)
            .await?;
        if outcome.is_applied() {
            self.fan_out(ReplicationItem::status_update(
                app,
                id.clone(),
                status,
                last_dirty_timestamp,
            ));
        }
        Ok(outcome)
    }

    async fn delete_status_override(
        &self,
        app: &str,
        id: &InstanceId,
        new_status: Option<InstanceStatus>,
    ) -> RegistryResult<Outcome> {
        let outcome = self.inner.delete_status_override(app, id, new_status).await?;
        if outcome.is_applied() {
            let last_dirty_timestamp = self
                .current(app, id)
                .await
                .map_or(0, |copy| copy.last_dirty_timestamp);
            self.fan_out(ReplicationItem::delete_status_override(
                app,
                id.clone(),
                new_status,
                last_dirty_timestamp,
            ));
        }
        Ok(outcome)
    }

    async fn store_overridden_status(
        &self,
        app: &str,
        id: &InstanceId,
        status: InstanceStatus,
    ) -> RegistryResult<Outcome> {
        self.inner.store_overridden_status(app, id, status).await
    }

    async fn adopt(&self, instance: InstanceInfo) -> RegistryResult<Outcome> {
        self.inner.adopt(instance).await
    }

    async fn get(&self, app: &str, id: &InstanceId) -> Option<Arc<InstanceInfo>> {
        self.inner.get(app, id).await
    }

    async fn for_snapshot(&self, interest: &Interest) -> Vec<Arc<InstanceInfo>> {
        self.inner.for_snapshot(interest).await
    }

    async fn for_interest(&self, interest: Interest) -> RegistryResult<InterestStream> {
        self.inner.for_interest(interest).await
    }

    async fn renewals_last_minute(&self) -> u64 {
        self.inner.renewals_last_minute().await
    }

    async fn self_preservation(&self) -> PreservationSnapshot {
        self.inner.self_preservation().await
    }

    async fn size(&self) -> usize {
        self.inner.size().await
    }
}

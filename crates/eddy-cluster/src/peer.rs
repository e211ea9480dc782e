//! Per-peer replication queue
//!
//! TigerStyle: One bounded queue and one worker task per peer, explicit
//! shutdown, every failure mode handled in one place.
//!
//! The worker wakes every `batch_interval_ms` and posts queued items in
//! batches of at most `batch_items_count_max`. What happens next depends on
//! the answer:
//!
//! | Answer                     | Action                                     |
//! |----------------------------|--------------------------------------------|
//! | 503                        | keep the batch, retry after `retry_delay_ms` |
//! | transport error or 5xx     | keep the batch, retry after backoff        |
//! | other 4xx, redirect loop   | drop the batch                             |
//! | response length mismatch   | drop the response, items are not retried   |
//! | heartbeat item 404         | queue a registration of our copy           |
//! | heartbeat item 409         | resolve against the peer's copy            |
//!
//! Items older than [`REPLICATION_ITEM_AGE_MS_MAX`] are dropped instead of
//! being sent.

use crate::client::PeerClient;
use crate::conflict::{resolve, Resolution};
use crate::error::{ReplicationError, ReplicationResult};
use crate::protocol::{Action, ItemResponse, ReplicationItem};
use eddy_channel::Backoff;
use eddy_core::{InstanceInfo, IoContext, ReplicationConfig, RetryConfig};
use eddy_registry::Registry;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// =============================================================================
// TigerStyle Constants
// =============================================================================

/// Age after which a queued item is dropped instead of sent
pub const REPLICATION_ITEM_AGE_MS_MAX: u64 = 30 * 1000;

// =============================================================================
// Statistics
// =============================================================================

/// Counters for one peer
#[derive(Debug, Default)]
pub struct PeerStats {
    batches_sent: AtomicU64,
    batches_rescheduled: AtomicU64,
    items_dropped: AtomicU64,
    conflicts_adopted: AtomicU64,
}

/// Point-in-time copy of [`PeerStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeerStatsSnapshot {
    pub batches_sent: u64,
    pub batches_rescheduled: u64,
    pub items_dropped: u64,
    pub conflicts_adopted: u64,
}

impl PeerStats {
    fn snapshot(&self) -> PeerStatsSnapshot {
        PeerStatsSnapshot {
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_rescheduled: self.batches_rescheduled.load(Ordering::Relaxed),
            items_dropped: self.items_dropped.load(Ordering::Relaxed),
            conflicts_adopted: self.conflicts_adopted.load(Ordering::Relaxed),
        }
    }

    fn dropped(&self, count: usize) {
        self.items_dropped.fetch_add(count as u64, Ordering::Relaxed);
    }
}

// =============================================================================
// PeerNode
// =============================================================================

#[derive(Debug)]
struct Queued {
    item: ReplicationItem,
    enqueued_ms: u64,
}

/// Replication target with its own queue and worker
pub struct PeerNode {
    client: Arc<PeerClient>,
    sender: mpsc::Sender<Queued>,
    stats: Arc<PeerStats>,
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
    io: IoContext,
    queue_depth_max: usize,
}

impl PeerNode {
    /// Start the worker for `client`'s peer
    ///
    /// `registry` is the undecorated local store: conflict adoption must not
    /// be replicated again.
    pub fn spawn(
        client: PeerClient,
        registry: Arc<dyn Registry>,
        config: &ReplicationConfig,
        retry: &RetryConfig,
        io: IoContext,
    ) -> Self {
        assert!(config.batch_items_count_max > 0);
        assert!(config.queue_depth_max >= config.batch_items_count_max);

        let client = Arc::new(client);
        let (sender, receiver) = mpsc::channel(config.queue_depth_max);
        let stats = Arc::new(PeerStats::default());
        let shutdown = Arc::new(Notify::new());

        let worker = Worker {
            client: client.clone(),
            registry,
            receiver,
            pending: VecDeque::new(),
            stats: stats.clone(),
            shutdown: shutdown.clone(),
            io: io.clone(),
            batch_items_count_max: config.batch_items_count_max,
            batch_interval_ms: config.batch_interval_ms,
            retry_delay_ms: config.retry_delay_ms,
            pending_max: config.queue_depth_max,
            backoff: Backoff::from_config(retry),
        };
        let task = tokio::spawn(worker.run());

        info!(peer = %client.peer(), "replication peer started");
        Self {
            client,
            sender,
            stats,
            shutdown,
            task: Some(task),
            io,
            queue_depth_max: config.queue_depth_max,
        }
    }

    /// Peer base URL
    pub fn peer(&self) -> &str {
        self.client.peer()
    }

    /// Current counters
    pub fn stats(&self) -> PeerStatsSnapshot {
        self.stats.snapshot()
    }

    /// Queue an item for the next batch
    pub fn enqueue(&self, item: ReplicationItem) -> ReplicationResult<()> {
        let queued = Queued {
            item,
            enqueued_ms: self.io.now_ms(),
        };
        self.sender.try_send(queued).map_err(|e| match e {
            TrySendError::Full(_) => {
                self.stats.dropped(1);
                ReplicationError::QueueFull {
                    peer: self.peer().to_string(),
                    limit: self.queue_depth_max,
                }
            }
            TrySendError::Closed(_) => ReplicationError::ShuttingDown {
                peer: self.peer().to_string(),
            },
        })
    }

    /// Stop the worker; queued items are discarded
    pub async fn shutdown(mut self) {
        self.shutdown.notify_one();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!(peer = %self.client.peer(), "replication peer stopped");
    }
}

impl Drop for PeerNode {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

struct Worker {
    client: Arc<PeerClient>,
    registry: Arc<dyn Registry>,
    receiver: mpsc::Receiver<Queued>,
    pending: VecDeque<Queued>,
    stats: Arc<PeerStats>,
    shutdown: Arc<Notify>,
    io: IoContext,
    batch_items_count_max: usize,
    batch_interval_ms: u64,
    retry_delay_ms: u64,
    pending_max: usize,
    backoff: Backoff,
}

impl Worker {
    async fn run(mut self) {
        'outer: loop {
            if !self.pause(self.batch_interval_ms).await {
                break;
            }
            self.collect();

            while let Some(batch) = self.next_batch() {
                let items: Vec<ReplicationItem> = batch.iter().map(|q| q.item.clone()).collect();
                let delay_ms = match self.client.submit_batch(&items).await {
                    Ok(responses) => {
                        self.backoff.reset();
                        self.stats.batches_sent.fetch_add(1, Ordering::Relaxed);
                        self.handle_responses(batch, responses).await;
                        continue;
                    }
                    Err(ReplicationError::ServerBusy { .. }) => {
                        warn!(
                            peer = %self.client.peer(),
                            items = batch.len(),
                            delay_ms = self.retry_delay_ms,
                            "peer busy, rescheduling batch"
                        );
                        self.retry_delay_ms
                    }
                    Err(e) if e.is_retriable() => {
                        let delay_ms = self.backoff.next_delay_ms();
                        warn!(
                            peer = %self.client.peer(),
                            items = batch.len(),
                            delay_ms,
                            error = %e,
                            "replication failed, retrying after backoff"
                        );
                        delay_ms
                    }
                    Err(e) => {
                        error!(
                            peer = %self.client.peer(),
                            items = batch.len(),
                            error = %e,
                            "discarding replication batch"
                        );
                        self.stats.dropped(batch.len());
                        continue;
                    }
                };

                self.stats.batches_rescheduled.fetch_add(1, Ordering::Relaxed);
                self.requeue(batch);
                if !self.pause(delay_ms).await {
                    break 'outer;
                }
                self.collect();
            }
        }
        debug!(peer = %self.client.peer(), pending = self.pending.len(), "replication worker exiting");
    }

    async fn pause(&self, delay_ms: u64) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.notified() => false,
            _ = self.io.sleep_ms(delay_ms) => true,
        }
    }

    fn collect(&mut self) {
        while self.pending.len() < self.pending_max {
            match self.receiver.try_recv() {
                Ok(queued) => self.pending.push_back(queued),
                Err(_) => break,
            }
        }
    }

    fn next_batch(&mut self) -> Option<Vec<Queued>> {
        let now_ms = self.io.now_ms();
        let mut batch = Vec::new();
        while batch.len() < self.batch_items_count_max {
            let Some(queued) = self.pending.pop_front() else {
                break;
            };
            let age_ms = now_ms.saturating_sub(queued.enqueued_ms);
            if age_ms > REPLICATION_ITEM_AGE_MS_MAX {
                warn!(
                    peer = %self.client.peer(),
                    instance_id = %queued.item.id,
                    action = ?queued.item.action,
                    age_ms,
                    "replication item expired"
                );
                self.stats.dropped(1);
                continue;
            }
            batch.push(queued);
        }
        (!batch.is_empty()).then_some(batch)
    }

    fn requeue(&mut self, batch: Vec<Queued>) {
        for queued in batch.into_iter().rev() {
            self.pending.push_front(queued);
        }
    }

    async fn handle_responses(&mut self, batch: Vec<Queued>, responses: Vec<ItemResponse>) {
        debug_assert_eq!(batch.len(), responses.len());
        for (queued, response) in batch.into_iter().zip(responses) {
            if response.is_success() {
                continue;
            }
            let item = queued.item;
            match (item.action, response.status_code) {
                (Action::Heartbeat, 404) => self.reregister(item).await,
                (Action::Heartbeat, 409) => match response.response_entity {
                    Some(peer_copy) => self.reconcile(peer_copy).await,
                    None => warn!(
                        peer = %self.client.peer(),
                        instance_id = %item.id,
                        "409 without the peer's copy"
                    ),
                },
                (action, status) => {
                    warn!(
                        peer = %self.client.peer(),
                        instance_id = %item.id,
                        action = ?action,
                        status,
                        "replication item rejected"
                    );
                    self.stats.dropped(1);
                }
            }
        }
    }

    async fn reregister(&mut self, item: ReplicationItem) {
        let copy = match self.registry.get(&item.app_name, &item.id).await {
            Some(current) => Some(current.as_ref().clone()),
            None => item.instance_info,
        };
        let Some(copy) = copy else {
            debug!(peer = %self.client.peer(), instance_id = %item.id, "nothing to re-register");
            return;
        };
        info!(
            peer = %self.client.peer(),
            instance_id = %copy.id,
            status = %copy.status,
            "peer is missing instance, re-registering"
        );
        self.pending.push_back(Queued {
            item: ReplicationItem::register(&copy),
            enqueued_ms: self.io.now_ms(),
        });
    }

    async fn reconcile(&mut self, peer_copy: InstanceInfo) {
        let Some(local) = self.registry.get(&peer_copy.app, &peer_copy.id).await else {
            debug!(peer = %self.client.peer(), instance_id = %peer_copy.id, "conflict for instance no longer held");
            return;
        };
        warn!(
            peer = %self.client.peer(),
            instance_id = %peer_copy.id,
            local = local.last_dirty_timestamp,
            remote = peer_copy.last_dirty_timestamp,
            "peer disagrees on instance copy"
        );
        match resolve(&local, &peer_copy) {
            Resolution::KeepLocal => {}
            Resolution::Adopt(winner) => match self.registry.adopt(winner).await {
                Ok(outcome) if outcome.is_applied() => {
                    self.stats.conflicts_adopted.fetch_add(1, Ordering::Relaxed);
                }
                Ok(_) => {}
                Err(e) => error!(instance_id = %peer_copy.id, error = %e, "failed to adopt peer copy"),
            },
        }
    }
}

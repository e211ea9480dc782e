//! Interest multiplexer
//!
//! TigerStyle: One forwarding task per atomic interest, all feeding a single
//! bounded output queue.
//!
//! A subscriber's interest changes over time. Each update is flattened into
//! atomic interests and diffed against the current set: new atoms get a
//! registry subscription, dropped atoms have theirs cancelled, and atoms
//! present in both are left untouched so no snapshot is replayed for them.
//!
//! ```text
//!   update(App(A) ∪ App(B))           update(App(B) ∪ Vip(v))
//!     App(A) ──task──┐                  App(A)  aborted
//!     App(B) ──task──┼──► output        App(B) ──task──┐ (kept)
//!                    │                  Vip(v) ──task──┴──► output
//! ```

use crate::error::{RegistryError, RegistryResult};
use crate::registry::{InterestStream, Registry};
use eddy_core::{ChangeNotification, Interest};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// Capacity of the multiplexed output queue
pub const MULTIPLEXER_QUEUE_DEPTH_MAX: usize = 4096;

/// Item delivered by the multiplexer
pub type MultiplexedItem = RegistryResult<ChangeNotification>;

/// Merges registry subscriptions for a changing interest
pub struct InterestMultiplexer<R: Registry + ?Sized + 'static> {
    registry: Arc<R>,
    tx: mpsc::Sender<MultiplexedItem>,
    subscriptions: BTreeMap<Interest, JoinHandle<()>>,
}

impl<R: Registry + ?Sized + 'static> InterestMultiplexer<R> {
    /// Create a multiplexer and the receiver for its merged output
    ///
    /// If an upstream subscription ends on its own, an
    /// [`RegistryError::UpstreamCompleted`] item is delivered. Cancelling a
    /// subscription through [`update`](Self::update) delivers nothing.
    pub fn new(registry: Arc<R>) -> (Self, mpsc::Receiver<MultiplexedItem>) {
        let (tx, rx) = mpsc::channel(MULTIPLEXER_QUEUE_DEPTH_MAX);
        (
            Self {
                registry,
                tx,
                subscriptions: BTreeMap::new(),
            },
            rx,
        )
    }

    /// Atomic interests currently subscribed
    pub fn interests(&self) -> impl Iterator<Item = &Interest> {
        self.subscriptions.keys()
    }

    /// Replace the subscribed interest
    pub async fn update(&mut self, interest: &Interest) -> RegistryResult<()> {
        let atoms = interest.flatten();

        let dropped: Vec<Interest> = self
            .subscriptions
            .keys()
            .filter(|atom| !atoms.contains(*atom))
            .cloned()
            .collect();
        for atom in dropped {
            if let Some(task) = self.subscriptions.remove(&atom) {
                task.abort();
                debug!(interest = ?atom, "unsubscribed");
            }
        }

        for atom in atoms {
            if self.subscriptions.contains_key(&atom) {
                continue;
            }
            let stream = self.registry.for_interest(atom.clone()).await?;
            let task = tokio::spawn(forward(atom.clone(), stream, self.tx.clone()));
            debug!(interest = ?atom, "subscribed");
            self.subscriptions.insert(atom, task);
        }

        Ok(())
    }

    /// Cancel every subscription
    pub fn unregister(&mut self) {
        for (atom, task) in std::mem::take(&mut self.subscriptions) {
            task.abort();
            debug!(interest = ?atom, "unsubscribed");
        }
    }
}

impl<R: Registry + ?Sized + 'static> Drop for InterestMultiplexer<R> {
    fn drop(&mut self) {
        self.unregister();
    }
}

async fn forward(atom: Interest, mut stream: InterestStream, tx: mpsc::Sender<MultiplexedItem>) {
    while let Some(item) = stream.next().await {
        let failed = item.is_err();
        if tx.send(item).await.is_err() || failed {
            return;
        }
    }
    let _ = tx.send(Err(RegistryError::upstream_completed(&atom))).await;
}

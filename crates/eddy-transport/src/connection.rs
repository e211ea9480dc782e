//! Reliable message connection
//!
//! TigerStyle: FIFO acknowledgement queue, explicit deadlines, a single
//! terminal transition.
//!
//! ```text
//!   submit_with_ack(A) ─┐          pending: [A, B]
//!   submit_with_ack(B) ─┤
//!                       ▼
//!   Acknowledgement ──► completes A   pending: [B]
//!   Acknowledgement ──► completes B   pending: []
//!   Acknowledgement ──► unexpected: connection fails
//! ```
//!
//! The connection is `Running` until it becomes `Completed` (shutdown or the
//! peer closed cleanly) or `Failed` (protocol violation, acknowledgement
//! timeout, transport error). Entering either terminal state completes every
//! pending acknowledgement except one that timed out, which fails.

use crate::error::{TransportError, TransportResult};
use crate::link::{Inbound, Link, LinkTasks, LINK_DRAIN_GRACE_MS};
use crate::message::{Message, ProtocolType};
use eddy_core::constants::{ACK_PENDING_COUNT_MAX, CONNECTION_QUEUE_DEPTH_MAX};
use eddy_core::IoContext;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// =============================================================================
// Lifecycle
// =============================================================================

/// Connection lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    /// Exchanging messages
    Running,
    /// Closed cleanly
    Completed,
    /// Closed on an error
    Failed(String),
}

impl Lifecycle {
    /// Whether this is a terminal state
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Lifecycle::Running)
    }
}

async fn terminated(mut lifecycle: watch::Receiver<Lifecycle>) {
    // A dropped sender also means the connection is gone
    let _ = lifecycle.wait_for(Lifecycle::is_terminal).await;
}

// =============================================================================
// Connection
// =============================================================================

struct PendingAck {
    id: u64,
    deadline_ms: Option<u64>,
    timeout_ms: u64,
    done: oneshot::Sender<TransportResult<()>>,
}

struct Shared {
    name: String,
    io: IoContext,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
    pending: Mutex<VecDeque<PendingAck>>,
    next_ack_id: AtomicU64,
    lifecycle: watch::Sender<Lifecycle>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn sender(&self) -> TransportResult<mpsc::Sender<Message>> {
        lock(&self.outbound)
            .clone()
            .ok_or_else(|| TransportError::closed(&self.name))
    }

    /// Enter a terminal state; later calls are no-ops
    fn finish(&self, outcome: Lifecycle) {
        debug_assert!(outcome.is_terminal());
        let transitioned = self.lifecycle.send_if_modified(|current| {
            if current.is_terminal() {
                return false;
            }
            *current = outcome.clone();
            true
        });
        if !transitioned {
            return;
        }

        // Closing the outbound queue lets the writer flush and shut down
        lock(&self.outbound).take();

        let drained: Vec<PendingAck> = lock(&self.pending).drain(..).collect();
        let drained_count = drained.len();
        for entry in drained {
            let _ = entry.done.send(Ok(()));
        }

        match &outcome {
            Lifecycle::Failed(reason) => {
                warn!(connection = %self.name, reason = %reason, drained = drained_count, "connection failed")
            }
            _ => info!(connection = %self.name, drained = drained_count, "connection completed"),
        }
    }
}

/// Acknowledged message exchange over a [`Link`]
///
/// Incoming acknowledgements are consumed by the connection; every other
/// incoming message is delivered through [`incoming`](Self::incoming), one
/// at a time.
pub struct MessageConnection {
    shared: Arc<Shared>,
    protocol: Option<ProtocolType>,
    incoming: tokio::sync::Mutex<mpsc::Receiver<Message>>,
    dispatcher: JoinHandle<()>,
    expiry: JoinHandle<()>,
}

impl MessageConnection {
    /// Take over `link`, checking acknowledgement deadlines every
    /// `ack_check_interval_ms`
    pub fn new(link: Link, ack_check_interval_ms: u64, io: IoContext) -> Self {
        assert!(ack_check_interval_ms > 0, "ack check interval must be positive");

        let name = link.name().to_string();
        let protocol = link.protocol();
        let (outbound, inbound, tasks) = link.into_parts();
        let (lifecycle, _) = watch::channel(Lifecycle::Running);
        let (incoming_tx, incoming_rx) = mpsc::channel(CONNECTION_QUEUE_DEPTH_MAX);

        let shared = Arc::new(Shared {
            name,
            io,
            outbound: Mutex::new(Some(outbound)),
            pending: Mutex::new(VecDeque::new()),
            next_ack_id: AtomicU64::new(0),
            lifecycle,
        });

        let dispatcher = tokio::spawn(dispatch(shared.clone(), inbound, incoming_tx, tasks));
        let expiry = tokio::spawn(expire(shared.clone(), ack_check_interval_ms));

        Self {
            shared,
            protocol,
            incoming: tokio::sync::Mutex::new(incoming_rx),
            dispatcher,
            expiry,
        }
    }

    /// Connection name for logs
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Protocol the link was opened with, if it was bound at creation
    pub fn protocol(&self) -> Option<ProtocolType> {
        self.protocol
    }

    /// Send without waiting for an acknowledgement
    pub async fn submit(&self, message: Message) -> TransportResult<()> {
        let sender = self.shared.sender()?;
        sender
            .send(message)
            .await
            .map_err(|_| TransportError::closed(&self.shared.name))
    }

    /// Send and wait for the matching acknowledgement
    ///
    /// `timeout_ms` of zero waits indefinitely. Shutting the connection down
    /// completes the wait successfully.
    pub async fn submit_with_ack(&self, message: Message, timeout_ms: u64) -> TransportResult<()> {
        let (done, rx) = oneshot::channel();
        let id = self.shared.next_ack_id.fetch_add(1, Ordering::Relaxed);
        let sender = {
            let mut pending = lock(&self.shared.pending);
            // Checked under the pending lock: a connection that finishes after
            // this point drains the entry pushed below
            let sender = self.shared.sender()?;
            if pending.len() >= ACK_PENDING_COUNT_MAX {
                return Err(TransportError::TooManyPending {
                    count: pending.len(),
                    limit: ACK_PENDING_COUNT_MAX,
                });
            }
            let deadline_ms =
                (timeout_ms > 0).then(|| self.shared.io.now_ms().saturating_add(timeout_ms));
            // Queued before sending so the acknowledgement cannot overtake it
            pending.push_back(PendingAck {
                id,
                deadline_ms,
                timeout_ms,
                done,
            });
            sender
        };

        if sender.send(message).await.is_err() {
            // Never sent, so no acknowledgement will come for it
            lock(&self.shared.pending).retain(|entry| entry.id != id);
            return Err(TransportError::closed(&self.shared.name));
        }
        rx.await
            .map_err(|_| TransportError::closed(&self.shared.name))?
    }

    /// Acknowledge the oldest unacknowledged message from the peer
    pub async fn acknowledge(&self) -> TransportResult<()> {
        self.submit(Message::Acknowledgement).await
    }

    /// Next non-acknowledgement message; `None` once the connection ended
    pub async fn incoming(&self) -> Option<Message> {
        self.incoming.lock().await.recv().await
    }

    /// Next already-delivered message, without waiting
    pub fn try_incoming(&self) -> Option<Message> {
        self.incoming.try_lock().ok()?.try_recv().ok()
    }

    /// Number of sends awaiting acknowledgement
    pub fn pending_acks(&self) -> usize {
        lock(&self.shared.pending).len()
    }

    /// Watch the lifecycle
    pub fn lifecycle(&self) -> watch::Receiver<Lifecycle> {
        self.shared.lifecycle.subscribe()
    }

    /// Current lifecycle state
    pub fn state(&self) -> Lifecycle {
        self.shared.lifecycle.borrow().clone()
    }

    /// Wait until the connection reaches a terminal state
    pub async fn closed(&self) -> Lifecycle {
        terminated(self.lifecycle()).await;
        self.state()
    }

    /// Close the connection, completing every pending acknowledgement
    pub fn shutdown(&self) {
        self.shared.finish(Lifecycle::Completed);
    }
}

impl Drop for MessageConnection {
    fn drop(&mut self) {
        self.shared.finish(Lifecycle::Completed);
        self.dispatcher.abort();
        self.expiry.abort();
    }
}

async fn dispatch(
    shared: Arc<Shared>,
    mut inbound: Inbound,
    incoming: mpsc::Sender<Message>,
    tasks: LinkTasks,
) {
    let stop = terminated(shared.lifecycle.subscribe());
    tokio::pin!(stop);

    loop {
        let item = tokio::select! {
            _ = &mut stop => break,
            item = inbound.recv() => item,
        };
        match item {
            Some(Ok(Message::Acknowledgement)) => {
                let entry = lock(&shared.pending).pop_front();
                match entry {
                    Some(entry) => {
                        let _ = entry.done.send(Ok(()));
                    }
                    None => {
                        shared.finish(Lifecycle::Failed(
                            "unexpected acknowledgement".to_string(),
                        ));
                        break;
                    }
                }
            }
            Some(Ok(message)) => {
                let delivered = tokio::select! {
                    _ = &mut stop => break,
                    sent = incoming.send(message) => sent.is_ok(),
                };
                if !delivered {
                    debug!(connection = %shared.name, "incoming message dropped, no reader");
                }
            }
            Some(Err(e)) => {
                shared.finish(Lifecycle::Failed(e.to_string()));
                break;
            }
            None => {
                shared.finish(Lifecycle::Completed);
                break;
            }
        }
    }

    drop(inbound);
    tasks.drain(&shared.io, LINK_DRAIN_GRACE_MS).await;
}

async fn expire(shared: Arc<Shared>, check_interval_ms: u64) {
    let stop = terminated(shared.lifecycle.subscribe());
    tokio::pin!(stop);

    loop {
        tokio::select! {
            _ = &mut stop => return,
            _ = shared.io.sleep_ms(check_interval_ms) => {}
        }

        let now_ms = shared.io.now_ms();
        let expired = {
            let mut pending = lock(&shared.pending);
            let overdue = pending
                .front()
                .and_then(|entry| entry.deadline_ms)
                .is_some_and(|deadline_ms| now_ms > deadline_ms);
            if overdue {
                pending.pop_front()
            } else {
                None
            }
        };

        if let Some(entry) = expired {
            let _ = entry.done.send(Err(TransportError::AckTimeout {
                name: shared.name.clone(),
                timeout_ms: entry.timeout_ms,
            }));
            shared.finish(Lifecycle::Failed(format!(
                "acknowledgement timed out after {}ms",
                entry.timeout_ms
            )));
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ProtocolType;
    use eddy_dst::SimClock;

    fn pair(clock: &SimClock) -> (Arc<MessageConnection>, Link) {
        let (client, server) = Link::memory_pair(ProtocolType::Registration);
        let io = IoContext::new(Arc::new(clock.clone()));
        (Arc::new(MessageConnection::new(client, 1_000, io)), server)
    }

    async fn settle() {
        for _ in 0..32 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_acks_complete_in_fifo_order() {
        let clock = SimClock::from_millis(0);
        let (connection, mut peer) = pair(&clock);

        let first = tokio::spawn({
            let connection = connection.clone();
            async move { connection.submit_with_ack(Message::unregister(None), 0).await }
        });
        settle().await;
        let second = tokio::spawn({
            let connection = connection.clone();
            async move { connection.submit_with_ack(Message::Heartbeat, 0).await }
        });
        settle().await;

        assert_eq!(peer.recv().await.unwrap().unwrap(), Message::unregister(None));
        assert_eq!(peer.recv().await.unwrap().unwrap(), Message::Heartbeat);
        assert_eq!(connection.pending_acks(), 2);

        peer.send(Message::Acknowledgement).await.unwrap();
        settle().await;
        assert!(first.is_finished());
        assert!(!second.is_finished());

        peer.send(Message::Acknowledgement).await.unwrap();
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();
        assert_eq!(connection.state(), Lifecycle::Running);
    }

    #[tokio::test]
    async fn test_unexpected_ack_fails_connection() {
        let clock = SimClock::from_millis(0);
        let (connection, peer) = pair(&clock);

        peer.send(Message::Acknowledgement).await.unwrap();
        let state = connection.closed().await;
        assert!(matches!(state, Lifecycle::Failed(reason) if reason.contains("unexpected")));
        assert!(connection.submit(Message::Heartbeat).await.is_err());
    }

    #[tokio::test]
    async fn test_ack_timeout_fails_oldest_and_tears_down() {
        let clock = SimClock::from_millis(0);
        let (connection, _peer) = pair(&clock);

        let waiting = tokio::spawn({
            let connection = connection.clone();
            async move { connection.submit_with_ack(Message::Heartbeat, 500).await }
        });
        settle().await;

        clock.advance_ms(1_000);
        let result = waiting.await.unwrap();
        assert!(matches!(result, Err(TransportError::AckTimeout { timeout_ms: 500, .. })));
        assert!(matches!(connection.closed().await, Lifecycle::Failed(_)));
    }

    #[tokio::test]
    async fn test_zero_timeout_never_expires() {
        let clock = SimClock::from_millis(0);
        let (connection, _peer) = pair(&clock);

        let waiting = tokio::spawn({
            let connection = connection.clone();
            async move { connection.submit_with_ack(Message::Heartbeat, 0).await }
        });
        settle().await;

        for _ in 0..5 {
            clock.advance_ms(60_000);
            settle().await;
        }
        assert!(!waiting.is_finished());
        assert_eq!(connection.state(), Lifecycle::Running);

        connection.shutdown();
        waiting.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_completes_pending() {
        let clock = SimClock::from_millis(0);
        let (connection, mut peer) = pair(&clock);

        let waiting = tokio::spawn({
            let connection = connection.clone();
            async move { connection.submit_with_ack(Message::Heartbeat, 10_000).await }
        });
        settle().await;

        connection.shutdown();
        waiting.await.unwrap().unwrap();
        assert_eq!(connection.closed().await, Lifecycle::Completed);

        // The peer observes the close as a clean end of stream
        assert_eq!(peer.recv().await.unwrap().unwrap(), Message::Heartbeat);
        assert!(peer.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_incoming_skips_acknowledgements() {
        let clock = SimClock::from_millis(0);
        let (connection, peer) = pair(&clock);

        let waiting = tokio::spawn({
            let connection = connection.clone();
            async move { connection.submit_with_ack(Message::Heartbeat, 0).await }
        });
        settle().await;

        peer.send(Message::Acknowledgement).await.unwrap();
        peer.send(Message::unregister(None)).await.unwrap();
        assert_eq!(connection.incoming().await, Some(Message::unregister(None)));
        waiting.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_peer_close_completes_connection() {
        let clock = SimClock::from_millis(0);
        let (connection, peer) = pair(&clock);
        drop(peer);

        assert_eq!(connection.closed().await, Lifecycle::Completed);
        assert_eq!(connection.incoming().await, None);
    }

    #[tokio::test]
    async fn test_ack_sends_on_closed_connection_leave_nothing_pending() {
        let clock = SimClock::from_millis(0);
        let (connection, _peer) = pair(&clock);
        connection.shutdown();

        for _ in 0..=ACK_PENDING_COUNT_MAX {
            let result = connection.submit_with_ack(Message::Heartbeat, 500).await;
            assert!(matches!(result, Err(TransportError::ConnectionClosed { .. })));
        }
        assert_eq!(connection.pending_acks(), 0);
    }
}

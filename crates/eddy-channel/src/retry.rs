//! Reconnect with exponential backoff
//!
//! TigerStyle: Bounded delays, explicit generations, one task owns the
//! delegate.
//!
//! A [`RetryingConnection`] keeps a delegate connection alive. When the
//! delegate ends it waits out the backoff and dials again:
//!
//! ```text
//!   stateless:  old ends ─► close old ─► wait ─► connect new ─► swap
//!   stateful:   old ends ─► wait ─► connect new ─► restore on new ─► swap ─► close old
//! ```
//!
//! Delays start at `d0` and double per consecutive failure up to `10 × d0`.
//! A delegate that lives longer than the maximum delay resets the backoff.
//! An error that is not retriable closes the wrapper for good.

use crate::error::{ChannelError, ChannelResult};
use async_trait::async_trait;
use eddy_core::constants::RECONNECT_BACKOFF_MULTIPLIER_MAX;
use eddy_core::{IoContext, RetryConfig};
use eddy_transport::{Lifecycle, Link, Message, MessageConnection, TransportError, TransportResult};
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{watch, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// =============================================================================
// Backoff
// =============================================================================

/// Exponential reconnect delay
#[derive(Debug, Clone)]
pub struct Backoff {
    initial_ms: u64,
    max_ms: u64,
    current_ms: u64,
}

impl Backoff {
    /// Start at `initial_ms`, cap at ten times that
    pub fn new(initial_ms: u64) -> Self {
        assert!(initial_ms > 0, "initial delay must be positive");
        Self {
            initial_ms,
            max_ms: initial_ms.saturating_mul(RECONNECT_BACKOFF_MULTIPLIER_MAX),
            current_ms: initial_ms,
        }
    }

    /// Backoff from reconnect configuration
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.reconnect_delay_ms)
    }

    /// Upper bound on any delay
    pub fn max_ms(&self) -> u64 {
        self.max_ms
    }

    /// Delay before the next attempt; doubles the one after
    pub fn next_delay_ms(&mut self) -> u64 {
        let delay_ms = self.current_ms;
        self.current_ms = self.current_ms.saturating_mul(2).min(self.max_ms);
        delay_ms
    }

    /// Reset once a connection outlived the maximum delay
    pub fn observe_lifetime(&mut self, lived_ms: u64) {
        if lived_ms > self.max_ms {
            self.reset();
        }
    }

    /// Back to the initial delay
    pub fn reset(&mut self) {
        self.current_ms = self.initial_ms;
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Opens and watches delegate connections
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// The delegate type
    type Connection: Send + Sync + 'static;

    /// Open a fresh delegate
    async fn connect(&self) -> ChannelResult<Self::Connection>;

    /// Re-establish application state on a fresh delegate before it is used
    async fn restore(&self, _connection: &Self::Connection) -> ChannelResult<()> {
        Ok(())
    }

    /// Resolve when the delegate ends: `Ok` for a clean close
    async fn closed(&self, connection: &Self::Connection) -> ChannelResult<()>;

    /// Release a delegate
    async fn close(&self, connection: &Self::Connection);
}

/// How the wrapper replaces a failed delegate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectMode {
    /// Release the old delegate, then open a fresh one
    Stateless,
    /// Open and restore a new delegate, swap it in, then release the old one
    Stateful,
}

/// Externally visible state of a [`RetryingConnection`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryState {
    /// No usable delegate; connecting or waiting out the backoff
    Connecting,
    /// Delegate number `generation` is live
    Connected { generation: u64 },
    /// Closed for good
    Closed { reason: String },
}

// =============================================================================
// Retrying Connection
// =============================================================================

/// A connection that reconnects itself
pub struct RetryingConnection<C: Connector> {
    current: Arc<RwLock<Option<Arc<C::Connection>>>>,
    state: watch::Receiver<RetryState>,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl<C: Connector> RetryingConnection<C> {
    /// Start connecting in the background
    pub fn start(connector: Arc<C>, mode: ReconnectMode, backoff: Backoff, io: IoContext) -> Self {
        let current = Arc::new(RwLock::new(None));
        let (state_tx, state) = watch::channel(RetryState::Connecting);
        let shutdown = Arc::new(Notify::new());

        let worker = Worker {
            connector,
            mode,
            backoff,
            io,
            current: current.clone(),
            state: state_tx,
            shutdown: shutdown.clone(),
            generation: 0,
        };
        let task = tokio::spawn(worker.run());

        Self {
            current,
            state,
            shutdown,
            task,
        }
    }

    /// The live delegate, if any
    pub async fn current(&self) -> Option<Arc<C::Connection>> {
        self.current.read().await.clone()
    }

    /// Current state
    pub fn state(&self) -> RetryState {
        self.state.borrow().clone()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<RetryState> {
        self.state.clone()
    }

    /// Wait for delegate `generation` or a later one; `None` once closed
    pub async fn connected(&self, generation: u64) -> Option<Arc<C::Connection>> {
        let mut state = self.state.clone();
        let reached = state
            .wait_for(|s| match s {
                RetryState::Connected { generation: g } => *g >= generation,
                RetryState::Closed { .. } => true,
                RetryState::Connecting => false,
            })
            .await
            .map(|s| matches!(*s, RetryState::Connected { .. }))
            .unwrap_or(false);
        if reached {
            self.current().await
        } else {
            None
        }
    }

    /// Close the wrapper and its delegate
    pub async fn close(mut self) {
        self.shutdown.notify_one();
        let _ = (&mut self.task).await;
    }
}

impl<C: Connector> Drop for RetryingConnection<C> {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Worker<C: Connector> {
    connector: Arc<C>,
    mode: ReconnectMode,
    backoff: Backoff,
    io: IoContext,
    current: Arc<RwLock<Option<Arc<C::Connection>>>>,
    state: watch::Sender<RetryState>,
    shutdown: Arc<Notify>,
    generation: u64,
}

enum Step {
    Continue,
    Stop { reason: String },
}

impl<C: Connector> Worker<C> {
    async fn run(mut self) {
        let mut previous: Option<Arc<C::Connection>> = None;

        let reason = loop {
            let attempt = tokio::select! {
                _ = self.shutdown.notified() => break "closed by caller".to_string(),
                attempt = self.open() => attempt,
            };

            let connection = match attempt {
                Ok(connection) => connection,
                Err(e) if !e.is_retriable() => break e.to_string(),
                Err(e) => {
                    warn!(error = %e, "connect failed");
                    match self.wait().await {
                        Step::Continue => continue,
                        Step::Stop { reason } => break reason,
                    }
                }
            };

            *self.current.write().await = Some(connection.clone());
            self.generation += 1;
            self.state.send_replace(RetryState::Connected {
                generation: self.generation,
            });
            info!(generation = self.generation, "delegate connected");

            if let Some(old) = previous.take() {
                self.connector.close(&old).await;
            }

            let started_ms = self.io.now_ms();
            let outcome = tokio::select! {
                _ = self.shutdown.notified() => break "closed by caller".to_string(),
                outcome = self.connector.closed(&connection) => outcome,
            };
            self.backoff.observe_lifetime(self.io.elapsed_ms(started_ms));
            self.state.send_replace(RetryState::Connecting);

            match self.mode {
                ReconnectMode::Stateless => {
                    self.current.write().await.take();
                    self.connector.close(&connection).await;
                }
                ReconnectMode::Stateful => previous = Some(connection),
            }

            match outcome {
                Err(e) if !e.is_retriable() => break e.to_string(),
                Err(e) => warn!(generation = self.generation, error = %e, "delegate failed"),
                Ok(()) => debug!(generation = self.generation, "delegate closed"),
            }

            if let Step::Stop { reason } = self.wait().await {
                break reason;
            }
        };

        if let Some(old) = previous.take() {
            self.connector.close(&old).await;
        }
        if let Some(live) = self.current.write().await.take() {
            self.connector.close(&live).await;
        }
        info!(reason = %reason, "reconnect wrapper closed");
        self.state.send_replace(RetryState::Closed { reason });
    }

    /// Connect, restoring state first in stateful mode
    async fn open(&self) -> ChannelResult<Arc<C::Connection>> {
        let connection = self.connector.connect().await?;
        if self.mode == ReconnectMode::Stateful {
            if let Err(e) = self.connector.restore(&connection).await {
                self.connector.close(&connection).await;
                return Err(e);
            }
        }
        Ok(Arc::new(connection))
    }

    async fn wait(&mut self) -> Step {
        let delay_ms = self.backoff.next_delay_ms();
        debug!(delay_ms, "waiting before reconnect");
        tokio::select! {
            _ = self.shutdown.notified() => Step::Stop {
                reason: "closed by caller".to_string(),
            },
            _ = self.io.sleep_ms(delay_ms) => Step::Continue,
        }
    }
}

// =============================================================================
// Message Connector
// =============================================================================

/// Opens a fresh [`Link`]
pub type Dial = Arc<dyn Fn() -> BoxFuture<'static, TransportResult<Link>> + Send + Sync>;

/// [`Connector`] for client-side [`MessageConnection`]s
///
/// In stateful mode the restore messages (for example the current
/// `InterestRegistration`) are replayed, each acknowledged, on every new
/// connection before it is handed out.
pub struct MessageConnector {
    dial: Dial,
    ack_check_interval_ms: u64,
    ack_timeout_ms: u64,
    io: IoContext,
    restore: RwLock<Vec<Message>>,
}

impl MessageConnector {
    /// Create a connector
    pub fn new(dial: Dial, ack_check_interval_ms: u64, ack_timeout_ms: u64, io: IoContext) -> Self {
        Self {
            dial,
            ack_check_interval_ms,
            ack_timeout_ms,
            io,
            restore: RwLock::new(Vec::new()),
        }
    }

    /// Replace the messages replayed on reconnect
    pub async fn set_restore(&self, messages: Vec<Message>) {
        *self.restore.write().await = messages;
    }
}

#[async_trait]
impl Connector for MessageConnector {
    type Connection = MessageConnection;

    async fn connect(&self) -> ChannelResult<MessageConnection> {
        let link = (self.dial)().await?;
        Ok(MessageConnection::new(
            link,
            self.ack_check_interval_ms,
            self.io.clone(),
        ))
    }

    async fn restore(&self, connection: &MessageConnection) -> ChannelResult<()> {
        let messages = self.restore.read().await.clone();
        for message in messages {
            connection
                .submit_with_ack(message, self.ack_timeout_ms)
                .await?;
        }
        Ok(())
    }

    async fn closed(&self, connection: &MessageConnection) -> ChannelResult<()> {
        match connection.closed().await {
            Lifecycle::Failed(reason) => {
                debug!(connection = %connection.name(), reason = %reason, "delegate failed");
                Err(ChannelError::Transport(TransportError::closed(connection.name())))
            }
            _ => Ok(()),
        }
    }

    async fn close(&self, connection: &MessageConnection) {
        connection.shutdown();
    }
}

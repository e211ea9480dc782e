//! Channel driver
//!
//! TigerStyle: One task per channel, every input in one select loop,
//! one close path.
//!
//! A channel is a [`ChannelHandler`] run by [`spawn_channel`]. The driver
//! owns everything the protocols share: the state machine, heartbeat
//! liveness, `GoAway`, error replies, and teardown. Handlers only see
//! protocol messages and their own events.
//!
//! ```text
//!               ┌──────────── driver task ────────────┐
//!   incoming ──►│ Heartbeat ─► monitor                │
//!               │ GoAway    ─► close                  │
//!               │ other     ─► handler.handle ────────┼──► ChannelLink ──► peer
//!   events   ──►│           ─► handler.on_event ──────┤
//!   tick     ──►│ monitor.tick, send Heartbeat ───────┘
//!   close    ──►│ close
//!               └─────────────────────────────────────┘
//! ```

use crate::error::{ChannelError, ChannelResult};
use crate::heartbeat::{HeartbeatMonitor, HeartbeatTimer, Pulse};
use crate::state::{ChannelState, StateCell};
use async_trait::async_trait;
use eddy_core::{ChannelConfig, IoContext};
use eddy_transport::{ErrorCode, Message, MessageConnection};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

// =============================================================================
// Handler
// =============================================================================

/// What the driver does after a handler call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep the channel open
    Continue,
    /// Close the channel
    Close,
}

/// Protocol-specific half of a channel
#[async_trait]
pub trait ChannelHandler: Send + 'static {
    /// Events the handler receives besides messages
    type Event: Send + 'static;

    /// Channel name for logs
    fn name(&self) -> &str;

    /// Whether the channel enters `Open`; a channel that does not stays
    /// `Idle` until it closes
    fn opens(&self) -> bool {
        true
    }

    /// Handle one protocol message
    async fn handle(&mut self, link: &ChannelLink, message: Message) -> ChannelResult<Flow>;

    /// Handle one event
    async fn on_event(&mut self, _link: &ChannelLink, _event: Self::Event) -> ChannelResult<Flow> {
        Ok(Flow::Continue)
    }

    /// Called for every heartbeat received from the peer
    async fn on_heartbeat(&mut self, _link: &ChannelLink) -> ChannelResult<()> {
        Ok(())
    }

    /// Called before a heartbeat expiry closes the channel
    async fn on_heartbeat_expiry(&mut self) {}

    /// Called once, after the loop ends and before the connection shuts down
    async fn on_close(&mut self);
}

// =============================================================================
// Link
// =============================================================================

/// Outbound side of a channel, as seen by a handler
#[derive(Clone)]
pub struct ChannelLink {
    connection: Arc<MessageConnection>,
    ack_timeout_ms: u64,
}

impl ChannelLink {
    /// Wrap `connection`; `ack_timeout_ms` of zero waits indefinitely
    pub fn new(connection: Arc<MessageConnection>, ack_timeout_ms: u64) -> Self {
        Self {
            connection,
            ack_timeout_ms,
        }
    }

    /// Send without waiting for an acknowledgement
    pub async fn send(&self, message: Message) -> ChannelResult<()> {
        Ok(self.connection.submit(message).await?)
    }

    /// Send and wait for the peer's acknowledgement
    pub async fn send_with_ack(&self, message: Message) -> ChannelResult<()> {
        Ok(self
            .connection
            .submit_with_ack(message, self.ack_timeout_ms)
            .await?)
    }

    /// Acknowledge the peer's oldest unacknowledged message
    pub async fn acknowledge(&self) -> ChannelResult<()> {
        Ok(self.connection.acknowledge().await?)
    }

    /// The underlying connection
    pub fn connection(&self) -> &Arc<MessageConnection> {
        &self.connection
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Why a channel closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// [`ChannelHandle::close`] was called
    Requested,
    /// The peer sent `GoAway`
    GoAway { reason: String },
    /// The handler finished the conversation
    Completed,
    /// The connection ended underneath the channel
    TransportEnded,
    /// The peer stopped sending heartbeats
    HeartbeatExpired { missed: i64 },
    /// A handler or send failed
    Failed { reason: String },
}

/// Handle to a running channel
///
/// Dropping the handle leaves the channel running; it closes on its own when
/// the connection ends.
pub struct ChannelHandle {
    name: String,
    state: watch::Receiver<ChannelState>,
    close: Arc<Notify>,
    task: JoinHandle<CloseReason>,
}

impl ChannelHandle {
    /// Channel name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state
    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    /// Watch state changes
    pub fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Ask the channel to close
    pub fn close(&self) {
        self.close.notify_one();
    }

    /// Wait for the channel to close and report why
    pub async fn join(self) -> CloseReason {
        match self.task.await {
            Ok(reason) => reason,
            Err(e) => CloseReason::Failed {
                reason: format!("channel task ended abnormally: {}", e),
            },
        }
    }
}

/// Run `handler` over `connection`
pub fn spawn_channel<H: ChannelHandler + Sync>(
    handler: H,
    events: Option<mpsc::Receiver<H::Event>>,
    connection: Arc<MessageConnection>,
    config: &ChannelConfig,
    io: IoContext,
) -> ChannelHandle {
    let name = handler.name().to_string();
    let cell = StateCell::new();
    let state = cell.subscribe();
    let close = Arc::new(Notify::new());
    let link = ChannelLink::new(connection, config.ack_timeout_ms);
    let monitor = HeartbeatMonitor::from_config(config);
    let timer = HeartbeatTimer::new(config.heartbeat_interval_ms, io.now_ms());

    let driver = Driver {
        handler,
        events,
        link,
        cell,
        monitor,
        timer,
        io,
        close: close.clone(),
    };
    let task = tokio::spawn(driver.run());

    ChannelHandle {
        name,
        state,
        close,
        task,
    }
}

struct Driver<H: ChannelHandler> {
    handler: H,
    events: Option<mpsc::Receiver<H::Event>>,
    link: ChannelLink,
    cell: StateCell,
    monitor: HeartbeatMonitor,
    timer: HeartbeatTimer,
    io: IoContext,
    close: Arc<Notify>,
}

async fn next_event<E>(events: &mut Option<mpsc::Receiver<E>>) -> Option<E> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

impl<H: ChannelHandler> Driver<H> {
    async fn run(mut self) -> CloseReason {
        if self.handler.opens() {
            // A fresh cell always accepts Idle -> Open
            let _ = self.cell.transition(ChannelState::Open);
        }
        debug!(channel = %self.handler.name(), state = ?self.cell.get(), "channel started");

        let connection = self.link.connection().clone();
        let reason = loop {
            let tick_delay_ms = self.timer.delay_ms(self.io.now_ms());
            tokio::select! {
                biased;
                _ = self.close.notified() => break CloseReason::Requested,
                message = connection.incoming() => {
                    let Some(message) = message else {
                        break CloseReason::TransportEnded;
                    };
                    if let Some(reason) = self.on_message(message).await {
                        break reason;
                    }
                }
                event = next_event(&mut self.events) => {
                    let Some(event) = event else {
                        debug!(channel = %self.handler.name(), "event source ended");
                        self.events = None;
                        continue;
                    };
                    match self.handler.on_event(&self.link, event).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Close) => break CloseReason::Completed,
                        Err(e) => break self.fail(e).await,
                    }
                }
                _ = self.io.sleep_ms(tick_delay_ms) => {
                    if let Some(reason) = self.on_tick().await {
                        break reason;
                    }
                }
            }
        };

        self.finish(&reason).await;
        reason
    }

    async fn on_message(&mut self, message: Message) -> Option<CloseReason> {
        match message {
            Message::Heartbeat => {
                self.monitor.received();
                match self.handler.on_heartbeat(&self.link).await {
                    Ok(()) => None,
                    Err(e) => Some(self.fail(e).await),
                }
            }
            Message::GoAway(go_away) => Some(CloseReason::GoAway {
                reason: go_away.reason,
            }),
            message => match self.handler.handle(&self.link, message).await {
                Ok(Flow::Continue) => None,
                Ok(Flow::Close) => Some(CloseReason::Completed),
                Err(e) => Some(self.fail(e).await),
            },
        }
    }

    async fn on_tick(&mut self) -> Option<CloseReason> {
        self.timer.on_tick(self.io.now_ms());
        match self.monitor.tick() {
            Pulse::Expired { missed } => {
                warn!(channel = %self.handler.name(), missed, "heartbeat expired");
                self.handler.on_heartbeat_expiry().await;
                Some(CloseReason::HeartbeatExpired { missed })
            }
            Pulse::Alive => match self.link.send(Message::Heartbeat).await {
                Ok(()) => None,
                Err(e) => Some(CloseReason::Failed {
                    reason: format!("heartbeat send failed: {}", e),
                }),
            },
        }
    }

    /// Report `error` to the peer when the connection can still carry it
    async fn fail(&self, error: ChannelError) -> CloseReason {
        warn!(channel = %self.handler.name(), error = %error, "channel failed");
        let code = match &error {
            ChannelError::UnexpectedMessage { .. } | ChannelError::InvalidTransition { .. } => {
                Some(ErrorCode::ProtocolViolation)
            }
            ChannelError::Registry(_) => Some(ErrorCode::Internal),
            _ => None,
        };
        if let Some(code) = code {
            let _ = self.link.send(Message::error(code, error.to_string())).await;
        }
        CloseReason::Failed {
            reason: error.to_string(),
        }
    }

    async fn finish(&mut self, reason: &CloseReason) {
        self.handler.on_close().await;
        self.cell.close();

        // Anything still queued arrived after the channel closed
        let connection = self.link.connection();
        while let Some(late) = connection.try_incoming() {
            if matches!(late, Message::Heartbeat | Message::GoAway(_)) {
                continue;
            }
            debug!(channel = %self.handler.name(), kind = %late.kind(), "message after close");
            let closed = Message::error(
                ErrorCode::ChannelClosed,
                format!("channel {} is closed", self.handler.name()),
            );
            if self.link.send(closed).await.is_err() {
                break;
            }
        }
        connection.shutdown();

        info!(channel = %self.handler.name(), reason = ?reason, "channel closed");
    }
}

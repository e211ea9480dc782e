//! Eddy Channel
//!
//! Server-side channel state machines, heartbeat liveness and the reconnect
//! wrapper.
//!
//! # Overview
//!
//! Every channel runs on the same [`driver`]: a select loop over incoming
//! messages, handler events, heartbeat ticks and close requests. The
//! protocols plug in as [`ChannelHandler`]s:
//! - [`InterestChannel`]: streams registry changes for a client's interest
//! - [`RegistrationChannel`]: holds one client instance in the registry
//! - [`ReplicationChannel`]: applies a peer node's writes
//!
//! [`RetryingConnection`] keeps a client-side connection alive with
//! exponential backoff.
//!
//! # Example
//!
//! ```rust,ignore
//! use eddy_channel::InterestChannel;
//!
//! let handle = InterestChannel::spawn("interest-1", node_id, registry, connection, &config, io);
//! let reason = handle.join().await;
//! ```

pub mod driver;
pub mod error;
pub mod heartbeat;
pub mod interest;
pub mod registration;
pub mod replication;
pub mod retry;
pub mod state;

pub use driver::{spawn_channel, ChannelHandle, ChannelHandler, ChannelLink, CloseReason, Flow};
pub use error::{ChannelError, ChannelResult};
pub use heartbeat::{HeartbeatMonitor, HeartbeatTimer, Pulse, HEARTBEAT_MISSED_COUNT_MIN};
pub use interest::InterestChannel;
pub use registration::RegistrationChannel;
pub use replication::ReplicationChannel;
pub use retry::{
    Backoff, Connector, Dial, MessageConnector, ReconnectMode, RetryState, RetryingConnection,
};
pub use state::{ChannelState, StateCell};

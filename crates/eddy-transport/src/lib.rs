//! Eddy Transport
//!
//! Framed message links and the reliable message connection that channels
//! are built on.
//!
//! # Overview
//!
//! - [`Message`]: every message kind, and which protocol may carry it
//! - [`MessageCodec`]: length-prefixed JSON frames, checked against the
//!   connection's protocol
//! - [`Link`]: a byte stream turned into a pair of bounded message queues
//! - [`MessageConnection`]: acknowledged delivery with FIFO matching and
//!   per-message timeouts
//!
//! # Example
//!
//! ```rust,ignore
//! use eddy_transport::{connect_tcp, Message, MessageConnection, ProtocolType};
//!
//! let link = connect_tcp("registry:8762", ProtocolType::Registration).await?;
//! let connection = MessageConnection::new(link, 1_000, io);
//! connection.submit_with_ack(Message::register(instance), 30_000).await?;
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod link;
pub mod message;

pub use codec::{MessageCodec, FRAME_HEADER_SIZE_BYTES};
pub use connection::{Lifecycle, MessageConnection};
pub use error::{TransportError, TransportResult};
pub use link::{connect_tcp, Inbound, Link, LinkListener, LinkTasks, LINK_DRAIN_GRACE_MS};
pub use message::{
    ClientHello, ErrorBody, ErrorCode, GoAway, Message, MessageKind, ProtocolType,
    ReplicationHello, ReplicationHelloReply, ServerHello, Unregister,
};

//! Eddy Cluster
//!
//! Peer replication between Eddy nodes.
//!
//! # Overview
//!
//! The cluster crate provides:
//! - [`Replicator`]: a [`Registry`](eddy_registry::Registry) decorator that
//!   queues local writes for every peer
//! - [`PeerNode`]: per-peer batching, retry and conflict handling
//! - [`PeerClient`]: the HTTP side of one peer, with single-hop redirects
//! - [`ReplicationHandler`]: applies a peer's batch to the local store
//! - [`resolve`]: last-dirty-timestamp conflict resolution
//!
//! # Example
//!
//! ```rust,ignore
//! use eddy_cluster::{default_http_client, Replicator};
//!
//! let http = default_http_client(config.replication.request_timeout())?;
//! let registry = Arc::new(Replicator::spawn(
//!     &node_id, store.clone(), http, &config.replication, &config.retry, io,
//! ));
//! ```

pub mod client;
pub mod conflict;
pub mod error;
pub mod handler;
pub mod http_client;
pub mod peer;
pub mod protocol;
pub mod replicator;

pub use client::PeerClient;
pub use conflict::{resolve, Resolution};
pub use error::{ReplicationError, ReplicationResult};
pub use handler::{error_status, ReplicationHandler, PEER_NAME_UNKNOWN};
pub use http_client::{default_http_client, ReqwestHttpClient};
pub use peer::{PeerNode, PeerStatsSnapshot, REPLICATION_ITEM_AGE_MS_MAX};
pub use protocol::{
    Action, AsgStatus, AsgStatusQuery, HeartbeatQuery, ItemResponse, ReplicationItem, BATCH_PATH,
    PEER_NODE_HEADER,
};
pub use replicator::Replicator;

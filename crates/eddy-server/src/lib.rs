//! Eddy Server Library
//!
//! The pieces of an Eddy node that face the network.
//!
//! # Overview
//!
//! - [`api`]: the axum HTTP peer surface (heartbeats, replication batches,
//!   ASG status, applications view)
//! - [`listener`]: the TCP channel acceptor that routes each connection to
//!   a registration, interest or replication channel
//! - [`state`]: state shared by the HTTP handlers

pub mod api;
pub mod listener;
pub mod state;

pub use listener::{ChannelListener, ChannelServices};
pub use state::AppState;

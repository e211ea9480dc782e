//! Eddy Registry
//!
//! Lease-based instance registry for Eddy nodes.
//!
//! # Overview
//!
//! The registry provides:
//! - Multi-sourced instance records (local clients and replicating peers)
//! - Lease renewal and periodic eviction, guarded by self-preservation
//! - Operator status overrides
//! - Interest subscriptions: a snapshot followed by live changes
//! - An interest multiplexer for subscribers whose interest changes
//!
//! # Example
//!
//! ```rust,ignore
//! use eddy_core::{Interest, IoContext, RegistryConfig, Source};
//! use eddy_registry::{MemoryRegistry, Registry};
//!
//! let registry = MemoryRegistry::new(&RegistryConfig::default(), IoContext::production());
//! registry.register(instance, &Source::local("i-1")).await?;
//! let mut stream = registry.for_interest(Interest::Application("X".into())).await?;
//! ```

pub mod error;
pub mod eviction;
pub mod holder;
pub mod multiplexer;
pub mod overrides;
pub mod preservation;
pub mod registry;
pub mod view;

pub use error::{RegistryError, RegistryResult};
pub use eviction::EvictionScheduler;
pub use holder::{HeldCopy, MultiSourcedHolder, Removal};
pub use multiplexer::{InterestMultiplexer, MultiplexedItem, MULTIPLEXER_QUEUE_DEPTH_MAX};
pub use overrides::StatusOverrides;
pub use preservation::{PreservationSnapshot, RenewalRate, SelfPreservation};
pub use registry::{
    EvictionReport, InterestStream, MemoryRegistry, Outcome, Registry, CHANGE_STREAM_DEPTH_MAX,
    INTEREST_STREAM_DEPTH_MAX,
};
pub use view::RegistryView;

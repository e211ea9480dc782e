//! Eddy Core
//!
//! Core types, errors, and constants for the Eddy service registry.
//!
//! # Overview
//!
//! Eddy is a lease-based service registry. Instances register, renew their
//! lease, and are evicted when they stop renewing. Subscribers follow slices
//! of the registry through interests, and registry nodes replicate writes to
//! each other.
//!
//! This crate holds the shared data model:
//! - [`InstanceInfo`] snapshots with an embedded [`LeaseInfo`]
//! - field-level [`Delta`]s with exact `diff`/`apply` round trip
//! - [`Interest`] predicates and [`ChangeNotification`]s
//! - the derived [`Applications`] view and its reconcile hash code
//!
//! # TigerStyle
//!
//! This crate follows [TigerStyle](https://github.com/tigerbeetle/tigerbeetle/blob/main/docs/TIGER_STYLE.md)
//! engineering principles:
//! - Safety > Performance > Developer Experience
//! - Explicit limits with big-endian naming (e.g., `INSTANCE_ID_LENGTH_BYTES_MAX`)
//! - No recursion (bounded iteration only)

pub mod applications;
pub mod config;
pub mod constants;
pub mod delta;
pub mod error;
pub mod http;
pub mod instance;
pub mod interest;
pub mod io;
pub mod lease;
pub mod notification;
pub mod source;
pub mod telemetry;

pub use applications::{Application, Applications, ApplicationsSummary};
pub use config::{
    ChannelConfig, EddyConfig, NodeConfig, RegistryConfig, ReplicationConfig, RetryConfig,
};
pub use constants::*;
pub use delta::{Delta, FieldChange};
pub use error::{Error, Result};
pub use http::{HttpClient, HttpError, HttpMethod, HttpRequest, HttpResponse, HttpResult};
pub use instance::{
    AddressPair, DataCenterInfo, InstanceFields, InstanceId, InstanceInfo, InstanceStatus,
};
pub use interest::Interest;
pub use io::{IoContext, TimeProvider, WallClockTime};
pub use lease::LeaseInfo;
pub use notification::{ChangeKind, ChangeNotification, StreamState};
pub use source::{Origin, Source};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};

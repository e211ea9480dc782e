//! Eddy DST - Deterministic Simulation Testing
//!
//! TigerBeetle/FoundationDB-style deterministic simulation support.
//!
//! # Overview
//!
//! - Manually advanced time ([`SimClock`]) and self-advancing time ([`SimTime`])
//! - Reproducible random numbers ([`DeterministicRng`])
//! - Fault injection ([`FaultInjector`])
//! - An in-process peer network ([`SimHttpClient`])
//! - A harness wiring them together ([`Simulation`])
//!
//! # Example
//!
//! ```rust,ignore
//! use eddy_dst::{SimConfig, Simulation};
//!
//! #[test]
//! fn test_eviction() {
//!     Simulation::new(SimConfig::from_env_or_random())
//!         .run(|env| async move {
//!             // build components with env.io, then drive them
//!             env.advance_ms(91_000).await;
//!             Ok(())
//!         })
//!         .unwrap();
//! }
//! ```
//!
//! # TigerStyle
//!
//! - All operations are deterministic given the same seed
//! - Always log the seed for reproducibility
//! - Explicit fault types and probabilities

pub mod clock;
pub mod fault;
pub mod http;
pub mod rng;
pub mod simulation;
pub mod time;

pub use clock::{SimClock, SIM_EPOCH_MS};
pub use fault::{FaultConfig, FaultInjector, FaultInjectorBuilder, FaultType};
pub use http::{RecordedRequest, SimHttpClient, SimRoute};
pub use rng::DeterministicRng;
pub use simulation::{SimConfig, SimEnvironment, Simulation, SimulationError};
pub use time::SimTime;

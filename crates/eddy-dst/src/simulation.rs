//! Simulation harness for deterministic testing
//!
//! TigerStyle: Reproducible test execution with explicit configuration.
//!
//! The harness runs a test on a single-threaded tokio runtime with a
//! manually advanced [`SimClock`]. Every background loop in the registry,
//! channel and replication crates sleeps on that clock, so a test drives
//! them forward with [`SimEnvironment::advance_ms`].

use crate::clock::SimClock;
use crate::fault::{FaultConfig, FaultInjector, FaultInjectorBuilder};
use crate::http::SimHttpClient;
use crate::rng::DeterministicRng;
use eddy_core::{IoContext, TimeProvider};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;

/// Scheduler yields performed by [`SimEnvironment::settle`]
pub const SETTLE_YIELDS_COUNT: usize = 64;

/// Configuration for a simulation
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Simulated start time in milliseconds since epoch
    pub start_time_ms: u64,
}

impl SimConfig {
    /// Create a new simulation config with the given seed
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            start_time_ms: crate::clock::SIM_EPOCH_MS,
        }
    }

    /// Seed from `DST_SEED`, or random (logged)
    pub fn from_env_or_random() -> Self {
        Self::new(DeterministicRng::from_env_or_random().seed())
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Environment handed to simulation tests
pub struct SimEnvironment {
    /// Manually advanced clock
    pub clock: Arc<SimClock>,
    /// Deterministic RNG
    pub rng: Arc<DeterministicRng>,
    /// I/O context wired to the simulated clock
    pub io: IoContext,
    /// Fault injector shared by simulated I/O
    pub faults: Arc<FaultInjector>,
    /// Simulated peer network
    pub http: Arc<SimHttpClient>,
}

impl SimEnvironment {
    /// Current simulated time
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Let every runnable task make progress
    pub async fn settle(&self) {
        for _ in 0..SETTLE_YIELDS_COUNT {
            tokio::task::yield_now().await;
        }
    }

    /// Advance time in one jump, then settle
    ///
    /// A periodic loop wakes at most once per call.
    pub async fn advance_ms(&self, ms: u64) {
        self.clock.advance_ms(ms);
        self.settle().await;
    }

    /// Advance time in `step_ms` increments, settling after each
    pub async fn advance_stepped(&self, total_ms: u64, step_ms: u64) {
        debug_assert!(step_ms > 0);
        let mut elapsed_ms = 0;
        while elapsed_ms < total_ms {
            let step = step_ms.min(total_ms - elapsed_ms);
            self.advance_ms(step).await;
            elapsed_ms += step;
        }
    }
}

/// Errors surfaced by the harness
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("test failed: {0}")]
    TestFailed(#[from] anyhow::Error),

    #[error("runtime error: {0}")]
    RuntimeError(String),
}

/// Simulation harness
pub struct Simulation {
    config: SimConfig,
    fault_configs: Vec<FaultConfig>,
}

impl Simulation {
    /// Create a new simulation with the given config
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            fault_configs: Vec::new(),
        }
    }

    /// Add a fault configuration
    pub fn with_fault(mut self, fault: FaultConfig) -> Self {
        self.fault_configs.push(fault);
        self
    }

    fn build_environment(self) -> SimEnvironment {
        tracing::info!(seed = self.config.seed, "starting simulation");

        let rng = Arc::new(DeterministicRng::new(self.config.seed));
        let clock = Arc::new(SimClock::from_millis(self.config.start_time_ms));

        let faults = Arc::new(
            self.fault_configs
                .into_iter()
                .fold(FaultInjectorBuilder::new(rng.fork()), |builder, fault| {
                    builder.with_fault(fault)
                })
                .build(),
        );

        SimEnvironment {
            io: IoContext::new(clock.clone() as Arc<dyn TimeProvider>),
            http: Arc::new(SimHttpClient::new(faults.clone())),
            clock,
            rng,
            faults,
        }
    }

    /// Run the test on a fresh single-threaded runtime
    pub fn run<F, Fut, T>(self, test: F) -> Result<T, SimulationError>
    where
        F: FnOnce(SimEnvironment) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let env = self.build_environment();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| SimulationError::RuntimeError(e.to_string()))?;

        runtime.block_on(async { test(env).await.map_err(SimulationError::TestFailed) })
    }

    /// Run the test inside an existing runtime
    pub async fn run_async<F, Fut, T>(self, test: F) -> Result<T, SimulationError>
    where
        F: FnOnce(SimEnvironment) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let env = self.build_environment();
        test(env).await.map_err(SimulationError::TestFailed)
    }
}

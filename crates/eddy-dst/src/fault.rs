//! Fault injection for deterministic testing
//!
//! TigerStyle: Explicit fault types, probabilistic injection.

use crate::rng::DeterministicRng;
use std::sync::atomic::{AtomicU64, Ordering};

/// Types of faults that can be injected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultType {
    // Peer HTTP faults
    /// Peer refuses the connection
    PeerUnreachable,
    /// Peer does not answer within the request timeout
    PeerTimeout { timeout_ms: u64 },
    /// Peer answers with a server error status
    PeerServerError { status: u16 },
}

impl FaultType {
    /// Human-readable name for this fault type
    pub fn name(&self) -> &'static str {
        match self {
            FaultType::PeerUnreachable => "peer_unreachable",
            FaultType::PeerTimeout { .. } => "peer_timeout",
            FaultType::PeerServerError { .. } => "peer_server_error",
        }
    }
}

/// Configuration for a fault injection rule
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// The type of fault to inject
    pub fault_type: FaultType,
    /// Probability of injection (0.0 - 1.0)
    pub probability: f64,
    /// Only applies to operations containing this string
    pub operation_filter: Option<String>,
    /// Only trigger after this many operations
    pub after_operations: u64,
    /// Maximum number of times to trigger
    pub max_triggers: Option<u64>,
}

impl FaultConfig {
    /// Create a new fault configuration
    pub fn new(fault_type: FaultType, probability: f64) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&probability),
            "probability must be in [0, 1]"
        );

        Self {
            fault_type,
            probability,
            operation_filter: None,
            after_operations: 0,
            max_triggers: None,
        }
    }

    /// Restrict to operations containing `filter`
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.operation_filter = Some(filter.into());
        self
    }

    /// Skip the first `operations` operations
    pub fn after(mut self, operations: u64) -> Self {
        self.after_operations = operations;
        self
    }

    /// Stop after `max` injections
    pub fn max_triggers(mut self, max: u64) -> Self {
        self.max_triggers = Some(max);
        self
    }
}

#[derive(Debug)]
struct FaultState {
    config: FaultConfig,
    trigger_count: AtomicU64,
}

/// Fault injector for deterministic testing
#[derive(Debug)]
pub struct FaultInjector {
    faults: Vec<FaultState>,
    rng: DeterministicRng,
    operation_count: AtomicU64,
}

impl FaultInjector {
    /// Create an injector with no faults registered
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            faults: Vec::new(),
            rng,
            operation_count: AtomicU64::new(0),
        }
    }

    /// Register a fault configuration
    pub fn register(&mut self, config: FaultConfig) {
        self.faults.push(FaultState {
            config,
            trigger_count: AtomicU64::new(0),
        });
    }

    /// Decide whether to inject a fault into `operation`
    pub fn should_inject(&self, operation: &str) -> Option<FaultType> {
        let op_count = self.operation_count.fetch_add(1, Ordering::SeqCst);

        for state in &self.faults {
            let config = &state.config;

            if let Some(filter) = &config.operation_filter {
                if !operation.contains(filter.as_str()) {
                    continue;
                }
            }
            if op_count < config.after_operations {
                continue;
            }
            let triggered = state.trigger_count.load(Ordering::SeqCst);
            if config.max_triggers.is_some_and(|max| triggered >= max) {
                continue;
            }

            if self.rng.next_bool(config.probability) {
                state.trigger_count.fetch_add(1, Ordering::SeqCst);
                tracing::debug!(
                    fault = config.fault_type.name(),
                    operation,
                    trigger_count = triggered + 1,
                    "injecting fault"
                );
                return Some(config.fault_type.clone());
            }
        }

        None
    }

    /// Total operations checked
    pub fn operation_count(&self) -> u64 {
        self.operation_count.load(Ordering::SeqCst)
    }

    /// Times each registered fault fired, in registration order
    pub fn trigger_counts(&self) -> Vec<(&'static str, u64)> {
        self.faults
            .iter()
            .map(|s| (s.config.fault_type.name(), s.trigger_count.load(Ordering::SeqCst)))
            .collect()
    }
}

/// Builder for a [`FaultInjector`] with several faults
pub struct FaultInjectorBuilder {
    rng: DeterministicRng,
    faults: Vec<FaultConfig>,
}

impl FaultInjectorBuilder {
    /// Create a new builder
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            rng,
            faults: Vec::new(),
        }
    }

    /// Add a fault configuration
    pub fn with_fault(mut self, config: FaultConfig) -> Self {
        self.faults.push(config);
        self
    }

    /// Add unreachable-peer and timeout faults
    pub fn with_peer_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::PeerUnreachable, probability))
            .with_fault(FaultConfig::new(
                FaultType::PeerTimeout { timeout_ms: 5_000 },
                probability,
            ))
    }

    /// Build the fault injector
    pub fn build(self) -> FaultInjector {
        let mut injector = FaultInjector::new(self.rng);
        for config in self.faults {
            injector.register(config);
        }
        injector
    }
}

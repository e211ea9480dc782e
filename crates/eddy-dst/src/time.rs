//! Self-advancing simulated time
//!
//! TigerStyle: Explicit time control, trait-based abstraction.
//!
//! [`SimTime`] advances its [`SimClock`] by the requested amount on every
//! sleep and yields to the scheduler. Use it for code that only sleeps in
//! one task (backoff loops); use a bare [`SimClock`] when several background
//! loops must stay in lockstep with the test.

use async_trait::async_trait;
use eddy_core::TimeProvider;
use std::sync::{Arc, Mutex};

use crate::clock::SimClock;

/// Simulated time provider that advances on sleep
#[derive(Clone, Debug)]
pub struct SimTime {
    clock: Arc<SimClock>,
    sleeps: Arc<Mutex<Vec<u64>>>,
}

impl SimTime {
    /// Create a new SimTime from a SimClock
    pub fn new(clock: Arc<SimClock>) -> Self {
        Self {
            clock,
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// The underlying clock
    pub fn clock(&self) -> &SimClock {
        &self.clock
    }

    /// Every sleep requested so far, in milliseconds
    pub fn recorded_sleeps(&self) -> Vec<u64> {
        self.sleeps
            .lock()
            .map(|sleeps| sleeps.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl TimeProvider for SimTime {
    fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    async fn sleep_ms(&self, ms: u64) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(ms);
        }
        self.clock.advance_ms(ms);
        tokio::task::yield_now().await;
    }
}

//! Time abstraction
//!
//! TigerStyle: All code that reads the clock or sleeps goes through
//! [`TimeProvider`], so the same logic runs against wall-clock time in
//! production and a manually advanced clock in simulation tests.
//!
//! ```text
//!   registry / channels / replication
//!                 │
//!           TimeProvider
//!          ┌──────┴──────┐
//!   WallClockTime     SimClock (eddy-dst)
//! ```

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

// ============================================================================
// Time Provider
// ============================================================================

/// Time provider abstraction
///
/// Never call `SystemTime::now()` or `tokio::time::sleep` directly from
/// registry, channel or replication logic.
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Current time in milliseconds since epoch
    fn now_ms(&self) -> u64;

    /// Sleep for the specified duration
    async fn sleep_ms(&self, ms: u64);

    /// Sleep for a [`Duration`]
    async fn sleep(&self, duration: Duration) {
        self.sleep_ms(duration.as_millis() as u64).await;
    }
}

/// Production time provider using the wall clock and tokio timers
#[derive(Debug, Clone, Default)]
pub struct WallClockTime;

impl WallClockTime {
    /// Create a new wall clock time provider
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

// ============================================================================
// I/O Context
// ============================================================================

/// Bundle of I/O providers handed to every component at construction
///
/// Built once at process start; there are no process-wide singletons.
#[derive(Clone, Debug)]
pub struct IoContext {
    /// Time provider
    pub time: Arc<dyn TimeProvider>,
}

impl Default for IoContext {
    fn default() -> Self {
        Self::production()
    }
}

impl IoContext {
    /// Production context backed by the wall clock
    pub fn production() -> Self {
        Self {
            time: Arc::new(WallClockTime::new()),
        }
    }

    /// Context with a custom time provider
    pub fn new(time: Arc<dyn TimeProvider>) -> Self {
        Self { time }
    }

    /// Current time in milliseconds
    pub fn now_ms(&self) -> u64 {
        self.time.now_ms()
    }

    /// Sleep for the specified number of milliseconds
    pub async fn sleep_ms(&self, ms: u64) {
        self.time.sleep_ms(ms).await;
    }

    /// Milliseconds elapsed since `since_ms`
    pub fn elapsed_ms(&self, since_ms: u64) -> u64 {
        self.now_ms().saturating_sub(since_ms)
    }
}

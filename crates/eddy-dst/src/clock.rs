//! Deterministic clock for simulation
//!
//! TigerStyle: Explicit time control, no system time dependencies.
//!
//! Background loops (eviction sweeps, heartbeat ticks, ack expiry checks,
//! replication flushes) sleep on the clock and wake only when a test
//! advances it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use eddy_core::TimeProvider;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Start of simulated time: 2024-01-01T00:00:00Z
pub const SIM_EPOCH_MS: u64 = 1_704_067_200_000;

/// Deterministic simulation clock
///
/// Time only advances when explicitly told to.
#[derive(Debug, Clone)]
pub struct SimClock {
    current_time_ms: Arc<AtomicU64>,
    notify: Arc<Notify>,
}

impl SimClock {
    /// Create a new SimClock starting at the given time
    pub fn new(start_time: DateTime<Utc>) -> Self {
        Self::from_millis(start_time.timestamp_millis().max(0) as u64)
    }

    /// Create a new SimClock starting at a specific millisecond timestamp
    pub fn from_millis(ms: u64) -> Self {
        Self {
            current_time_ms: Arc::new(AtomicU64::new(ms)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Current time
    pub fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.now_ms() as i64).unwrap_or_default()
    }

    /// Current time in milliseconds since epoch
    pub fn now_ms(&self) -> u64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }

    /// Advance time by the given duration
    pub fn advance(&self, duration: Duration) {
        debug_assert!(duration >= Duration::zero(), "cannot go back in time");
        self.advance_ms(duration.num_milliseconds().max(0) as u64);
    }

    /// Advance time by the given number of milliseconds and wake sleepers
    pub fn advance_ms(&self, ms: u64) {
        self.current_time_ms.fetch_add(ms, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Check if a deadline (in ms) has passed
    pub fn is_past_ms(&self, deadline_ms: u64) -> bool {
        self.now_ms() >= deadline_ms
    }

    async fn sleep_until_ms(&self, target_ms: u64) {
        loop {
            // Register interest before checking, so an advance between the
            // check and the await is not lost
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.now_ms() >= target_ms {
                return;
            }
            notified.await;
        }
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::from_millis(SIM_EPOCH_MS)
    }
}

#[async_trait]
impl TimeProvider for SimClock {
    fn now_ms(&self) -> u64 {
        SimClock::now_ms(self)
    }

    async fn sleep_ms(&self, ms: u64) {
        let target_ms = SimClock::now_ms(self).saturating_add(ms);
        self.sleep_until_ms(target_ms).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advance() {
        let clock = SimClock::from_millis(0);
        clock.advance_ms(1000);
        clock.advance(Duration::milliseconds(500));
        assert_eq!(clock.now_ms(), 1500);
        assert!(clock.is_past_ms(1500));
        assert!(!clock.is_past_ms(1501));
    }

    #[test]
    fn test_clock_default_epoch() {
        let clock = SimClock::default();
        assert_eq!(clock.now().to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }

    #[tokio::test]
    async fn test_sleep_waits_for_advance() {
        let clock = SimClock::from_millis(0);
        let sleeper = clock.clone();

        let handle = tokio::spawn(async move {
            TimeProvider::sleep_ms(&sleeper, 100).await;
            SimClock::now_ms(&sleeper)
        });

        tokio::task::yield_now().await;
        clock.advance_ms(50);
        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        clock.advance_ms(50);
        let woke_at = handle.await.unwrap();
        assert_eq!(woke_at, 100);
    }

    #[tokio::test]
    async fn test_zero_sleep_returns_immediately() {
        let clock = SimClock::from_millis(10);
        TimeProvider::sleep_ms(&clock, 0).await;
        assert_eq!(clock.now_ms(), 10);
    }
}

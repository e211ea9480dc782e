//! Heartbeat liveness
//!
//! TigerStyle: Bounded counter, explicit expiry condition.
//!
//! Every tick counts one missed heartbeat and every heartbeat received from
//! the peer pays one back. A peer that stays quiet for more than
//! `missed_count_max` ticks is considered gone.

use eddy_core::ChannelConfig;
use tracing::warn;

/// Lowest value the missed counter may reach
///
/// A peer that sends faster than we tick builds up at most one tick of
/// credit.
pub const HEARTBEAT_MISSED_COUNT_MIN: i64 = -1;

/// Result of a heartbeat tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pulse {
    /// Peer still considered alive
    Alive,
    /// Too many heartbeats missed
    Expired { missed: i64 },
}

/// Missed-heartbeat counter
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    missed: i64,
    missed_count_max: i64,
}

impl HeartbeatMonitor {
    /// Create a monitor tolerating `missed_count_max` missed ticks
    pub fn new(missed_count_max: i64) -> Self {
        assert!(missed_count_max >= 1, "must tolerate at least one missed tick");
        Self {
            missed: 0,
            missed_count_max,
        }
    }

    /// Create a monitor from channel configuration
    pub fn from_config(config: &ChannelConfig) -> Self {
        Self::new(config.heartbeat_missed_count_max)
    }

    /// Current missed count
    pub fn missed(&self) -> i64 {
        self.missed
    }

    /// Count one missed heartbeat
    pub fn tick(&mut self) -> Pulse {
        self.missed += 1;
        if self.missed > self.missed_count_max {
            Pulse::Expired {
                missed: self.missed,
            }
        } else {
            Pulse::Alive
        }
    }

    /// Record a heartbeat from the peer
    pub fn received(&mut self) {
        self.missed -= 1;
        if self.missed < HEARTBEAT_MISSED_COUNT_MIN {
            warn!(missed = self.missed, "heartbeat counter drifted, correcting");
            self.missed = HEARTBEAT_MISSED_COUNT_MIN;
        }
    }
}

/// Schedule of heartbeat ticks on the simulated or wall clock
#[derive(Debug, Clone)]
pub struct HeartbeatTimer {
    interval_ms: u64,
    next_tick_ms: u64,
}

impl HeartbeatTimer {
    /// First tick one interval after `now_ms`
    pub fn new(interval_ms: u64, now_ms: u64) -> Self {
        assert!(interval_ms > 0, "heartbeat interval must be positive");
        Self {
            interval_ms,
            next_tick_ms: now_ms.saturating_add(interval_ms),
        }
    }

    /// Milliseconds until the next tick
    pub fn delay_ms(&self, now_ms: u64) -> u64 {
        self.next_tick_ms.saturating_sub(now_ms)
    }

    /// Schedule the tick after the one that just fired
    pub fn on_tick(&mut self, now_ms: u64) {
        // Skip ticks the loop slept through instead of firing them in a burst
        self.next_tick_ms = self.next_tick_ms.saturating_add(self.interval_ms);
        if self.next_tick_ms <= now_ms {
            self.next_tick_ms = now_ms.saturating_add(self.interval_ms);
        }
    }
}

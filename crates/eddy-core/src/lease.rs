//! Lease bookkeeping for a registered instance
//!
//! TigerStyle: All timestamps in milliseconds since epoch, durations in seconds
//! as declared by the client, explicit bounds.

use crate::constants::{
    LEASE_DURATION_SECS_DEFAULT, LEASE_DURATION_SECS_MAX, LEASE_RENEWAL_INTERVAL_SECS_DEFAULT,
    LEASE_RENEWAL_INTERVAL_SECS_MIN,
};
use serde::{Deserialize, Serialize};

/// Renewal and expiration state attached to an instance record
///
/// A lease is expired once `now - last_renewal_timestamp_ms` exceeds the
/// declared duration. The boundary itself is still live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseInfo {
    /// Client-declared renewal interval in seconds
    pub renewal_interval_secs: u32,
    /// Client-declared lease duration in seconds
    pub duration_secs: u32,
    /// When the instance was first registered
    #[serde(default)]
    pub registration_timestamp_ms: u64,
    /// When the lease was last renewed
    #[serde(default)]
    pub last_renewal_timestamp_ms: u64,
    /// When the lease was cancelled or evicted (0 while live)
    #[serde(default)]
    pub eviction_timestamp_ms: u64,
    /// When the instance was first seen UP (0 if never)
    #[serde(default)]
    pub service_up_timestamp_ms: u64,
}

impl Default for LeaseInfo {
    fn default() -> Self {
        Self::new(
            LEASE_RENEWAL_INTERVAL_SECS_DEFAULT,
            LEASE_DURATION_SECS_DEFAULT,
        )
    }
}

impl LeaseInfo {
    /// Create a lease with the client-declared interval and duration
    ///
    /// Values outside bounds are clamped to the valid range.
    pub fn new(renewal_interval_secs: u32, duration_secs: u32) -> Self {
        let renewal_interval_secs = renewal_interval_secs.max(LEASE_RENEWAL_INTERVAL_SECS_MIN);
        let duration_secs = duration_secs.clamp(renewal_interval_secs, LEASE_DURATION_SECS_MAX);

        Self {
            renewal_interval_secs,
            duration_secs,
            registration_timestamp_ms: 0,
            last_renewal_timestamp_ms: 0,
            eviction_timestamp_ms: 0,
            service_up_timestamp_ms: 0,
        }
    }

    /// Lease duration in milliseconds
    pub fn duration_ms(&self) -> u64 {
        u64::from(self.duration_secs) * 1000
    }

    /// Number of renewals this lease is expected to produce per minute
    pub fn expected_renewals_per_min(&self) -> u64 {
        debug_assert!(self.renewal_interval_secs > 0);
        (60 / u64::from(self.renewal_interval_secs)).max(1)
    }

    /// Start (or restart) the lease at `now_ms`
    pub fn started(mut self, now_ms: u64) -> Self {
        self.registration_timestamp_ms = now_ms;
        self.last_renewal_timestamp_ms = now_ms;
        self.eviction_timestamp_ms = 0;
        self
    }

    /// Record a renewal at `now_ms`
    pub fn renewed(mut self, now_ms: u64) -> Self {
        debug_assert!(self.eviction_timestamp_ms == 0, "renewing a cancelled lease");
        self.last_renewal_timestamp_ms = self.last_renewal_timestamp_ms.max(now_ms);
        self
    }

    /// Mark the lease cancelled at `now_ms`
    pub fn cancelled(mut self, now_ms: u64) -> Self {
        if self.eviction_timestamp_ms == 0 {
            self.eviction_timestamp_ms = now_ms;
        }
        self
    }

    /// Record the first time the service came up
    pub fn service_up(mut self, now_ms: u64) -> Self {
        if self.service_up_timestamp_ms == 0 {
            self.service_up_timestamp_ms = now_ms;
        }
        self
    }

    /// Check whether the lease has lapsed at `now_ms`
    pub fn is_expired(&self, now_ms: u64) -> bool {
        if self.eviction_timestamp_ms > 0 {
            return true;
        }
        now_ms.saturating_sub(self.last_renewal_timestamp_ms) > self.duration_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_defaults() {
        let lease = LeaseInfo::default();
        assert_eq!(lease.renewal_interval_secs, 30);
        assert_eq!(lease.duration_secs, 90);
        assert_eq!(lease.expected_renewals_per_min(), 2);
    }

    #[test]
    fn test_lease_bounds() {
        let lease = LeaseInfo::new(0, 1_000_000);
        assert_eq!(lease.renewal_interval_secs, LEASE_RENEWAL_INTERVAL_SECS_MIN);
        assert_eq!(lease.duration_secs, LEASE_DURATION_SECS_MAX);

        // Duration never shorter than the renewal interval
        let lease = LeaseInfo::new(30, 10);
        assert_eq!(lease.duration_secs, 30);
    }

    #[test]
    fn test_lease_expiry_boundary() {
        let lease = LeaseInfo::default().started(1_000);

        assert!(!lease.is_expired(1_000 + 90_000));
        assert!(lease.is_expired(1_000 + 90_001));
    }

    #[test]
    fn test_lease_renewal_extends() {
        let lease = LeaseInfo::default().started(0).renewed(60_000);

        assert!(!lease.is_expired(120_000));
        assert!(lease.is_expired(150_001));
        assert_eq!(lease.registration_timestamp_ms, 0);
    }

    #[test]
    fn test_lease_renewal_never_moves_backwards() {
        let lease = LeaseInfo::default().started(10_000).renewed(5_000);
        assert_eq!(lease.last_renewal_timestamp_ms, 10_000);
    }

    #[test]
    fn test_lease_cancel_expires() {
        let lease = LeaseInfo::default().started(0).cancelled(10);
        assert!(lease.is_expired(11));
        assert_eq!(lease.eviction_timestamp_ms, 10);

        // Cancelling again keeps the first timestamp
        assert_eq!(lease.cancelled(50).eviction_timestamp_ms, 10);
    }

    #[test]
    fn test_service_up_recorded_once() {
        let lease = LeaseInfo::default().service_up(100).service_up(200);
        assert_eq!(lease.service_up_timestamp_ms, 100);
    }
}

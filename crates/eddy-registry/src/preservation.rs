//! Self-preservation against false evictions
//!
//! TigerStyle: Integer arithmetic only, explicit measurement window.
//!
//! When a network partition cuts clients off from this node, their leases
//! lapse together. Eviction is suspended while the renewals received over
//! the last full measurement bucket fall below a percentage of the renewals
//! the registered leases should produce.

use serde::Serialize;

// =============================================================================
// Renewal Rate
// =============================================================================

/// Renewal counter over fixed-width time buckets
///
/// `last_bucket` reports the count of the most recent *complete* bucket;
/// a bucket with no activity reads as zero.
#[derive(Debug, Clone)]
pub struct RenewalRate {
    bucket_ms: u64,
    bucket_start_ms: u64,
    current: u64,
    last: u64,
}

impl RenewalRate {
    /// Start measuring at `now_ms`
    pub fn new(bucket_ms: u64, now_ms: u64) -> Self {
        assert!(bucket_ms > 0, "bucket width must be positive");
        Self {
            bucket_ms,
            bucket_start_ms: now_ms,
            current: 0,
            last: 0,
        }
    }

    fn roll(&mut self, now_ms: u64) {
        if now_ms < self.bucket_start_ms + self.bucket_ms {
            return;
        }
        let elapsed_buckets = (now_ms - self.bucket_start_ms) / self.bucket_ms;
        self.last = if elapsed_buckets == 1 { self.current } else { 0 };
        self.current = 0;
        self.bucket_start_ms += elapsed_buckets * self.bucket_ms;
        debug_assert!(self.bucket_start_ms <= now_ms);
    }

    /// Count one renewal
    pub fn record(&mut self, now_ms: u64) {
        self.roll(now_ms);
        self.current = self.current.saturating_add(1);
    }

    /// Renewals in the last complete bucket
    pub fn last_bucket(&mut self, now_ms: u64) -> u64 {
        self.roll(now_ms);
        self.last
    }
}

// =============================================================================
// Self-Preservation
// =============================================================================

/// Observable state of the self-preservation check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreservationSnapshot {
    pub enabled: bool,
    pub expected_renewals_per_min: u64,
    pub threshold_renewals_per_min: u64,
    pub renewals_last_minute: u64,
    pub eviction_allowed: bool,
}

/// Self-preservation policy
#[derive(Debug, Clone, Copy)]
pub struct SelfPreservation {
    enabled: bool,
    renewal_percent_threshold: u32,
}

impl SelfPreservation {
    /// Create a policy; `renewal_percent_threshold` is clamped to 100
    pub fn new(enabled: bool, renewal_percent_threshold: u32) -> Self {
        Self {
            enabled,
            renewal_percent_threshold: renewal_percent_threshold.min(100),
        }
    }

    /// Renewals per minute below which eviction is suspended
    pub fn threshold(&self, expected_renewals_per_min: u64) -> u64 {
        expected_renewals_per_min.saturating_mul(u64::from(self.renewal_percent_threshold)) / 100
    }

    /// Decide whether eviction may run
    pub fn evaluate(
        &self,
        expected_renewals_per_min: u64,
        renewals_last_minute: u64,
    ) -> PreservationSnapshot {
        let threshold = self.threshold(expected_renewals_per_min);
        PreservationSnapshot {
            enabled: self.enabled,
            expected_renewals_per_min,
            threshold_renewals_per_min: threshold,
            renewals_last_minute,
            eviction_allowed: !self.enabled || renewals_last_minute >= threshold,
        }
    }

    /// Maximum records one sweep may evict out of `registry_size`
    ///
    /// With self-preservation on, a sweep never evicts more than the share
    /// of the registry above the renewal threshold.
    pub fn eviction_limit(&self, registry_size: usize) -> usize {
        if !self.enabled {
            return registry_size;
        }
        let protected = self.threshold(registry_size as u64) as usize;
        registry_size - protected.min(registry_size)
    }
}

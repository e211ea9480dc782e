//! TigerStyle constants for Eddy
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Instance Limits
// =============================================================================

/// Maximum length of an instance ID in bytes
pub const INSTANCE_ID_LENGTH_BYTES_MAX: usize = 256;

/// Maximum length of an application name in bytes
pub const APP_NAME_LENGTH_BYTES_MAX: usize = 256;

/// Maximum number of metadata entries on a single instance
pub const INSTANCE_METADATA_COUNT_MAX: usize = 256;

/// Maximum number of instances held by one registry node
pub const REGISTRY_INSTANCES_COUNT_MAX: usize = 1_000_000;

// =============================================================================
// Lease
// =============================================================================

/// Default client renewal interval in seconds
pub const LEASE_RENEWAL_INTERVAL_SECS_DEFAULT: u32 = 30;

/// Default lease duration in seconds (tolerates 3 missed renewals)
pub const LEASE_DURATION_SECS_DEFAULT: u32 = 90;

/// Maximum lease duration a client may declare in seconds (1 hour)
pub const LEASE_DURATION_SECS_MAX: u32 = 60 * 60;

/// Minimum renewal interval a client may declare in seconds
pub const LEASE_RENEWAL_INTERVAL_SECS_MIN: u32 = 1;

// =============================================================================
// Eviction and Self-Preservation
// =============================================================================

/// Default interval between eviction sweeps in milliseconds (60 sec)
pub const EVICTION_INTERVAL_MS_DEFAULT: u64 = 60 * 1000;

/// Minimum interval between eviction sweeps in milliseconds
pub const EVICTION_INTERVAL_MS_MIN: u64 = 100;

/// Default renewal percentage below which eviction is suspended
pub const SELF_PRESERVATION_RENEWAL_PERCENT_DEFAULT: u32 = 85;

/// Width of the renewal-rate measurement bucket in milliseconds (1 min)
pub const RENEWAL_RATE_BUCKET_MS: u64 = 60 * 1000;

// =============================================================================
// Channel Liveness
// =============================================================================

/// Default interval between channel heartbeats in milliseconds (30 sec)
pub const CHANNEL_HEARTBEAT_INTERVAL_MS_DEFAULT: u64 = 30 * 1000;

/// Minimum interval between channel heartbeats in milliseconds
pub const CHANNEL_HEARTBEAT_INTERVAL_MS_MIN: u64 = 10;

/// Default number of missed heartbeats tolerated before closing a channel
pub const CHANNEL_HEARTBEAT_MISSED_COUNT_MAX: i64 = 3;

// =============================================================================
// Message Connection
// =============================================================================

/// Default acknowledgement timeout in milliseconds (30 sec)
pub const ACK_TIMEOUT_MS_DEFAULT: u64 = 30 * 1000;

/// Interval between pending-acknowledgement expiry checks in milliseconds
pub const ACK_CHECK_INTERVAL_MS_DEFAULT: u64 = 1000;

/// Maximum number of acknowledgements pending on one connection
pub const ACK_PENDING_COUNT_MAX: usize = 10_000;

/// Maximum size of a single framed message in bytes (10 MB)
pub const FRAME_SIZE_BYTES_MAX: usize = 10 * 1024 * 1024;

/// Capacity of per-connection message queues
pub const CONNECTION_QUEUE_DEPTH_MAX: usize = 1024;

// =============================================================================
// Replication
// =============================================================================

/// Maximum number of items in one replication batch
pub const REPLICATION_BATCH_ITEMS_COUNT_MAX: usize = 250;

/// Default interval between replication batch flushes in milliseconds
pub const REPLICATION_BATCH_INTERVAL_MS_DEFAULT: u64 = 500;

/// Maximum number of replication items queued per peer
pub const REPLICATION_QUEUE_DEPTH_MAX: usize = 10_000;

/// Default peer request timeout in milliseconds (5 sec)
pub const REPLICATION_REQUEST_TIMEOUT_MS_DEFAULT: u64 = 5 * 1000;

/// Delay before retrying a batch after a network failure in milliseconds
pub const REPLICATION_RETRY_DELAY_MS_DEFAULT: u64 = 1000;

/// Maximum number of peers in a replication cluster
pub const CLUSTER_PEERS_COUNT_MAX: usize = 64;

// =============================================================================
// Reconnect Backoff
// =============================================================================

/// Default initial reconnect delay in milliseconds
pub const RECONNECT_DELAY_MS_DEFAULT: u64 = 500;

/// Factor between the initial reconnect delay and the maximum delay
pub const RECONNECT_BACKOFF_MULTIPLIER_MAX: u64 = 10;

// Compile-time assertions for constant validity
const _: () = {
    assert!(LEASE_DURATION_SECS_DEFAULT > LEASE_RENEWAL_INTERVAL_SECS_DEFAULT);
    assert!(LEASE_DURATION_SECS_DEFAULT <= LEASE_DURATION_SECS_MAX);
    assert!(SELF_PRESERVATION_RENEWAL_PERCENT_DEFAULT <= 100);
    assert!(CHANNEL_HEARTBEAT_MISSED_COUNT_MAX >= 1);
    assert!(REPLICATION_BATCH_ITEMS_COUNT_MAX <= REPLICATION_QUEUE_DEPTH_MAX);
    assert!(RECONNECT_BACKOFF_MULTIPLIER_MAX >= 2);
    assert!(EVICTION_INTERVAL_MS_DEFAULT >= EVICTION_INTERVAL_MS_MIN);
};

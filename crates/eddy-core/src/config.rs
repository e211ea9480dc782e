//! Configuration for Eddy
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration for an Eddy node
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EddyConfig {
    /// Node identity and addresses
    #[serde(default)]
    pub node: NodeConfig,

    /// Lease registry configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Channel and connection configuration
    #[serde(default)]
    pub channel: ChannelConfig,

    /// Peer replication configuration
    #[serde(default)]
    pub replication: ReplicationConfig,

    /// Reconnect backoff configuration
    #[serde(default)]
    pub retry: RetryConfig,
}

impl EddyConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.node.validate()?;
        self.registry.validate()?;
        self.channel.validate()?;
        self.replication.validate()?;
        self.retry.validate()?;
        Ok(())
    }

    /// Configuration with short timers for simulation tests
    pub fn for_testing() -> Self {
        Self {
            node: NodeConfig {
                node_id: Some("node-test".to_string()),
                ..Default::default()
            },
            registry: RegistryConfig::for_testing(),
            channel: ChannelConfig::for_testing(),
            replication: ReplicationConfig::for_testing(),
            retry: RetryConfig::for_testing(),
        }
    }
}

// =============================================================================
// Node
// =============================================================================

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node identifier (host name if not specified)
    #[serde(default)]
    pub node_id: Option<String>,

    /// Address for the HTTP peer surface
    #[serde(default = "default_http_bind_address")]
    pub http_bind_address: String,

    /// Address for the channel listener
    #[serde(default = "default_channel_bind_address")]
    pub channel_bind_address: String,
}

fn default_http_bind_address() -> String {
    "0.0.0.0:8761".to_string()
}

fn default_channel_bind_address() -> String {
    "0.0.0.0:8762".to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: None,
            http_bind_address: default_http_bind_address(),
            channel_bind_address: default_channel_bind_address(),
        }
    }
}

impl NodeConfig {
    /// Resolved node id: the configured value, else the host name
    pub fn resolved_node_id(&self) -> String {
        if let Some(id) = &self.node_id {
            return id.clone();
        }
        hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .unwrap_or_else(|| "eddy-node".to_string())
    }

    fn validate(&self) -> Result<()> {
        if let Some(id) = &self.node_id {
            if id.is_empty() {
                return Err(Error::invalid_configuration(
                    "node.node_id",
                    "must not be empty when set",
                ));
            }
        }
        for (field, address) in [
            ("node.http_bind_address", &self.http_bind_address),
            ("node.channel_bind_address", &self.channel_bind_address),
        ] {
            if !address.contains(':') {
                return Err(Error::invalid_configuration(
                    field,
                    "must be in host:port format",
                ));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Lease registry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Interval between eviction sweeps (milliseconds)
    #[serde(default = "default_eviction_interval_ms")]
    pub eviction_interval_ms: u64,

    /// Whether self-preservation may suspend eviction
    #[serde(default = "default_true")]
    pub self_preservation_enabled: bool,

    /// Renewal percentage of expected below which eviction is suspended
    #[serde(default = "default_renewal_percent")]
    pub renewal_percent_threshold: u32,

    /// Width of the renewal-rate measurement bucket (milliseconds)
    #[serde(default = "default_renewal_bucket_ms")]
    pub renewal_bucket_ms: u64,
}

fn default_eviction_interval_ms() -> u64 {
    EVICTION_INTERVAL_MS_DEFAULT
}

fn default_true() -> bool {
    true
}

fn default_renewal_percent() -> u32 {
    SELF_PRESERVATION_RENEWAL_PERCENT_DEFAULT
}

fn default_renewal_bucket_ms() -> u64 {
    RENEWAL_RATE_BUCKET_MS
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            eviction_interval_ms: default_eviction_interval_ms(),
            self_preservation_enabled: true,
            renewal_percent_threshold: default_renewal_percent(),
            renewal_bucket_ms: default_renewal_bucket_ms(),
        }
    }
}

impl RegistryConfig {
    /// Short sweeps, self-preservation off
    pub fn for_testing() -> Self {
        Self {
            eviction_interval_ms: 1_000,
            self_preservation_enabled: false,
            ..Default::default()
        }
    }

    /// Eviction sweep interval
    pub fn eviction_interval(&self) -> Duration {
        Duration::from_millis(self.eviction_interval_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.eviction_interval_ms < EVICTION_INTERVAL_MS_MIN {
            return Err(Error::invalid_configuration(
                "registry.eviction_interval_ms",
                format!("must be at least {}", EVICTION_INTERVAL_MS_MIN),
            ));
        }
        if self.renewal_percent_threshold > 100 {
            return Err(Error::invalid_configuration(
                "registry.renewal_percent_threshold",
                "must be at most 100",
            ));
        }
        if self.renewal_bucket_ms == 0 {
            return Err(Error::invalid_configuration(
                "registry.renewal_bucket_ms",
                "must be positive",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Channel
// =============================================================================

/// Channel and message connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Interval between heartbeat ticks (milliseconds)
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Missed heartbeats tolerated before the channel closes
    #[serde(default = "default_heartbeat_missed_max")]
    pub heartbeat_missed_count_max: i64,

    /// Acknowledgement timeout; 0 disables the timeout (milliseconds)
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,

    /// Interval between pending-acknowledgement expiry checks (milliseconds)
    #[serde(default = "default_ack_check_interval_ms")]
    pub ack_check_interval_ms: u64,
}

fn default_heartbeat_interval_ms() -> u64 {
    CHANNEL_HEARTBEAT_INTERVAL_MS_DEFAULT
}

fn default_heartbeat_missed_max() -> i64 {
    CHANNEL_HEARTBEAT_MISSED_COUNT_MAX
}

fn default_ack_timeout_ms() -> u64 {
    ACK_TIMEOUT_MS_DEFAULT
}

fn default_ack_check_interval_ms() -> u64 {
    ACK_CHECK_INTERVAL_MS_DEFAULT
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_missed_count_max: default_heartbeat_missed_max(),
            ack_timeout_ms: default_ack_timeout_ms(),
            ack_check_interval_ms: default_ack_check_interval_ms(),
        }
    }
}

impl ChannelConfig {
    /// Fast heartbeats and acks
    pub fn for_testing() -> Self {
        Self {
            heartbeat_interval_ms: 100,
            heartbeat_missed_count_max: CHANNEL_HEARTBEAT_MISSED_COUNT_MAX,
            ack_timeout_ms: 500,
            ack_check_interval_ms: 100,
        }
    }

    /// Acknowledgement timeout, `None` when disabled
    pub fn ack_timeout(&self) -> Option<Duration> {
        (self.ack_timeout_ms > 0).then(|| Duration::from_millis(self.ack_timeout_ms))
    }

    fn validate(&self) -> Result<()> {
        if self.heartbeat_interval_ms < CHANNEL_HEARTBEAT_INTERVAL_MS_MIN {
            return Err(Error::invalid_configuration(
                "channel.heartbeat_interval_ms",
                format!("must be at least {}", CHANNEL_HEARTBEAT_INTERVAL_MS_MIN),
            ));
        }
        if self.heartbeat_missed_count_max < 1 {
            return Err(Error::invalid_configuration(
                "channel.heartbeat_missed_count_max",
                "must be at least 1",
            ));
        }
        if self.ack_check_interval_ms == 0 {
            return Err(Error::invalid_configuration(
                "channel.ack_check_interval_ms",
                "must be positive",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Replication
// =============================================================================

/// Peer replication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Base URLs of peer nodes (e.g. `http://peer-b:8761`)
    #[serde(default)]
    pub peer_urls: Vec<String>,

    /// Maximum items per batch
    #[serde(default = "default_batch_size")]
    pub batch_items_count_max: usize,

    /// Interval between batch flushes (milliseconds)
    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,

    /// Per-request timeout (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Delay before retrying a rescheduled batch (milliseconds)
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Maximum items queued per peer before new items are dropped
    #[serde(default = "default_queue_depth")]
    pub queue_depth_max: usize,
}

fn default_batch_size() -> usize {
    REPLICATION_BATCH_ITEMS_COUNT_MAX
}

fn default_batch_interval_ms() -> u64 {
    REPLICATION_BATCH_INTERVAL_MS_DEFAULT
}

fn default_request_timeout_ms() -> u64 {
    REPLICATION_REQUEST_TIMEOUT_MS_DEFAULT
}

fn default_retry_delay_ms() -> u64 {
    REPLICATION_RETRY_DELAY_MS_DEFAULT
}

fn default_queue_depth() -> usize {
    REPLICATION_QUEUE_DEPTH_MAX
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            peer_urls: Vec::new(),
            batch_items_count_max: default_batch_size(),
            batch_interval_ms: default_batch_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            queue_depth_max: default_queue_depth(),
        }
    }
}

impl ReplicationConfig {
    /// Small batches, fast flushes
    pub fn for_testing() -> Self {
        Self {
            peer_urls: Vec::new(),
            batch_items_count_max: 10,
            batch_interval_ms: 50,
            request_timeout_ms: 1_000,
            retry_delay_ms: 100,
            queue_depth_max: 100,
        }
    }

    /// Per-request timeout
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.peer_urls.len() > CLUSTER_PEERS_COUNT_MAX {
            return Err(Error::invalid_configuration(
                "replication.peer_urls",
                format!(
                    "{} peers exceeds limit {}",
                    self.peer_urls.len(),
                    CLUSTER_PEERS_COUNT_MAX
                ),
            ));
        }
        if let Some(url) = self
            .peer_urls
            .iter()
            .find(|url| !url.starts_with("http://") && !url.starts_with("https://"))
        {
            return Err(Error::invalid_configuration(
                "replication.peer_urls",
                format!("{} is not an http(s) url", url),
            ));
        }
        if self.batch_items_count_max == 0
            || self.batch_items_count_max > REPLICATION_BATCH_ITEMS_COUNT_MAX
        {
            return Err(Error::invalid_configuration(
                "replication.batch_items_count_max",
                format!("must be in 1..={}", REPLICATION_BATCH_ITEMS_COUNT_MAX),
            ));
        }
        if self.batch_interval_ms == 0 {
            return Err(Error::invalid_configuration(
                "replication.batch_interval_ms",
                "must be positive",
            ));
        }
        if self.queue_depth_max < self.batch_items_count_max {
            return Err(Error::invalid_configuration(
                "replication.queue_depth_max",
                "must hold at least one full batch",
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Retry
// =============================================================================

/// Reconnect backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Initial reconnect delay; the maximum is ten times this (milliseconds)
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

fn default_reconnect_delay_ms() -> u64 {
    RECONNECT_DELAY_MS_DEFAULT
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Fast reconnects
    pub fn for_testing() -> Self {
        Self {
            reconnect_delay_ms: 100,
        }
    }

    /// Maximum reconnect delay
    pub fn reconnect_delay_max_ms(&self) -> u64 {
        self.reconnect_delay_ms
            .saturating_mul(RECONNECT_BACKOFF_MULTIPLIER_MAX)
    }

    fn validate(&self) -> Result<()> {
        if self.reconnect_delay_ms == 0 {
            return Err(Error::invalid_configuration(
                "retry.reconnect_delay_ms",
                "must be positive",
            ));
        }
        Ok(())
    }
}

//! Instance records
//!
//! TigerStyle: Validated construction from a plain field struct, immutable
//! snapshots once built.

use crate::constants::{
    APP_NAME_LENGTH_BYTES_MAX, INSTANCE_ID_LENGTH_BYTES_MAX, INSTANCE_METADATA_COUNT_MAX,
};
use crate::error::{Error, Result};
use crate::lease::LeaseInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// InstanceId
// =============================================================================

/// Unique identifier of a registered instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(String);

impl InstanceId {
    /// Create a new instance ID with validation
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();

        if id.is_empty() {
            return Err(Error::InvalidInstanceId {
                id,
                reason: "must not be empty".into(),
            });
        }
        if id.len() > INSTANCE_ID_LENGTH_BYTES_MAX {
            return Err(Error::InvalidInstanceId {
                reason: format!(
                    "{} bytes exceeds limit of {} bytes",
                    id.len(),
                    INSTANCE_ID_LENGTH_BYTES_MAX
                ),
                id,
            });
        }
        if id.chars().any(|c| c.is_whitespace() || c == '/') {
            return Err(Error::InvalidInstanceId {
                id,
                reason: "must not contain whitespace or '/'".into(),
            });
        }

        Ok(Self(id))
    }

    /// Get the ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for InstanceId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// InstanceStatus
// =============================================================================

/// Reported status of an instance
///
/// Variants are declared in the alphabetical order of their wire names so
/// that `Ord` yields the fixed ordering used by the reconcile hash code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    Down,
    OutOfService,
    Starting,
    Unknown,
    Up,
}

impl InstanceStatus {
    /// All statuses in reconcile order
    pub const ALL: [InstanceStatus; 5] = [
        InstanceStatus::Down,
        InstanceStatus::OutOfService,
        InstanceStatus::Starting,
        InstanceStatus::Unknown,
        InstanceStatus::Up,
    ];

    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Down => "DOWN",
            InstanceStatus::OutOfService => "OUT_OF_SERVICE",
            InstanceStatus::Starting => "STARTING",
            InstanceStatus::Unknown => "UNKNOWN",
            InstanceStatus::Up => "UP",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        InstanceStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidStatus {
                value: s.to_string(),
            })
    }
}

// =============================================================================
// DataCenterInfo
// =============================================================================

/// Host name and IP pair as seen from one side of a network boundary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressPair {
    pub host_name: String,
    pub ip_addr: String,
}

/// Where an instance runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DataCenterInfo {
    /// Generic data center with no further detail
    Basic { name: String },
    /// Cloud deployment with public and private addresses
    #[serde(rename_all = "camelCase")]
    Cloud {
        name: String,
        region: String,
        zone: String,
        public_address: AddressPair,
        private_address: AddressPair,
    },
}

impl Default for DataCenterInfo {
    fn default() -> Self {
        DataCenterInfo::Basic {
            name: "default".to_string(),
        }
    }
}

// =============================================================================
// InstanceInfo
// =============================================================================

/// Input fields for constructing an [`InstanceInfo`]
///
/// Plain data with public fields; all validation happens in
/// [`InstanceInfo::new`].
#[derive(Debug, Clone)]
pub struct InstanceFields {
    pub id: String,
    pub app: String,
    pub app_group: Option<String>,
    pub asg_name: Option<String>,
    pub host_name: String,
    pub ip_addr: String,
    pub port: u16,
    pub secure_port: u16,
    pub secure_port_enabled: bool,
    pub status: InstanceStatus,
    pub overridden_status: Option<InstanceStatus>,
    pub vip_address: Option<String>,
    pub secure_vip_address: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub data_center: DataCenterInfo,
    pub last_dirty_timestamp: u64,
    pub lease: LeaseInfo,
}

impl Default for InstanceFields {
    fn default() -> Self {
        Self {
            id: String::new(),
            app: String::new(),
            app_group: None,
            asg_name: None,
            host_name: "localhost".to_string(),
            ip_addr: "127.0.0.1".to_string(),
            port: 80,
            secure_port: 443,
            secure_port_enabled: false,
            status: InstanceStatus::Up,
            overridden_status: None,
            vip_address: None,
            secure_vip_address: None,
            metadata: BTreeMap::new(),
            data_center: DataCenterInfo::default(),
            last_dirty_timestamp: 0,
            lease: LeaseInfo::default(),
        }
    }
}

/// Immutable snapshot of one registered instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceInfo {
    pub id: InstanceId,
    pub app: String,
    pub app_group: Option<String>,
    pub asg_name: Option<String>,
    pub host_name: String,
    pub ip_addr: String,
    pub port: u16,
    pub secure_port: u16,
    pub secure_port_enabled: bool,
    pub status: InstanceStatus,
    pub overridden_status: Option<InstanceStatus>,
    pub vip_address: Option<String>,
    pub secure_vip_address: Option<String>,
    pub metadata: BTreeMap<String, String>,
    pub data_center: DataCenterInfo,
    pub last_dirty_timestamp: u64,
    pub lease: LeaseInfo,
}

impl InstanceInfo {
    /// Build a validated instance snapshot
    pub fn new(fields: InstanceFields) -> Result<Self> {
        let id = InstanceId::new(fields.id)?;

        if fields.app.is_empty() {
            return Err(Error::invalid_instance(
                id.as_str(),
                "app",
                "must not be empty",
            ));
        }
        if fields.app.len() > APP_NAME_LENGTH_BYTES_MAX {
            return Err(Error::invalid_instance(
                id.as_str(),
                "app",
                format!("exceeds {} bytes", APP_NAME_LENGTH_BYTES_MAX),
            ));
        }
        if fields.metadata.len() > INSTANCE_METADATA_COUNT_MAX {
            return Err(Error::invalid_instance(
                id.as_str(),
                "metadata",
                format!(
                    "{} entries exceeds limit of {}",
                    fields.metadata.len(),
                    INSTANCE_METADATA_COUNT_MAX
                ),
            ));
        }

        Ok(Self {
            id,
            app: fields.app,
            app_group: fields.app_group,
            asg_name: fields.asg_name,
            host_name: fields.host_name,
            ip_addr: fields.ip_addr,
            port: fields.port,
            secure_port: fields.secure_port,
            secure_port_enabled: fields.secure_port_enabled,
            status: fields.status,
            overridden_status: fields.overridden_status,
            vip_address: fields.vip_address,
            secure_vip_address: fields.secure_vip_address,
            metadata: fields.metadata,
            data_center: fields.data_center,
            last_dirty_timestamp: fields.last_dirty_timestamp,
            lease: fields.lease,
        })
    }

    /// The status readers should act on: an operator override wins
    pub fn effective_status(&self) -> InstanceStatus {
        match self.overridden_status {
            Some(status) if status != InstanceStatus::Unknown => status,
            _ => self.status,
        }
    }

    /// Copy of this snapshot with a different status
    pub fn with_status(&self, status: InstanceStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Copy of this snapshot with a different lease
    pub fn with_lease(&self, lease: LeaseInfo) -> Self {
        Self {
            lease,
            ..self.clone()
        }
    }

    /// Copy of this snapshot with a new dirty timestamp
    pub fn with_last_dirty_timestamp(&self, last_dirty_timestamp: u64) -> Self {
        Self {
            last_dirty_timestamp,
            ..self.clone()
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn test_instance(id: &str, app: &str) -> InstanceInfo {
        InstanceInfo::new(InstanceFields {
            id: id.to_string(),
            app: app.to_string(),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_instance_id_valid() {
        let id = InstanceId::new("i-123").unwrap();
        assert_eq!(id.as_str(), "i-123");
        assert_eq!(id.to_string(), "i-123");
    }

    #[test]
    fn test_instance_id_invalid() {
        assert!(InstanceId::new("").is_err());
        assert!(InstanceId::new("a b").is_err());
        assert!(InstanceId::new("a/b").is_err());
        assert!(InstanceId::new("x".repeat(INSTANCE_ID_LENGTH_BYTES_MAX + 1)).is_err());
    }

    #[test]
    fn test_status_round_trip_names() {
        for status in InstanceStatus::ALL {
            assert_eq!(status.as_str().parse::<InstanceStatus>().unwrap(), status);
        }
        assert_eq!(
            "out_of_service".parse::<InstanceStatus>().unwrap(),
            InstanceStatus::OutOfService
        );
        assert!("SIDEWAYS".parse::<InstanceStatus>().is_err());
    }

    #[test]
    fn test_status_order_is_alphabetical() {
        let mut names: Vec<&str> = InstanceStatus::ALL.iter().map(|s| s.as_str()).collect();
        let sorted = {
            let mut n = names.clone();
            n.sort();
            n
        };
        assert_eq!(names, sorted);
        names.dedup();
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn test_status_serde_name() {
        let json = serde_json::to_string(&InstanceStatus::OutOfService).unwrap();
        assert_eq!(json, "\"OUT_OF_SERVICE\"");
    }

    #[test]
    fn test_instance_requires_app() {
        let result = InstanceInfo::new(InstanceFields {
            id: "i-1".into(),
            ..Default::default()
        });
        assert!(matches!(result, Err(Error::InvalidInstance { .. })));
    }

    #[test]
    fn test_effective_status_prefers_override() {
        let mut instance = test_instance("i-1", "X");
        assert_eq!(instance.effective_status(), InstanceStatus::Up);

        instance.overridden_status = Some(InstanceStatus::OutOfService);
        assert_eq!(instance.effective_status(), InstanceStatus::OutOfService);

        instance.overridden_status = Some(InstanceStatus::Unknown);
        assert_eq!(instance.effective_status(), InstanceStatus::Up);
    }

    #[test]
    fn test_instance_json_shape() {
        let instance = test_instance("i-1", "X");
        let json = serde_json::to_value(&instance).unwrap();
        assert_eq!(json["id"], "i-1");
        assert_eq!(json["lastDirtyTimestamp"], 0);
        assert_eq!(json["dataCenter"]["kind"], "basic");

        let back: InstanceInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, instance);
    }
}

//! Field-level change descriptors
//!
//! TigerStyle: One delta per changed field, applied in order, exact round trip.
//!
//! `diff(old, new)` produces the deltas that turn `old` into `new`, and
//! `apply(old, &deltas)` reproduces `new` exactly.

use crate::error::{Error, Result};
use crate::instance::{DataCenterInfo, InstanceId, InstanceInfo, InstanceStatus};
use crate::lease::LeaseInfo;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The new value of a single instance field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "field", content = "value", rename_all = "camelCase")]
pub enum FieldChange {
    App(String),
    AppGroup(Option<String>),
    AsgName(Option<String>),
    HostName(String),
    IpAddr(String),
    Port(u16),
    SecurePort(u16),
    SecurePortEnabled(bool),
    Status(InstanceStatus),
    OverriddenStatus(Option<InstanceStatus>),
    VipAddress(Option<String>),
    SecureVipAddress(Option<String>),
    Metadata(BTreeMap<String, String>),
    DataCenter(DataCenterInfo),
    LastDirtyTimestamp(u64),
    Lease(LeaseInfo),
}

impl FieldChange {
    /// Name of the field this change targets
    pub fn field_name(&self) -> &'static str {
        match self {
            FieldChange::App(_) => "app",
            FieldChange::AppGroup(_) => "appGroup",
            FieldChange::AsgName(_) => "asgName",
            FieldChange::HostName(_) => "hostName",
            FieldChange::IpAddr(_) => "ipAddr",
            FieldChange::Port(_) => "port",
            FieldChange::SecurePort(_) => "securePort",
            FieldChange::SecurePortEnabled(_) => "securePortEnabled",
            FieldChange::Status(_) => "status",
            FieldChange::OverriddenStatus(_) => "overriddenStatus",
            FieldChange::VipAddress(_) => "vipAddress",
            FieldChange::SecureVipAddress(_) => "secureVipAddress",
            FieldChange::Metadata(_) => "metadata",
            FieldChange::DataCenter(_) => "dataCenter",
            FieldChange::LastDirtyTimestamp(_) => "lastDirtyTimestamp",
            FieldChange::Lease(_) => "lease",
        }
    }
}

/// A change to one field of one instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub id: InstanceId,
    #[serde(flatten)]
    pub change: FieldChange,
}

impl Delta {
    /// Create a delta for the given instance
    pub fn new(id: InstanceId, change: FieldChange) -> Self {
        Self { id, change }
    }

    /// Apply this delta to an instance in place
    pub fn apply_to(&self, instance: &mut InstanceInfo) -> Result<()> {
        if self.id != instance.id {
            return Err(Error::DeltaMismatch {
                delta_id: self.id.to_string(),
                instance_id: instance.id.to_string(),
            });
        }

        match &self.change {
            FieldChange::App(v) => instance.app = v.clone(),
            FieldChange::AppGroup(v) => instance.app_group = v.clone(),
            FieldChange::AsgName(v) => instance.asg_name = v.clone(),
            FieldChange::HostName(v) => instance.host_name = v.clone(),
            FieldChange::IpAddr(v) => instance.ip_addr = v.clone(),
            FieldChange::Port(v) => instance.port = *v,
            FieldChange::SecurePort(v) => instance.secure_port = *v,
            FieldChange::SecurePortEnabled(v) => instance.secure_port_enabled = *v,
            FieldChange::Status(v) => instance.status = *v,
            FieldChange::OverriddenStatus(v) => instance.overridden_status = *v,
            FieldChange::VipAddress(v) => instance.vip_address = v.clone(),
            FieldChange::SecureVipAddress(v) => instance.secure_vip_address = v.clone(),
            FieldChange::Metadata(v) => instance.metadata = v.clone(),
            FieldChange::DataCenter(v) => instance.data_center = v.clone(),
            FieldChange::LastDirtyTimestamp(v) => instance.last_dirty_timestamp = *v,
            FieldChange::Lease(v) => instance.lease = *v,
        }

        Ok(())
    }
}

/// Compute the deltas that turn `old` into `new`
///
/// Both snapshots must describe the same instance.
pub fn diff(old: &InstanceInfo, new: &InstanceInfo) -> Result<Vec<Delta>> {
    if old.id != new.id {
        return Err(Error::DeltaMismatch {
            delta_id: new.id.to_string(),
            instance_id: old.id.to_string(),
        });
    }

    let mut changes = Vec::new();

    if old.app != new.app {
        changes.push(FieldChange::App(new.app.clone()));
    }
    if old.app_group != new.app_group {
        changes.push(FieldChange::AppGroup(new.app_group.clone()));
    }
    if old.asg_name != new.asg_name {
        changes.push(FieldChange::AsgName(new.asg_name.clone()));
    }
    if old.host_name != new.host_name {
        changes.push(FieldChange::HostName(new.host_name.clone()));
    }
    if old.ip_addr != new.ip_addr {
        changes.push(FieldChange::IpAddr(new.ip_addr.clone()));
    }
    if old.port != new.port {
        changes.push(FieldChange::Port(new.port));
    }
    if old.secure_port != new.secure_port {
        changes.push(FieldChange::SecurePort(new.secure_port));
    }
    if old.secure_port_enabled != new.secure_port_enabled {
        changes.push(FieldChange::SecurePortEnabled(new.secure_port_enabled));
    }
    if old.status != new.status {
        changes.push(FieldChange::Status(new.status));
    }
    if old.overridden_status != new.overridden_status {
        changes.push(FieldChange::OverriddenStatus(new.overridden_status));
    }
    if old.vip_address != new.vip_address {
        changes.push(FieldChange::VipAddress(new.vip_address.clone()));
    }
    if old.secure_vip_address != new.secure_vip_address {
        changes.push(FieldChange::SecureVipAddress(new.secure_vip_address.clone()));
    }
    if old.metadata != new.metadata {
        changes.push(FieldChange::Metadata(new.metadata.clone()));
    }
    if old.data_center != new.data_center {
        changes.push(FieldChange::DataCenter(new.data_center.clone()));
    }
    if old.last_dirty_timestamp != new.last_dirty_timestamp {
        changes.push(FieldChange::LastDirtyTimestamp(new.last_dirty_timestamp));
    }
    if old.lease != new.lease {
        changes.push(FieldChange::Lease(new.lease));
    }

    Ok(changes
        .into_iter()
        .map(|change| Delta::new(new.id.clone(), change))
        .collect())
}

/// Apply deltas in order to a copy of `old`
pub fn apply(old: &InstanceInfo, deltas: &[Delta]) -> Result<InstanceInfo> {
    let mut instance = old.clone();
    for delta in deltas {
        delta.apply_to(&mut instance)?;
    }
    Ok(instance)
}

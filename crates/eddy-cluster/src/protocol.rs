//! Peer replication wire types
//!
//! TigerStyle: Plain serde structs, camelCase on the wire, one item type for
//! every action.
//!
//! A batch is a JSON array of [`ReplicationItem`]s posted to
//! [`BATCH_PATH`]. The answer is a JSON array of [`ItemResponse`]s in the
//! same order.

use eddy_core::{InstanceId, InstanceInfo, InstanceStatus};
use serde::{Deserialize, Serialize};

// =============================================================================
// Paths and headers
// =============================================================================

/// Batch replication endpoint
pub const BATCH_PATH: &str = "/peerreplication/batch";

/// Header naming the node that sent a replication request
pub const PEER_NODE_HEADER: &str = "x-eddy-peer-node";

// =============================================================================
// Items
// =============================================================================

/// What a replication item asks the peer to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Register,
    Update,
    #[serde(alias = "Cancel")]
    Unregister,
    Heartbeat,
    StatusUpdate,
    DeleteStatusOverride,
}

/// One replicated write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationItem {
    pub action: Action,
    pub app_name: String,
    pub id: InstanceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_info: Option<InstanceInfo>,
    pub last_dirty_timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<InstanceStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overridden_status: Option<InstanceStatus>,
}

impl ReplicationItem {
    fn carrying(action: Action, instance: &InstanceInfo) -> Self {
        Self {
            action,
            app_name: instance.app.clone(),
            id: instance.id.clone(),
            instance_info: Some(instance.clone()),
            last_dirty_timestamp: instance.last_dirty_timestamp,
            status: Some(instance.status),
            overridden_status: instance.overridden_status,
        }
    }

    /// Replicate a registration
    pub fn register(instance: &InstanceInfo) -> Self {
        Self::carrying(Action::Register, instance)
    }

    /// Replicate an update
    pub fn update(instance: &InstanceInfo) -> Self {
        Self::carrying(Action::Update, instance)
    }

    /// Replicate a renewal; the copy rides along for dirty-timestamp checks
    pub fn heartbeat(instance: &InstanceInfo) -> Self {
        Self::carrying(Action::Heartbeat, instance)
    }

    /// Replicate an unregistration
    pub fn unregister(app: impl Into<String>, id: InstanceId, last_dirty_timestamp: u64) -> Self {
        Self {
            action: Action::Unregister,
            app_name: app.into(),
            id,
            instance_info: None,
            last_dirty_timestamp,
            status: None,
            overridden_status: None,
        }
    }

    /// Replicate an operator status change
    pub fn status_update(
        app: impl Into<String>,
        id: InstanceId,
        status: InstanceStatus,
        last_dirty_timestamp: u64,
    ) -> Self {
        Self {
            action: Action::StatusUpdate,
            app_name: app.into(),
            id,
            instance_info: None,
            last_dirty_timestamp,
            status: Some(status),
            overridden_status: None,
        }
    }

    /// Replicate removal of an operator override
    pub fn delete_status_override(
        app: impl Into<String>,
        id: InstanceId,
        status: Option<InstanceStatus>,
        last_dirty_timestamp: u64,
    ) -> Self {
        Self {
            action: Action::DeleteStatusOverride,
            app_name: app.into(),
            id,
            instance_info: None,
            last_dirty_timestamp,
            status,
            overridden_status: None,
        }
    }
}

/// Outcome of one item, parallel to the request list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResponse {
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_entity: Option<InstanceInfo>,
}

impl ItemResponse {
    /// Bare status
    pub fn status(status_code: u16) -> Self {
        Self {
            status_code,
            response_entity: None,
        }
    }

    /// 409 carrying the copy the responder holds
    pub fn conflict(local: InstanceInfo) -> Self {
        Self {
            status_code: 409,
            response_entity: Some(local),
        }
    }

    /// Status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

// =============================================================================
// Query strings
// =============================================================================

/// Query of `PUT /apps/{app}/{id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatQuery {
    #[serde(default)]
    pub status: Option<InstanceStatus>,
    #[serde(rename = "lastDirtyTimestamp")]
    pub last_dirty_timestamp: u64,
    #[serde(default, rename = "overriddenstatus")]
    pub overridden_status: Option<InstanceStatus>,
}

/// Auto-scaling group state pushed through `PUT /asg/{name}/status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AsgStatus {
    Enabled,
    Disabled,
}

impl AsgStatus {
    /// Status applied to every member of the group
    pub fn instance_status(&self) -> InstanceStatus {
        match self {
            AsgStatus::Enabled => InstanceStatus::Up,
            AsgStatus::Disabled => InstanceStatus::OutOfService,
        }
    }
}

/// Query of `PUT /asg/{name}/status`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AsgStatusQuery {
    pub value: AsgStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use eddy_core::InstanceFields;

    fn instance() -> InstanceInfo {
        InstanceInfo::new(InstanceFields {
            id: "i-1".into(),
            app: "X".into(),
            status: InstanceStatus::Up,
            last_dirty_timestamp: 100,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn test_item_wire_shape() {
        let item = ReplicationItem::unregister("X", InstanceId::new("i-1").unwrap(), 7);
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "action": "Unregister",
                "appName": "X",
                "id": "i-1",
                "lastDirtyTimestamp": 7
            })
        );
    }

    #[test]
    fn test_cancel_is_unregister() {
        let item: ReplicationItem = serde_json::from_value(serde_json::json!({
            "action": "Cancel",
            "appName": "X",
            "id": "i-1",
            "lastDirtyTimestamp": 7
        }))
        .unwrap();
        assert_eq!(item.action, Action::Unregister);
    }

    #[test]
    fn test_heartbeat_carries_copy() {
        let item = ReplicationItem::heartbeat(&instance());
        assert_eq!(item.action, Action::Heartbeat);
        assert_eq!(item.last_dirty_timestamp, 100);
        assert_eq!(item.status, Some(InstanceStatus::Up));
        assert!(item.instance_info.is_some());
    }

    #[test]
    fn test_conflict_response_shape() {
        let response = ItemResponse::conflict(instance());
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["statusCode"], 409);
        assert_eq!(json["responseEntity"]["lastDirtyTimestamp"], 100);
        assert!(!response.is_success());
        assert!(ItemResponse::status(204).is_success());
    }

    #[test]
    fn test_asg_status() {
        let query: AsgStatusQuery =
            serde_json::from_value(serde_json::json!({"value": "DISABLED"})).unwrap();
        assert_eq!(query.value.instance_status(), InstanceStatus::OutOfService);
        assert_eq!(AsgStatus::Enabled.instance_status(), InstanceStatus::Up);
    }
}

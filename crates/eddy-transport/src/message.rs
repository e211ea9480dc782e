//! Wire message taxonomy
//!
//! TigerStyle: One tagged union for every message, an explicit table of
//! which kinds each protocol carries.
//!
//! Every protocol carries `Heartbeat`, `Acknowledgement`, `GoAway` and
//! `ErrorMessage`. Beyond those:
//! - Registration: `ClientHello`, `ServerHello`, `Register`, `Unregister`
//! - Interest: `ClientHello`, `ServerHello`, `InterestRegistration`,
//!   `UnregisterInterestSet`, `AddInstance`, `UpdateInstanceInfo`,
//!   `DeleteInstance`, `StreamStateUpdate`
//! - Replication: `ReplicationHello`, `ReplicationHelloReply`, `Register`,
//!   `Unregister`

use eddy_core::{Delta, InstanceId, InstanceInfo, Interest, Source, StreamState};
use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Protocol Type
// =============================================================================

/// The protocol a connection speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolType {
    /// A client registering its own instance
    Registration,
    /// A client following an interest
    Interest,
    /// A peer node replicating its local registrations
    Replication,
}

impl fmt::Display for ProtocolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolType::Registration => "Registration",
            ProtocolType::Interest => "Interest",
            ProtocolType::Replication => "Replication",
        };
        f.write_str(name)
    }
}

// =============================================================================
// Message Kind
// =============================================================================

/// Discriminant of a [`Message`], as carried in the frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MessageKind {
    ClientHello,
    ServerHello,
    ReplicationHello,
    ReplicationHelloReply,
    Heartbeat,
    Acknowledgement,
    GoAway,
    InterestRegistration,
    UnregisterInterestSet,
    AddInstance,
    UpdateInstanceInfo,
    DeleteInstance,
    StreamStateUpdate,
    Register,
    Unregister,
    ErrorMessage,
}

impl MessageKind {
    /// Every kind, in declaration order
    pub const ALL: [MessageKind; 16] = [
        MessageKind::ClientHello,
        MessageKind::ServerHello,
        MessageKind::ReplicationHello,
        MessageKind::ReplicationHelloReply,
        MessageKind::Heartbeat,
        MessageKind::Acknowledgement,
        MessageKind::GoAway,
        MessageKind::InterestRegistration,
        MessageKind::UnregisterInterestSet,
        MessageKind::AddInstance,
        MessageKind::UpdateInstanceInfo,
        MessageKind::DeleteInstance,
        MessageKind::StreamStateUpdate,
        MessageKind::Register,
        MessageKind::Unregister,
        MessageKind::ErrorMessage,
    ];

    /// Whether a connection speaking `protocol` may carry this kind
    pub fn is_valid_for(&self, protocol: ProtocolType) -> bool {
        use MessageKind::*;
        match self {
            Heartbeat | Acknowledgement | GoAway | ErrorMessage => true,
            ClientHello | ServerHello => matches!(
                protocol,
                ProtocolType::Registration | ProtocolType::Interest
            ),
            Register | Unregister => matches!(
                protocol,
                ProtocolType::Registration | ProtocolType::Replication
            ),
            ReplicationHello | ReplicationHelloReply => protocol == ProtocolType::Replication,
            InterestRegistration
            | UnregisterInterestSet
            | AddInstance
            | UpdateInstanceInfo
            | DeleteInstance
            | StreamStateUpdate => protocol == ProtocolType::Interest,
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Opening message of a client connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientHello {
    pub client_id: String,
}

/// Server answer to [`ClientHello`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerHello {
    pub server_id: String,
}

/// Opening message of a replication connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationHello {
    /// The sending node
    pub source: Source,
    /// Number of instances the sender is about to replicate
    pub registry_size: usize,
}

/// Receiver answer to [`ReplicationHello`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationHelloReply {
    /// The receiving node
    pub source: Source,
    /// Whether the sender should proceed; false on a replication loop
    pub send_snapshot: bool,
}

/// Graceful close request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoAway {
    pub reason: String,
}

/// Removal of a registration
///
/// A registration connection holds exactly one instance and sends no id;
/// a replication connection names the instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unregister {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<InstanceId>,
}

/// Category of an [`ErrorBody`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The channel was closed when the message arrived
    ChannelClosed,
    /// The message was not expected in the channel's current state
    ProtocolViolation,
    /// The server failed to apply the message
    Internal,
}

/// In-band error report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

// =============================================================================
// Message
// =============================================================================

/// Every message that crosses a connection
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    ClientHello(ClientHello),
    ServerHello(ServerHello),
    ReplicationHello(ReplicationHello),
    ReplicationHelloReply(ReplicationHelloReply),
    Heartbeat,
    Acknowledgement,
    GoAway(GoAway),
    InterestRegistration(Interest),
    UnregisterInterestSet,
    AddInstance(Box<InstanceInfo>),
    UpdateInstanceInfo(Delta),
    DeleteInstance(InstanceId),
    StreamStateUpdate(StreamState),
    Register(Box<InstanceInfo>),
    Unregister(Unregister),
    ErrorMessage(ErrorBody),
}

impl Message {
    /// Discriminant of this message
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::ClientHello(_) => MessageKind::ClientHello,
            Message::ServerHello(_) => MessageKind::ServerHello,
            Message::ReplicationHello(_) => MessageKind::ReplicationHello,
            Message::ReplicationHelloReply(_) => MessageKind::ReplicationHelloReply,
            Message::Heartbeat => MessageKind::Heartbeat,
            Message::Acknowledgement => MessageKind::Acknowledgement,
            Message::GoAway(_) => MessageKind::GoAway,
            Message::InterestRegistration(_) => MessageKind::InterestRegistration,
            Message::UnregisterInterestSet => MessageKind::UnregisterInterestSet,
            Message::AddInstance(_) => MessageKind::AddInstance,
            Message::UpdateInstanceInfo(_) => MessageKind::UpdateInstanceInfo,
            Message::DeleteInstance(_) => MessageKind::DeleteInstance,
            Message::StreamStateUpdate(_) => MessageKind::StreamStateUpdate,
            Message::Register(_) => MessageKind::Register,
            Message::Unregister(_) => MessageKind::Unregister,
            Message::ErrorMessage(_) => MessageKind::ErrorMessage,
        }
    }

    /// Whether a connection speaking `protocol` may carry this message
    pub fn is_valid_for(&self, protocol: ProtocolType) -> bool {
        self.kind().is_valid_for(protocol)
    }

    /// Graceful close request
    pub fn go_away(reason: impl Into<String>) -> Self {
        Message::GoAway(GoAway {
            reason: reason.into(),
        })
    }

    /// In-band error report
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Message::ErrorMessage(ErrorBody {
            code,
            message: message.into(),
        })
    }

    /// Registration of `instance`
    pub fn register(instance: InstanceInfo) -> Self {
        Message::Register(Box::new(instance))
    }

    /// Unregistration, naming the instance when the protocol needs it
    pub fn unregister(id: Option<InstanceId>) -> Self {
        Message::Unregister(Unregister { id })
    }
}

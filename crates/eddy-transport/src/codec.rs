//! Message codec and framing
//!
//! TigerStyle: Explicit kind → encode/decode table built once, bounded frames.
//!
//! Wire format:
//!
//! ```text
//!   ┌──────────────────┬───────────────────────────────────────────────┐
//!   │ length (u32, BE) │ {"protocol":..., "kind":..., "body":...}      │
//!   └──────────────────┴───────────────────────────────────────────────┘
//! ```
//!
//! A codec is bound to one [`ProtocolType`]. A listener that serves several
//! protocols on one port starts with an unbound codec, which adopts the
//! protocol declared by the first frame it decodes.

use crate::error::{TransportError, TransportResult};
use crate::message::{Message, MessageKind, ProtocolType};
use bytes::{BufMut, Bytes, BytesMut};
use eddy_core::constants::FRAME_SIZE_BYTES_MAX;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the frame length prefix in bytes
pub const FRAME_HEADER_SIZE_BYTES: usize = 4;

// =============================================================================
// Codec Table
// =============================================================================

type EncodeFn = fn(&Message) -> TransportResult<Value>;
type DecodeFn = fn(Value) -> TransportResult<Message>;

struct CodecEntry {
    encode: EncodeFn,
    decode: DecodeFn,
}

fn kind_mismatch(message: &Message) -> TransportError {
    TransportError::codec(format!("codec entry does not match {}", message.kind()))
}

macro_rules! body_entry {
    ($variant:ident) => {
        CodecEntry {
            encode: |message| match message {
                Message::$variant(body) => Ok(serde_json::to_value(body)?),
                other => Err(kind_mismatch(other)),
            },
            decode: |value| Ok(Message::$variant(serde_json::from_value(value)?)),
        }
    };
}

macro_rules! unit_entry {
    ($variant:ident) => {
        CodecEntry {
            encode: |message| match message {
                Message::$variant => Ok(Value::Null),
                other => Err(kind_mismatch(other)),
            },
            decode: |_| Ok(Message::$variant),
        }
    };
}

fn codec_table() -> &'static HashMap<MessageKind, CodecEntry> {
    static TABLE: OnceLock<HashMap<MessageKind, CodecEntry>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let table = HashMap::from([
            (MessageKind::ClientHello, body_entry!(ClientHello)),
            (MessageKind::ServerHello, body_entry!(ServerHello)),
            (MessageKind::ReplicationHello, body_entry!(ReplicationHello)),
            (
                MessageKind::ReplicationHelloReply,
                body_entry!(ReplicationHelloReply),
            ),
            (MessageKind::Heartbeat, unit_entry!(Heartbeat)),
            (MessageKind::Acknowledgement, unit_entry!(Acknowledgement)),
            (MessageKind::GoAway, body_entry!(GoAway)),
            (
                MessageKind::InterestRegistration,
                body_entry!(InterestRegistration),
            ),
            (
                MessageKind::UnregisterInterestSet,
                unit_entry!(UnregisterInterestSet),
            ),
            (MessageKind::AddInstance, body_entry!(AddInstance)),
            (MessageKind::UpdateInstanceInfo, body_entry!(UpdateInstanceInfo)),
            (MessageKind::DeleteInstance, body_entry!(DeleteInstance)),
            (MessageKind::StreamStateUpdate, body_entry!(StreamStateUpdate)),
            (MessageKind::Register, body_entry!(Register)),
            (MessageKind::Unregister, body_entry!(Unregister)),
            (MessageKind::ErrorMessage, body_entry!(ErrorMessage)),
        ]);
        debug_assert_eq!(table.len(), MessageKind::ALL.len());
        table
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    protocol: ProtocolType,
    kind: MessageKind,
    #[serde(default)]
    body: Value,
}

// =============================================================================
// Message Codec
// =============================================================================

/// Encodes and decodes messages for one protocol
///
/// Clones share the protocol binding.
#[derive(Debug, Clone)]
pub struct MessageCodec {
    protocol: Arc<OnceLock<ProtocolType>>,
}

impl MessageCodec {
    /// Codec bound to `protocol`
    pub fn new(protocol: ProtocolType) -> Self {
        let binding = OnceLock::new();
        let _ = binding.set(protocol);
        Self {
            protocol: Arc::new(binding),
        }
    }

    /// Codec that adopts the protocol of the first decoded frame
    pub fn unbound() -> Self {
        Self {
            protocol: Arc::new(OnceLock::new()),
        }
    }

    /// Protocol this codec is bound to, if any yet
    pub fn protocol(&self) -> Option<ProtocolType> {
        self.protocol.get().copied()
    }

    /// Encode a message into a length-prefixed frame
    pub fn encode(&self, message: &Message) -> TransportResult<Bytes> {
        let protocol = self.protocol().ok_or_else(|| {
            TransportError::protocol_violation("cannot send before the protocol is known")
        })?;
        let kind = message.kind();
        if !kind.is_valid_for(protocol) {
            return Err(TransportError::InvalidForProtocol { kind, protocol });
        }

        let entry = codec_table()
            .get(&kind)
            .ok_or_else(|| TransportError::codec(format!("no codec for {}", kind)))?;
        let envelope = Envelope {
            protocol,
            kind,
            body: (entry.encode)(message)?,
        };
        let payload = serde_json::to_vec(&envelope)?;
        frame(&payload)
    }

    /// Decode the payload of one frame (without its length prefix)
    pub fn decode(&self, payload: &[u8]) -> TransportResult<Message> {
        let envelope: Envelope = serde_json::from_slice(payload)?;
        let protocol = *self.protocol.get_or_init(|| envelope.protocol);
        if envelope.protocol != protocol {
            return Err(TransportError::protocol_violation(format!(
                "frame declares {} on a {} connection",
                envelope.protocol, protocol
            )));
        }
        if !envelope.kind.is_valid_for(protocol) {
            return Err(TransportError::InvalidForProtocol {
                kind: envelope.kind,
                protocol,
            });
        }

        let entry = codec_table()
            .get(&envelope.kind)
            .ok_or_else(|| TransportError::codec(format!("no codec for {}", envelope.kind)))?;
        (entry.decode)(envelope.body)
    }
}

// =============================================================================
// Framing
// =============================================================================

/// Prefix a payload with its big-endian length
pub fn frame(payload: &[u8]) -> TransportResult<Bytes> {
    if payload.len() > FRAME_SIZE_BYTES_MAX {
        return Err(TransportError::FrameTooLarge {
            size: payload.len(),
            max: FRAME_SIZE_BYTES_MAX,
        });
    }
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE_BYTES + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Read one frame payload; `None` on a clean end of stream
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> TransportResult<Option<Vec<u8>>> {
    let mut header = [0u8; FRAME_HEADER_SIZE_BYTES];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > FRAME_SIZE_BYTES_MAX {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: FRAME_SIZE_BYTES_MAX,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one already-framed message and flush
pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &Bytes) -> TransportResult<()> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

//! JSON codec for encoding and decoding ButtonBox UDP packets.
//!
//! Wire format (one UTF-8 JSON object per datagram):
//! ```text
//! {"packetId":"<uuid>","timestamp":<i64 ms>,"type":"<KIND>","payload":<string|null>}
//! ```
//! The `type` field makes every datagram self-describing, so the decoder
//! dispatches on it without any outside context.  Auxiliary kinds carry a
//! second JSON document serialized into the `payload` string.
//!
//! Decoding never panics: malformed, truncated, or unknown datagrams yield a
//! [`DecodeError`] which the receive loop logs and discards.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::protocol::packet::{Packet, PacketBody, PacketKind};

/// Errors that can occur while decoding a datagram.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The datagram had no bytes at all.
    #[error("empty datagram")]
    Empty,

    /// The bytes are not valid UTF-8 text.
    #[error("datagram is not valid UTF-8")]
    InvalidUtf8,

    /// The text is not a JSON object with the required keys (includes truncation).
    #[error("malformed packet document: {0}")]
    MalformedDocument(String),

    /// The `type` field holds a value this build does not know.
    #[error("unknown packet type: {0:?}")]
    UnknownKind(String),

    /// The `packetId` field is not a UUID.
    #[error("invalid packet id: {0:?}")]
    InvalidPacketId(String),

    /// A kind that requires a payload arrived with `payload` absent or null.
    #[error("{0} packet is missing its payload")]
    MissingPayload(PacketKind),

    /// The nested payload document could not be parsed.
    #[error("malformed {kind} payload: {reason}")]
    MalformedPayload { kind: PacketKind, reason: String },
}

/// Errors that can occur while encoding a packet.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialize {kind} packet: {source}")]
    Serialize {
        kind: PacketKind,
        #[source]
        source: serde_json::Error,
    },
}

// ── Wire envelope ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OutgoingEnvelope<'a> {
    packet_id: String,
    timestamp: i64,
    #[serde(rename = "type")]
    kind: PacketKind,
    payload: Option<&'a str>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingEnvelope {
    packet_id: String,
    #[serde(default)]
    timestamp: i64,
    // Kept as a plain string so an unknown kind is reported as such rather
    // than as a generic document error.
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Option<String>,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes a [`Packet`] into the bytes of one datagram.
///
/// # Errors
///
/// Returns [`EncodeError`] if serialization fails.
///
/// # Examples
///
/// ```rust
/// use buttonbox_core::{decode_packet, encode_packet, Packet};
///
/// let ping = Packet::ping();
/// let bytes = encode_packet(&ping).unwrap();
/// assert_eq!(decode_packet(&bytes).unwrap(), ping);
/// ```
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, EncodeError> {
    let kind = packet.kind();
    let nested = match &packet.body {
        PacketBody::TriggerImport(p) => Some(nested_json(kind, p)?),
        PacketBody::CaptureMousePosition(p) => Some(nested_json(kind, p)?),
        PacketBody::AutoDragLoop(p) => Some(nested_json(kind, p)?),
        _ => None,
    };
    let payload = match &packet.body {
        PacketBody::Command { payload } => Some(payload.as_str()),
        _ => nested.as_deref(),
    };

    let envelope = OutgoingEnvelope {
        packet_id: packet.id.to_string(),
        timestamp: packet.sent_at_millis,
        kind,
        payload,
    };
    serde_json::to_vec(&envelope).map_err(|source| EncodeError::Serialize { kind, source })
}

/// Decodes one datagram into a [`Packet`].
///
/// # Errors
///
/// Returns [`DecodeError`] if the bytes are empty, not UTF-8, not a valid
/// envelope, name an unknown kind, or lack a required payload.
///
/// # Examples
///
/// ```rust
/// use buttonbox_core::{decode_packet, DecodeError};
///
/// let truncated = br#"{"packetId":"6f1c"#;
/// assert!(matches!(decode_packet(truncated), Err(DecodeError::MalformedDocument(_))));
/// ```
pub fn decode_packet(bytes: &[u8]) -> Result<Packet, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8)?;

    let envelope: IncomingEnvelope =
        serde_json::from_str(text).map_err(|e| DecodeError::MalformedDocument(e.to_string()))?;

    let kind: PacketKind = envelope
        .kind
        .parse()
        .map_err(|_| DecodeError::UnknownKind(envelope.kind.clone()))?;

    let id = Uuid::parse_str(&envelope.packet_id)
        .map_err(|_| DecodeError::InvalidPacketId(envelope.packet_id.clone()))?;

    tracing::trace!(%kind, %id, len = bytes.len(), "decoding packet");

    let body = match kind {
        PacketKind::HealthCheckPing => PacketBody::Ping,
        PacketKind::HealthCheckPong => PacketBody::Pong,
        PacketKind::MacroAck => PacketBody::CommandAck,
        PacketKind::MacroCommand => PacketBody::Command {
            payload: require_payload(kind, envelope.payload)?,
        },
        PacketKind::TriggerImportBrowser => {
            PacketBody::TriggerImport(parse_nested(kind, envelope.payload)?)
        }
        PacketKind::CaptureMousePosition => {
            PacketBody::CaptureMousePosition(parse_nested(kind, envelope.payload)?)
        }
        PacketKind::AutoDragLoopCommand => {
            PacketBody::AutoDragLoop(parse_nested(kind, envelope.payload)?)
        }
    };

    Ok(Packet {
        id,
        sent_at_millis: envelope.timestamp,
        body,
    })
}

// ── Internal helpers ──────────────────────────────────────────────────────────

fn nested_json<T: Serialize>(kind: PacketKind, value: &T) -> Result<String, EncodeError> {
    serde_json::to_string(value).map_err(|source| EncodeError::Serialize { kind, source })
}

fn require_payload(kind: PacketKind, payload: Option<String>) -> Result<String, DecodeError> {
    payload.ok_or(DecodeError::MissingPayload(kind))
}

fn parse_nested<T: DeserializeOwned>(
    kind: PacketKind,
    payload: Option<String>,
) -> Result<T, DecodeError> {
    let raw = require_payload(kind, payload)?;
    serde_json::from_str(&raw).map_err(|e| DecodeError::MalformedPayload {
        kind,
        reason: e.to_string(),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

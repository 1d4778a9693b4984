//! All ButtonBox UDP packet types.
//!
//! Every datagram carries one JSON envelope with four keys:
//!
//! ```text
//! { "packetId": "<uuid>", "timestamp": <unix ms>, "type": "<KIND>", "payload": <string|null> }
//! ```
//!
//! Responses (`HEALTH_CHECK_PONG`, `MACRO_ACK`) echo the `packetId` of the
//! request they answer, which is how the client matches them to the
//! outstanding ping or command.

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Protocol constants ────────────────────────────────────────────────────────

/// Size of the buffer receivers should allocate for one datagram.
///
/// Current packets are a few hundred bytes; the headroom tolerates payload
/// growth without truncation.
pub const RECEIVE_BUFFER_SIZE: usize = 2048;

// ── Packet kinds ──────────────────────────────────────────────────────────────

/// The `type` discriminator carried in every envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PacketKind {
    /// Client → companion liveness probe.
    HealthCheckPing,
    /// Companion → client reply to a ping.
    HealthCheckPong,
    /// Client → companion "fire this action".
    MacroCommand,
    /// Companion → client acknowledgement of a command.
    MacroAck,
    /// Client → companion: open the import page in the PC browser.
    TriggerImportBrowser,
    /// Client → companion: record the current mouse position.
    CaptureMousePosition,
    /// Client → companion: start or stop the auto drag-and-drop loop.
    AutoDragLoopCommand,
}

impl PacketKind {
    /// Every kind, in wire-table order.
    pub const ALL: [PacketKind; 7] = [
        PacketKind::HealthCheckPing,
        PacketKind::HealthCheckPong,
        PacketKind::MacroCommand,
        PacketKind::MacroAck,
        PacketKind::TriggerImportBrowser,
        PacketKind::CaptureMousePosition,
        PacketKind::AutoDragLoopCommand,
    ];

    /// Returns the exact string used in the `type` field on the wire.
    pub fn as_wire_str(self) -> &'static str {
        match self {
            PacketKind::HealthCheckPing => "HEALTH_CHECK_PING",
            PacketKind::HealthCheckPong => "HEALTH_CHECK_PONG",
            PacketKind::MacroCommand => "MACRO_COMMAND",
            PacketKind::MacroAck => "MACRO_ACK",
            PacketKind::TriggerImportBrowser => "TRIGGER_IMPORT_BROWSER",
            PacketKind::CaptureMousePosition => "CAPTURE_MOUSE_POSITION",
            PacketKind::AutoDragLoopCommand => "AUTO_DRAG_LOOP_COMMAND",
        }
    }
}

impl fmt::Display for PacketKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire_str())
    }
}

impl FromStr for PacketKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PacketKind::ALL
            .into_iter()
            .find(|kind| kind.as_wire_str() == s)
            .ok_or(())
    }
}

// ── Auxiliary payloads ────────────────────────────────────────────────────────
//
// These kinds carry a nested JSON document inside the `payload` string.

/// Payload of `TRIGGER_IMPORT_BROWSER`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerImportPayload {
    /// URL the companion should open in its default browser.
    pub url: String,
}

/// Which end of a drag gesture a captured mouse position belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CapturePurpose {
    #[serde(rename = "SRC")]
    Source,
    #[serde(rename = "DES")]
    Destination,
}

/// Payload of `CAPTURE_MOUSE_POSITION`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureMousePayload {
    pub purpose: CapturePurpose,
}

/// Start/stop switch for the companion's drag loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LoopAction {
    Start,
    Stop,
}

/// Payload of `AUTO_DRAG_LOOP_COMMAND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoDragLoopPayload {
    pub action: LoopAction,
}

// ── Typed packet ──────────────────────────────────────────────────────────────

/// Kind-specific content of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacketBody {
    Ping,
    Pong,
    /// Opaque serialized action, forwarded verbatim to the companion.
    Command { payload: String },
    CommandAck,
    TriggerImport(TriggerImportPayload),
    CaptureMousePosition(CaptureMousePayload),
    AutoDragLoop(AutoDragLoopPayload),
}

impl PacketBody {
    /// Returns the [`PacketKind`] discriminant for this body.
    pub fn kind(&self) -> PacketKind {
        match self {
            PacketBody::Ping => PacketKind::HealthCheckPing,
            PacketBody::Pong => PacketKind::HealthCheckPong,
            PacketBody::Command { .. } => PacketKind::MacroCommand,
            PacketBody::CommandAck => PacketKind::MacroAck,
            PacketBody::TriggerImport(_) => PacketKind::TriggerImportBrowser,
            PacketBody::CaptureMousePosition(_) => PacketKind::CaptureMousePosition,
            PacketBody::AutoDragLoop(_) => PacketKind::AutoDragLoopCommand,
        }
    }
}

/// One packet, created fresh per send and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Unique identifier; replies reuse the id of the request.
    pub id: Uuid,
    /// Wall-clock creation time in milliseconds since the Unix epoch.
    pub sent_at_millis: i64,
    pub body: PacketBody,
}

impl Packet {
    /// Creates a packet with a fresh random id stamped with the current time.
    pub fn new(body: PacketBody) -> Self {
        Self {
            id: Uuid::new_v4(),
            sent_at_millis: current_timestamp_millis(),
            body,
        }
    }

    /// Creates a reply that reuses `request_id`.
    pub fn reply_to(request_id: Uuid, body: PacketBody) -> Self {
        Self {
            id: request_id,
            sent_at_millis: current_timestamp_millis(),
            body,
        }
    }

    pub fn ping() -> Self {
        Self::new(PacketBody::Ping)
    }

    pub fn command(payload: impl Into<String>) -> Self {
        Self::new(PacketBody::Command {
            payload: payload.into(),
        })
    }

    pub fn kind(&self) -> PacketKind {
        self.body.kind()
    }
}

/// Milliseconds since the Unix epoch, or 0 if the clock is before 1970.
pub fn current_timestamp_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names_match_serde_names() {
        for kind in PacketKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_wire_str()));
        }
    }

    #[test]
    fn test_from_str_accepts_every_wire_name() {
        for kind in PacketKind::ALL {
            assert_eq!(kind.as_wire_str().parse::<PacketKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_from_str_rejects_lowercase_name() {
        assert!("health_check_ping".parse::<PacketKind>().is_err());
    }

    #[test]
    fn test_reply_reuses_request_id() {
        // Arrange
        let ping = Packet::ping();

        // Act
        let pong = Packet::reply_to(ping.id, PacketBody::Pong);

        // Assert
        assert_eq!(pong.id, ping.id);
        assert_eq!(pong.kind(), PacketKind::HealthCheckPong);
    }

    #[test]
    fn test_new_packets_get_distinct_ids() {
        assert_ne!(Packet::ping().id, Packet::ping().id);
    }

    #[test]
    fn test_capture_purpose_uses_short_wire_codes() {
        let json = serde_json::to_string(&CaptureMousePayload {
            purpose: CapturePurpose::Destination,
        })
        .unwrap();
        assert_eq!(json, r#"{"purpose":"DES"}"#);
    }

    #[test]
    fn test_loop_action_is_uppercase_on_the_wire() {
        let json = serde_json::to_string(&AutoDragLoopPayload {
            action: LoopAction::Start,
        })
        .unwrap();
        assert_eq!(json, r#"{"action":"START"}"#);
    }

    #[test]
    fn test_current_timestamp_millis_is_positive() {
        assert!(current_timestamp_millis() > 0);
    }
}

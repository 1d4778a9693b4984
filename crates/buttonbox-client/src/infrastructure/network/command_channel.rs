//! CommandChannel: sends commands over the heartbeat engine's socket.
//!
//! The channel never owns a socket.  Each send borrows the engine's current
//! live link; without one it fails immediately with
//! [`SendError::NotConnected`] and leaves the connection state alone.
//!
//! Delivery is fire-and-forget unless the engine runs with
//! `CommandAckPolicy::AwaitAck`, in which case the monitor tracks each
//! `MACRO_COMMAND` until its `MACRO_ACK` arrives.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use buttonbox_core::protocol::packet::{
    AutoDragLoopPayload, CaptureMousePayload, CapturePurpose, LoopAction, TriggerImportPayload,
};
use buttonbox_core::{encode_packet, ConnectionState, Packet, PacketBody};
use tracing::{debug, warn};
use uuid::Uuid;

use super::heartbeat_engine::EngineInner;
use crate::application::send_macro::{CommandTransport, SendError};

/// Sends `MACRO_COMMAND` and auxiliary packets to the companion.
#[derive(Clone)]
pub struct CommandChannel {
    inner: Arc<EngineInner>,
}

impl CommandChannel {
    pub(crate) fn new(inner: Arc<EngineInner>) -> Self {
        Self { inner }
    }

    /// Sends one command payload and returns the packet id.
    ///
    /// # Errors
    ///
    /// - [`SendError::NotConnected`] if there is no live socket.
    /// - [`SendError::EmptyPayload`] if `payload` is blank.
    /// - [`SendError::Io`] if the operating system rejected the datagram.
    pub async fn send(&self, payload: &str) -> Result<Uuid, SendError> {
        let link = self.inner.live_link().ok_or(SendError::NotConnected)?;
        if payload.trim().is_empty() {
            return Err(SendError::EmptyPayload);
        }

        let packet = Packet::command(payload);
        let bytes = encode_packet(&packet)?;
        // Record before sending so an ack racing the send still matches.
        let tracked = self
            .inner
            .with_monitor(|m| m.command_sent(packet.id, bytes.clone(), Instant::now()));

        if let Err(e) = link.socket.send_to(&bytes, link.target).await {
            if tracked {
                self.inner.with_monitor(|m| m.command_send_failed(&packet.id));
            }
            warn!(id = %packet.id, error = %e, "command send failed");
            return Err(SendError::Io(e));
        }
        debug!(id = %packet.id, tracked, len = bytes.len(), "command sent");
        Ok(packet.id)
    }

    /// Asks the companion to open `url` in its browser.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send), minus `EmptyPayload`.
    pub async fn send_trigger_import(&self, url: &str) -> Result<Uuid, SendError> {
        let body = PacketBody::TriggerImport(TriggerImportPayload {
            url: url.to_string(),
        });
        self.send_auxiliary(body, false).await
    }

    /// Asks the companion to record the current mouse position.
    ///
    /// Refused with `NotConnected` while the state is `NoConfig` or
    /// `ConnectionLost`.
    pub async fn send_capture_mouse_position(
        &self,
        purpose: CapturePurpose,
    ) -> Result<Uuid, SendError> {
        let body = PacketBody::CaptureMousePosition(CaptureMousePayload { purpose });
        self.send_auxiliary(body, true).await
    }

    /// Starts or stops the companion's drag loop.
    ///
    /// Refused with `NotConnected` while the state is `NoConfig` or
    /// `ConnectionLost`.
    pub async fn send_auto_drag_loop(&self, action: LoopAction) -> Result<Uuid, SendError> {
        let body = PacketBody::AutoDragLoop(AutoDragLoopPayload { action });
        self.send_auxiliary(body, true).await
    }

    async fn send_auxiliary(&self, body: PacketBody, needs_reachable: bool) -> Result<Uuid, SendError> {
        let state = self.inner.state();
        if needs_reachable && (!state.is_configured() || state == ConnectionState::ConnectionLost) {
            return Err(SendError::NotConnected);
        }
        let link = self.inner.live_link().ok_or(SendError::NotConnected)?;

        let packet = Packet::new(body);
        let bytes = encode_packet(&packet)?;
        link.socket.send_to(&bytes, link.target).await?;
        debug!(id = %packet.id, kind = %packet.kind(), "auxiliary packet sent");
        Ok(packet.id)
    }
}

#[async_trait]
impl CommandTransport for CommandChannel {
    async fn send_command(&self, payload: &str) -> Result<Uuid, SendError> {
        self.send(payload).await
    }
}

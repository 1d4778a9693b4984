//! SendMacroUseCase: turns a macro button press into a command packet.
//!
//! The UI knows macros only by identifier.  This use case asks the
//! [`ActionResolver`] for the serialized action behind that identifier and
//! hands it to a [`CommandTransport`].  Both collaborators are traits so the
//! use case can be tested without a socket or a macro store.

use std::sync::Arc;

use async_trait::async_trait;
use buttonbox_core::EncodeError;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// Why a command could not be handed to the network.
#[derive(Debug, Error)]
pub enum SendError {
    /// There is no live socket or no valid endpoint.  Reconfigure and retry.
    #[error("not connected: configure a companion endpoint first")]
    NotConnected,

    #[error("command payload is empty")]
    EmptyPayload,

    #[error("failed to encode command: {0}")]
    Encode(#[from] EncodeError),

    /// The operating system rejected the datagram.
    #[error("failed to send command: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by [`SendMacroUseCase::send_macro`].
#[derive(Debug, Error)]
pub enum MacroError {
    #[error("no action is mapped to macro {0:?}")]
    UnknownMacro(String),

    #[error(transparent)]
    Send(#[from] SendError),
}

/// Looks up the serialized action for a macro identifier.
#[cfg_attr(test, mockall::automock)]
pub trait ActionResolver: Send + Sync {
    /// Returns the action payload, or `None` if the macro is unmapped.
    fn resolve(&self, macro_id: &str) -> Option<String>;
}

/// Port through which UI-facing code sends commands to the companion.
///
/// The infrastructure implementation is the UDP command channel; tests use a
/// recording double.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Sends one command and returns the id of the transmitted packet.
    async fn send_command(&self, payload: &str) -> Result<Uuid, SendError>;
}

/// Resolves a macro and sends its action.
pub struct SendMacroUseCase<R: ActionResolver, T: CommandTransport> {
    resolver: Arc<R>,
    transport: Arc<T>,
}

impl<R: ActionResolver, T: CommandTransport> SendMacroUseCase<R, T> {
    pub fn new(resolver: Arc<R>, transport: Arc<T>) -> Self {
        Self {
            resolver,
            transport,
        }
    }

    /// Fires the macro identified by `macro_id`.
    ///
    /// # Errors
    ///
    /// - [`MacroError::UnknownMacro`] if nothing is mapped; nothing is sent.
    /// - [`MacroError::Send`] if the transport refused the command.
    pub async fn send_macro(&self, macro_id: &str) -> Result<Uuid, MacroError> {
        let Some(action) = self.resolver.resolve(macro_id) else {
            warn!(macro_id, "macro has no mapped action");
            return Err(MacroError::UnknownMacro(macro_id.to_string()));
        };
        let id = self.transport.send_command(&action).await?;
        debug!(macro_id, %id, "macro command sent");
        Ok(id)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

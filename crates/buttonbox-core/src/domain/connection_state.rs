//! The five-state link health enum shown to the user.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Health of the link to the companion process.
///
/// `NoConfig` holds if and only if no valid endpoint is configured; every
/// other state implies one.  The heartbeat engine is the only writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No endpoint, or an incomplete one.
    #[default]
    NoConfig,
    /// A session exists but liveness is not yet (or no longer) proven.
    Connecting,
    /// Enough consecutive pongs have arrived.
    Connected,
    /// At least one command is awaiting its acknowledgement.
    SendingPendingAck,
    /// Too many consecutive checks failed, or the socket could not be created.
    ConnectionLost,
}

impl ConnectionState {
    /// Returns `true` for every state except [`ConnectionState::NoConfig`].
    pub fn is_configured(self) -> bool {
        self != ConnectionState::NoConfig
    }

    /// Returns `true` if commands are likely to reach the companion.
    pub fn is_usable(self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::SendingPendingAck
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectionState::NoConfig => "no config",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::SendingPendingAck => "sending (awaiting ack)",
            ConnectionState::ConnectionLost => "connection lost",
        };
        f.write_str(label)
    }
}

//! Network infrastructure for the client application.
//!
//! Architecture:
//! - [`HeartbeatEngine`] owns the UDP socket for the configured endpoint, a
//!   background receive loop, and two timers (ping send, timeout sweep).
//! - [`CommandChannel`] borrows the engine's live socket to send commands.
//! - All heartbeat state lives in one `HeartbeatMonitor` behind one lock;
//!   every task goes through that lock before touching it.

pub mod command_channel;
pub mod heartbeat_engine;

use buttonbox_core::Endpoint;
use thiserror::Error;

pub use command_channel::CommandChannel;
pub use heartbeat_engine::{EngineSnapshot, HeartbeatEngine};

/// Errors that end a heartbeat session before it starts.
///
/// Every one of these leaves the engine in `ConnectionLost`; the session is
/// retried on the next endpoint change or an explicit reconnect.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Host name resolution failed.
    #[error("failed to resolve {endpoint}: {source}")]
    Resolve {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },

    /// Resolution succeeded but produced no address.
    #[error("{0} did not resolve to any address")]
    NoAddress(Endpoint),

    /// The local UDP socket could not be created.
    #[error("failed to bind UDP socket for {endpoint}: {source}")]
    Bind {
        endpoint: Endpoint,
        #[source]
        source: std::io::Error,
    },
}

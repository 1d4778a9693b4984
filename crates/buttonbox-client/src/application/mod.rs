//! Application layer: connection-health rules and use cases.
//!
//! Nothing here touches a socket.  The infrastructure layer drives these
//! types from its tasks and supplies the trait implementations.

pub mod heartbeat_monitor;
pub mod latency;
pub mod pending;
pub mod send_macro;
pub mod state_publisher;

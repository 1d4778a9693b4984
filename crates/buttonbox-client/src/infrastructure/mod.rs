//! Infrastructure layer for the client application.
//!
//! Contains the adapters that touch the outside world:
//! - `network`:         the UDP heartbeat engine and command channel.
//! - `endpoint_source`: the observable companion address.
//! - `storage`:         TOML configuration file persistence.

pub mod endpoint_source;
pub mod network;
pub mod storage;

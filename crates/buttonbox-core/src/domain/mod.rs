//! Domain value types shared by every ButtonBox crate.

pub mod connection_state;
pub mod endpoint;

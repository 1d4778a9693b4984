//! # buttonbox-core
//!
//! Shared library for ButtonBox containing the UDP packet codec and the
//! domain types every other crate talks about: the remote [`Endpoint`] and
//! the [`ConnectionState`] shown to the user.
//!
//! It has zero dependencies on sockets, async runtimes, or UI frameworks.
//!
//! # Architecture overview (for beginners)
//!
//! ButtonBox is a remote macro trigger: a touch UI sends discrete "fire this
//! action" packets to a companion process on a PC somewhere on the LAN, and
//! keeps a heartbeat running so it can tell the user whether that companion
//! is reachable.
//!
//! - **`protocol`** – How packets travel over the network.  Every UDP
//!   datagram carries one small JSON document (`packetId`, `timestamp`,
//!   `type`, `payload`) that is decoded into a typed [`Packet`].
//!
//! - **`domain`** – Pure value types with no I/O: the configured endpoint
//!   and the five-state connection health enum.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `buttonbox_core::Packet` instead of `buttonbox_core::protocol::packet::Packet`.
pub use domain::connection_state::ConnectionState;
pub use domain::endpoint::Endpoint;
pub use protocol::codec::{decode_packet, encode_packet, DecodeError, EncodeError};
pub use protocol::packet::{Packet, PacketBody, PacketKind};

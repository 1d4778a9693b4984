//! Protocol module containing packet types and the JSON codec.

pub mod codec;
pub mod packet;

pub use codec::{decode_packet, encode_packet, DecodeError, EncodeError};
pub use packet::*;

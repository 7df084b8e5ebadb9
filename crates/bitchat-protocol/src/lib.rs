//! Wire protocol for bitchat.
//!
//! This crate defines what peers say to each other:
//!
//! - **Packets** ([`Packet`], [`PacketType`], [`NodeId`]) — the fixed
//!   binary frame written to the chat characteristic.
//! - **Messages** ([`Message`]) — the chat message carried inside
//!   `Message` packets.
//! - **Codecs** ([`PayloadCodec`], [`DelimitedCodec`], [`JsonCodec`]) — how
//!   a message is laid out inside a packet payload.
//! - **Errors** ([`ProtocolError`]) — what can go wrong while encoding or
//!   decoding.
//!
//! # Architecture
//!
//! The protocol layer sits between the radio (raw notification bytes) and
//! the peer layer (who is connected). It knows nothing about links or
//! retries; it only turns values into bytes and back.
//!
//! ```text
//! Radio (bytes) → Protocol (Packet → Message) → Peer layer (who sent it)
//! ```

mod codec;
mod error;
mod message;
mod packet;
mod types;

pub use codec::{DelimitedCodec, PayloadCodec};
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use message::Message;
pub use packet::{
    DEFAULT_TTL, HEADER_LEN, MAX_PAYLOAD_LEN, MIN_PACKET_LEN, PROTOCOL_VERSION,
    Packet, SIGNATURE_LEN, flags,
};
pub use types::{NODE_ID_LEN, NodeId, PacketType, now_millis};

//! The binary frame that travels over the radio.
//!
//! ## Layout (big-endian)
//!
//! ```text
//! version(1) type(1) ttl(1) timestamp(8) flags(1) payload_len(2) sender_id(8)
//! [recipient_id(8)] payload(payload_len) [signature(64)]
//! ```
//!
//! The optional fields are not length-prefixed; their presence is carried
//! entirely by the flags byte (bit0 = recipient, bit1 = signature). Flags
//! are therefore *derived* from the [`Packet`] fields when encoding and are
//! not stored on the struct, so they can never disagree with the fields.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::types::{NODE_ID_LEN, NodeId, PacketType, now_millis};
use crate::ProtocolError;

/// The only protocol revision this crate speaks.
pub const PROTOCOL_VERSION: u8 = 1;

/// Hop budget stamped on locally originated packets.
pub const DEFAULT_TTL: u8 = 7;

/// Length of a signature block.
pub const SIGNATURE_LEN: usize = 64;

/// Largest payload the 16-bit length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Bytes before the sender id: version, type, ttl, timestamp, flags, length.
pub const HEADER_LEN: usize = 1 + 1 + 1 + 8 + 1 + 2;

/// Smallest decodable frame: the header plus the sender id.
pub const MIN_PACKET_LEN: usize = HEADER_LEN + NODE_ID_LEN;

/// Flag bits.
pub mod flags {
    /// A recipient id follows the sender id.
    pub const HAS_RECIPIENT: u8 = 0x01;
    /// A 64-byte signature follows the payload.
    pub const HAS_SIGNATURE: u8 = 0x02;
}

/// A decoded (or about to be encoded) frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub version: u8,
    pub packet_type: PacketType,
    /// Hop budget. Carried but not enforced: delivery is single-hop.
    pub ttl: u8,
    /// Milliseconds since the Unix epoch, as set by the sender.
    pub timestamp: u64,
    pub sender_id: NodeId,
    /// `None` means broadcast.
    pub recipient_id: Option<NodeId>,
    pub payload: Vec<u8>,
    pub signature: Option<[u8; SIGNATURE_LEN]>,
}

impl Packet {
    /// Creates a broadcast packet stamped with the current time.
    pub fn broadcast(
        packet_type: PacketType,
        sender_id: NodeId,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            packet_type,
            ttl: DEFAULT_TTL,
            timestamp: now_millis(),
            sender_id,
            recipient_id: None,
            payload,
            signature: None,
        }
    }

    /// Creates a packet addressed to a single node.
    pub fn to(
        packet_type: PacketType,
        sender_id: NodeId,
        recipient_id: NodeId,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            recipient_id: Some(recipient_id),
            ..Self::broadcast(packet_type, sender_id, payload)
        }
    }

    /// The flags byte implied by the optional fields.
    pub fn flags(&self) -> u8 {
        let mut bits = 0;
        if self.recipient_id.is_some() {
            bits |= flags::HAS_RECIPIENT;
        }
        if self.signature.is_some() {
            bits |= flags::HAS_SIGNATURE;
        }
        bits
    }

    /// Returns `true` if the packet is meant for every peer: either no
    /// recipient, or the explicit all-ones sentinel.
    pub fn is_broadcast(&self) -> bool {
        self.recipient_id.is_none_or(|id| id.is_broadcast())
    }

    /// Exact length of the encoded frame.
    pub fn encoded_len(&self) -> usize {
        MIN_PACKET_LEN
            + self.recipient_id.map_or(0, |_| NODE_ID_LEN)
            + self.payload.len()
            + self.signature.map_or(0, |_| SIGNATURE_LEN)
    }

    /// Serializes the packet into a frame.
    ///
    /// # Errors
    /// Returns [`ProtocolError::PayloadTooLarge`] if the payload does not
    /// fit the 16-bit length field. Nothing is written in that case.
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let payload_len = u16::try_from(self.payload.len())
            .map_err(|_| ProtocolError::PayloadTooLarge(self.payload.len()))?;

        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(self.version);
        buf.put_u8(self.packet_type.as_u8());
        buf.put_u8(self.ttl);
        buf.put_u64(self.timestamp);
        buf.put_u8(self.flags());
        buf.put_u16(payload_len);
        buf.put_slice(self.sender_id.as_bytes());
        if let Some(recipient) = &self.recipient_id {
            buf.put_slice(recipient.as_bytes());
        }
        buf.put_slice(&self.payload);
        if let Some(signature) = &self.signature {
            buf.put_slice(signature);
        }
        Ok(buf.freeze())
    }

    /// Parses a frame.
    ///
    /// The fixed header is checked first, then the version, then the type,
    /// so a short frame always reports [`ProtocolError::Truncated`] and a
    /// foreign revision never yields a half-populated packet. Bytes after
    /// the last expected field are ignored.
    pub fn decode(data: &[u8]) -> Result<Packet, ProtocolError> {
        let total = data.len();
        if total < MIN_PACKET_LEN {
            return Err(ProtocolError::Truncated {
                needed: MIN_PACKET_LEN,
                available: total,
            });
        }

        let mut buf = data;
        let version = buf.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                found: version,
            });
        }
        let packet_type = PacketType::try_from(buf.get_u8())?;
        let ttl = buf.get_u8();
        let timestamp = buf.get_u64();
        let flag_bits = buf.get_u8();
        let payload_len = usize::from(buf.get_u16());
        let sender_id = take_node_id(&mut buf);

        let mut needed = MIN_PACKET_LEN;

        let recipient_id = if flag_bits & flags::HAS_RECIPIENT != 0 {
            needed += NODE_ID_LEN;
            ensure(needed, total)?;
            Some(take_node_id(&mut buf))
        } else {
            None
        };

        needed += payload_len;
        ensure(needed, total)?;
        let payload = buf[..payload_len].to_vec();
        buf.advance(payload_len);

        let signature = if flag_bits & flags::HAS_SIGNATURE != 0 {
            needed += SIGNATURE_LEN;
            ensure(needed, total)?;
            let mut sig = [0u8; SIGNATURE_LEN];
            buf.copy_to_slice(&mut sig);
            Some(sig)
        } else {
            None
        };

        Ok(Packet {
            version,
            packet_type,
            ttl,
            timestamp,
            sender_id,
            recipient_id,
            payload,
            signature,
        })
    }
}

fn ensure(needed: usize, available: usize) -> Result<(), ProtocolError> {
    if available < needed {
        return Err(ProtocolError::Truncated { needed, available });
    }
    Ok(())
}

fn take_node_id(buf: &mut &[u8]) -> NodeId {
    let mut id = [0u8; NODE_ID_LEN];
    buf.copy_to_slice(&mut id);
    NodeId(id)
}

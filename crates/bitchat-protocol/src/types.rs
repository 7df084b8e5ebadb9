//! Core protocol types shared by the packet and message codecs.

use serde::{Deserialize, Serialize};

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::ProtocolError;

/// Length in bytes of a [`NodeId`] on the wire.
pub const NODE_ID_LEN: usize = 8;

// ---------------------------------------------------------------------------
// NodeId
// ---------------------------------------------------------------------------

/// The 8-byte identity a node stamps on every packet it sends.
///
/// This is distinct from a peer's radio address (`PeerId` in the transport
/// crate): the address says *where* a peer is, the node id says *who* sent
/// a packet. A node picks a random id at startup.
///
/// Displayed as 16 lowercase hex digits.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct NodeId(pub [u8; NODE_ID_LEN]);

impl NodeId {
    /// The all-ones recipient sentinel meaning "every peer".
    ///
    /// Encoders in this crate express broadcast by *omitting* the
    /// recipient; the sentinel is only recognised when decoding frames
    /// from implementations that send it explicitly.
    pub const BROADCAST: NodeId = NodeId([0xFF; NODE_ID_LEN]);

    /// Generates a random node id.
    pub fn random() -> Self {
        let bytes: [u8; NODE_ID_LEN] = rand::random();
        Self(bytes)
    }

    /// Returns the raw bytes.
    pub fn as_bytes(&self) -> &[u8; NODE_ID_LEN] {
        &self.0
    }

    /// Returns `true` for the all-ones broadcast sentinel.
    pub fn is_broadcast(&self) -> bool {
        *self == Self::BROADCAST
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; NODE_ID_LEN]> for NodeId {
    fn from(bytes: [u8; NODE_ID_LEN]) -> Self {
        Self(bytes)
    }
}

// ---------------------------------------------------------------------------
// PacketType
// ---------------------------------------------------------------------------

/// What a packet carries. The discriminant is the wire value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketType {
    /// Presence announcement; the payload is the sender's nickname.
    Announce = 0x01,
    /// Key material. Carried on the wire but not acted upon.
    KeyExchange = 0x02,
    /// The sender is going away.
    Leave = 0x03,
    /// A chat message; the payload is an encoded [`Message`](crate::Message).
    Message = 0x04,
}

impl PacketType {
    /// Returns the wire value.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::Announce),
            0x02 => Ok(Self::KeyExchange),
            0x03 => Ok(Self::Leave),
            0x04 => Ok(Self::Message),
            other => Err(ProtocolError::UnknownType(other)),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Announce => write!(f, "Announce"),
            Self::KeyExchange => write!(f, "KeyExchange"),
            Self::Leave => write!(f, "Leave"),
            Self::Message => write!(f, "Message"),
        }
    }
}

/// Milliseconds since the Unix epoch, or 0 if the clock is before it.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display_is_lowercase_hex() {
        let id = NodeId([0x00, 0x01, 0xab, 0xcd, 0xef, 0x10, 0x20, 0xff]);
        assert_eq!(id.to_string(), "0001abcdef1020ff");
    }

    #[test]
    fn test_node_id_broadcast_sentinel() {
        assert!(NodeId::BROADCAST.is_broadcast());
        assert!(!NodeId::default().is_broadcast());
        assert_eq!(NodeId::BROADCAST.as_bytes(), &[0xFF; 8]);
    }

    #[test]
    fn test_node_id_random_differs() {
        // 64 random bits; a collision here means the generator is broken.
        assert_ne!(NodeId::random(), NodeId::random());
    }

    #[test]
    fn test_node_id_serializes_as_byte_array() {
        let json = serde_json::to_string(&NodeId([1, 2, 3, 4, 5, 6, 7, 8])).unwrap();
        assert_eq!(json, "[1,2,3,4,5,6,7,8]");
    }

    #[test]
    fn test_packet_type_try_from_known_values() {
        assert_eq!(PacketType::try_from(1), Ok(PacketType::Announce));
        assert_eq!(PacketType::try_from(2), Ok(PacketType::KeyExchange));
        assert_eq!(PacketType::try_from(3), Ok(PacketType::Leave));
        assert_eq!(PacketType::try_from(4), Ok(PacketType::Message));
    }

    #[test]
    fn test_packet_type_try_from_unknown_value_fails() {
        assert_eq!(
            PacketType::try_from(0),
            Err(ProtocolError::UnknownType(0))
        );
        assert_eq!(
            PacketType::try_from(0x11),
            Err(ProtocolError::UnknownType(0x11))
        );
    }

    #[test]
    fn test_packet_type_as_u8_matches_wire_value() {
        assert_eq!(PacketType::Message.as_u8(), 4);
        assert_eq!(PacketType::Leave.to_string(), "Leave");
    }
}

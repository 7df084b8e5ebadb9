//! Error types for the protocol layer.
//!
//! Each crate in bitchat defines its own error enum. A `ProtocolError`
//! always means "these bytes (or this value) don't fit the wire format";
//! it never means a radio or peer problem.

/// Errors that can occur while encoding or decoding packets and messages.
///
/// Every variant is cheap to clone and compare, which keeps the decode
/// path's tests simple and lets callers forward the error as a system
/// event without fighting ownership.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Fewer bytes were available than the frame requires.
    ///
    /// `needed` is the total length the decoder expected at the point it
    /// gave up, `available` is the length of the input.
    #[error("truncated packet: needed {needed} bytes, got {available}")]
    Truncated { needed: usize, available: usize },

    /// The packet was produced by an incompatible protocol revision.
    #[error("unsupported protocol version {found} (expected {expected})")]
    VersionMismatch { expected: u8, found: u8 },

    /// The type byte does not map to a known [`PacketType`](crate::PacketType).
    #[error("unknown packet type {0:#04x}")]
    UnknownType(u8),

    /// The payload does not fit the 16-bit length field.
    #[error("payload of {0} bytes exceeds the 65535-byte limit")]
    PayloadTooLarge(usize),

    /// A message payload could not be parsed.
    ///
    /// Covers invalid UTF-8, segments without a key, a missing content
    /// field, and non-numeric timestamps.
    #[error("malformed message payload: {0}")]
    MalformedPayload(String),

    /// A message field cannot be represented by the chosen codec.
    #[error("message cannot be encoded: {0}")]
    Unencodable(String),
}

//! Unified error type for the bitchat facade.

use bitchat_peer::PeerError;
use bitchat_protocol::ProtocolError;
use bitchat_transport::TransportError;

/// Top-level error that wraps every layer's error.
///
/// `#[from]` on each variant lets `?` convert sub-crate errors, so code
/// using the `bitchat` crate only ever matches on this type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BitchatError {
    /// Radio failure (discovery, connect, write, timeout).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Wire-format failure (encode, decode, oversize payload).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Peer-layer failure (validation, duplicate connection, shutdown).
    #[error(transparent)]
    Peer(#[from] PeerError),
}

//! Error types for the peer layer.

use bitchat_protocol::ProtocolError;
use bitchat_transport::{PeerId, TransportError};

/// Errors that can occur while managing peer connections or dispatching
/// packets to them.
///
/// Transport and protocol failures are wrapped unchanged so callers can
/// still tell a timeout from a malformed frame.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PeerError {
    /// The radio reported a failure (or an operation timed out).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A packet or message could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The peer connected but does not expose the chat characteristic.
    /// Such peers are never retried.
    #[error("peer {0} does not expose the chat characteristic")]
    MissingCapability(PeerId),

    /// A connection to this peer is already in flight or established.
    #[error("peer {0} already has an active connection")]
    AlreadyActive(PeerId),

    /// No connection record exists for the peer.
    #[error("no connection record for peer {0}")]
    NotFound(PeerId),

    /// The connect attempt was called off by a disconnect or shutdown.
    #[error("connect attempt for peer {0} was cancelled")]
    Cancelled(PeerId),

    /// The manager has been shut down and accepts no new work.
    #[error("peer manager is shutting down")]
    ShuttingDown,
}

impl PeerError {
    /// Returns `true` if another connect attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_transient(),
            _ => false,
        }
    }
}

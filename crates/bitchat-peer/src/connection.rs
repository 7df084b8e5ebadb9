//! Connection records: what the manager knows about each nearby peer.

use std::fmt;
use std::sync::Arc;

use bitchat_transport::PeerId;

/// Where a peer is in its connection lifecycle.
///
/// ```text
///   Discovered ──→ Connecting ──→ Validating ──→ Connected ──→ Disconnected
///                      │  ↑            │
///                      │  └─(retry)────┤
///                      ▼               ▼
///                    Failed ←──────────┘
/// ```
///
/// The table only ever stores `Connecting`, `Validating` and `Connected`
/// records. `Discovered` is the state of a record between its creation and
/// the attempt claiming it. `Disconnected` and `Failed` are terminal: a
/// record in either state has been taken out of the table and is only seen
/// by whoever removed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerState {
    Discovered,
    Connecting,
    Validating,
    Connected,
    Disconnected,
    Failed,
}

impl PeerState {
    /// An attempt is running for this peer.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Discovered | Self::Connecting | Self::Validating)
    }

    /// A new attempt must not be started while the peer is in this state.
    pub fn is_busy(self) -> bool {
        self.is_in_flight() || self == Self::Connected
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Discovered => "discovered",
            Self::Connecting => "connecting",
            Self::Validating => "validating",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// The manager's record of one peer.
///
/// The link handle is set when the peer joins and stays with the record
/// until the record is dropped, so a removed record still knows whether it
/// had joined and which link to close. `generation`
/// identifies the attempt that owns the record; callbacks and tasks from
/// older attempts carry a smaller number and are ignored.
#[derive(Debug)]
pub struct PeerConnection<L> {
    pub(crate) peer_id: PeerId,
    pub(crate) nickname: String,
    pub(crate) link: Option<Arc<L>>,
    pub(crate) state: PeerState,
    pub(crate) retries: u32,
    pub(crate) generation: u64,
}

impl<L> PeerConnection<L> {
    pub(crate) fn new(peer_id: PeerId, nickname: String, generation: u64) -> Self {
        Self {
            peer_id,
            nickname,
            link: None,
            state: PeerState::Discovered,
            retries: 0,
            generation,
        }
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn nickname(&self) -> &str {
        &self.nickname
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Failed attempts in the current generation.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn link(&self) -> Option<&Arc<L>> {
        self.link.as_ref()
    }

    /// The peer reached `Connected` at some point in this generation.
    pub fn had_joined(&self) -> bool {
        self.link.is_some()
    }

    /// A detached, link-free copy for reporting.
    pub fn summary(&self) -> PeerSummary {
        PeerSummary {
            peer_id: self.peer_id.clone(),
            nickname: self.nickname.clone(),
            state: self.state,
            retries: self.retries,
        }
    }
}

/// A snapshot of a [`PeerConnection`] that does not hold its link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSummary {
    pub peer_id: PeerId,
    pub nickname: String,
    pub state: PeerState,
    pub retries: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_starts_discovered_without_link() {
        let conn: PeerConnection<()> = PeerConnection::new(PeerId::from("a"), "alice".into(), 7);

        assert_eq!(conn.state(), PeerState::Discovered);
        assert!(conn.link().is_none());
        assert!(!conn.had_joined());
        assert_eq!(conn.retries(), 0);
        assert_eq!(conn.generation(), 7);
    }

    #[test]
    fn test_is_busy_covers_in_flight_and_connected() {
        assert!(PeerState::Connecting.is_busy());
        assert!(PeerState::Validating.is_busy());
        assert!(PeerState::Connected.is_busy());
        assert!(!PeerState::Failed.is_busy());
        assert!(!PeerState::Disconnected.is_busy());
        assert!(!PeerState::Connected.is_in_flight());
    }

    #[test]
    fn test_summary_copies_fields() {
        let mut conn: PeerConnection<()> = PeerConnection::new(PeerId::from("a"), "alice".into(), 1);
        conn.retries = 2;
        conn.state = PeerState::Failed;

        let summary = conn.summary();

        assert_eq!(summary.nickname, "alice");
        assert_eq!(summary.state, PeerState::Failed);
        assert_eq!(summary.retries, 2);
    }
}

//! The connection table: one record per nearby peer.
//!
//! `ConnectionTable` is plain data with no locking of its own. The
//! [`PeerManager`](crate::PeerManager) keeps it behind a
//! `tokio::sync::Mutex` and is its only writer; every method here is
//! synchronous so the lock is never held across radio I/O.
//!
//! Methods that advance an attempt take the attempt's `generation` and do
//! nothing if the record now belongs to a newer attempt (or is gone).

use std::collections::HashMap;
use std::sync::Arc;

use bitchat_transport::{DiscoveredPeer, PeerId};

use crate::{PeerConnection, PeerError, PeerState, PeerSummary};

/// Nickname used when a peer advertised no name.
pub const UNKNOWN_NICKNAME: &str = "unknown";

/// All peers the manager currently knows about, keyed by transport address.
///
/// ## Lifecycle
///
/// ```text
/// begin_attempt() ──→ mark_validating() ──→ mark_connected() ──→ remove()
///       │  ↑                 │
///       │  └─ record_failure()
///       ▼                    ▼
///   mark_failed() ←──────────┘
/// ```
///
/// `mark_failed()` and the `remove` family take the record out of the
/// table; a peer that stops advertising leaves nothing behind.
pub struct ConnectionTable<L> {
    peers: HashMap<PeerId, PeerConnection<L>>,
    next_generation: u64,
}

impl<L> Default for ConnectionTable<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L> ConnectionTable<L> {
    pub fn new() -> Self {
        Self {
            peers: HashMap::new(),
            next_generation: 1,
        }
    }

    /// Claims the in-flight slot for a discovered peer and returns the new
    /// attempt's generation. The record walks `Discovered → Connecting`.
    ///
    /// # Errors
    /// Returns [`PeerError::AlreadyActive`] if the peer is connecting,
    /// validating or connected.
    pub fn begin_attempt(&mut self, peer: &DiscoveredPeer) -> Result<u64, PeerError> {
        if self.peers.get(&peer.id).is_some_and(|conn| conn.state.is_busy()) {
            return Err(PeerError::AlreadyActive(peer.id.clone()));
        }
        let generation = self.next_generation;
        self.next_generation += 1;

        let nickname = peer
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| UNKNOWN_NICKNAME.to_owned());
        let mut conn = PeerConnection::new(peer.id.clone(), nickname, generation);
        tracing::debug!(peer_id = %peer.id, generation, "peer discovered");
        conn.state = PeerState::Connecting;
        self.peers.insert(peer.id.clone(), conn);
        Ok(generation)
    }

    /// Counts a failed attempt and returns the new retry count. The record
    /// stays `Connecting` until the caller decides between retry and
    /// [`mark_failed`](Self::mark_failed).
    pub fn record_failure(&mut self, peer_id: &PeerId, generation: u64) -> Option<u32> {
        let conn = self.current_mut(peer_id, generation)?;
        conn.retries += 1;
        conn.state = PeerState::Connecting;
        conn.link = None;
        Some(conn.retries)
    }

    pub fn mark_validating(&mut self, peer_id: &PeerId, generation: u64) -> bool {
        match self.current_mut(peer_id, generation) {
            Some(conn) if conn.state == PeerState::Connecting => {
                conn.state = PeerState::Validating;
                true
            }
            _ => false,
        }
    }

    /// Stores the link and marks the peer `Connected`. Returns the peer's
    /// nickname.
    ///
    /// # Errors
    /// Returns [`PeerError::NotFound`] if the record was removed or taken
    /// over by a newer attempt while this one was validating.
    pub fn mark_connected(
        &mut self,
        peer_id: &PeerId,
        generation: u64,
        link: Arc<L>,
    ) -> Result<String, PeerError> {
        let conn = self
            .current_mut(peer_id, generation)
            .filter(|conn| conn.state == PeerState::Validating)
            .ok_or_else(|| PeerError::NotFound(peer_id.clone()))?;
        conn.state = PeerState::Connected;
        conn.link = Some(link);
        Ok(conn.nickname.clone())
    }

    /// Gives up on an attempt: the record leaves the table and is returned
    /// as `Failed`. A later sweep starts from scratch.
    pub fn mark_failed(&mut self, peer_id: &PeerId, generation: u64) -> Option<PeerConnection<L>> {
        self.current_mut(peer_id, generation)?;
        let mut conn = self.peers.remove(peer_id)?;
        conn.state = PeerState::Failed;
        conn.link = None;
        Some(conn)
    }

    /// Removes a record whatever its generation and returns it as
    /// `Disconnected`. [`PeerConnection::had_joined`] tells the caller
    /// whether the peer had been announced as connected.
    pub fn remove(&mut self, peer_id: &PeerId) -> Option<PeerConnection<L>> {
        self.peers.remove(peer_id).map(disconnected)
    }

    /// Removes a record only if it belongs to `generation`.
    pub fn remove_generation(&mut self, peer_id: &PeerId, generation: u64) -> Option<PeerConnection<L>> {
        self.current_mut(peer_id, generation)?;
        self.remove(peer_id)
    }

    /// Empties the table, returning every record as `Disconnected`.
    pub fn drain(&mut self) -> Vec<PeerConnection<L>> {
        self.peers.drain().map(|(_, conn)| disconnected(conn)).collect()
    }

    /// Updates a peer's nickname, returning the old one if it changed.
    pub fn set_nickname(&mut self, peer_id: &PeerId, nickname: &str) -> Option<String> {
        let conn = self.peers.get_mut(peer_id)?;
        if conn.nickname == nickname {
            return None;
        }
        Some(std::mem::replace(&mut conn.nickname, nickname.to_owned()))
    }

    /// Links of every connected peer, sorted by peer id.
    pub fn connected_links(&self) -> Vec<(PeerId, Arc<L>)> {
        let mut links: Vec<_> = self
            .peers
            .values()
            .filter(|conn| conn.state == PeerState::Connected)
            .filter_map(|conn| Some((conn.peer_id.clone(), Arc::clone(conn.link.as_ref()?))))
            .collect();
        links.sort_by(|a, b| a.0.cmp(&b.0));
        links
    }

    /// `(peer id, nickname)` of every connected peer, sorted by peer id.
    pub fn connected_peers(&self) -> Vec<(PeerId, String)> {
        let mut peers: Vec<_> = self
            .peers
            .values()
            .filter(|conn| conn.state == PeerState::Connected)
            .map(|conn| (conn.peer_id.clone(), conn.nickname.clone()))
            .collect();
        peers.sort();
        peers
    }

    pub fn get(&self, peer_id: &PeerId) -> Option<&PeerConnection<L>> {
        self.peers.get(peer_id)
    }

    pub fn state(&self, peer_id: &PeerId) -> Option<PeerState> {
        self.peers.get(peer_id).map(PeerConnection::state)
    }

    pub fn summaries(&self) -> Vec<PeerSummary> {
        let mut all: Vec<_> = self.peers.values().map(PeerConnection::summary).collect();
        all.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        all
    }

    /// Number of live and in-flight records.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    fn current_mut(&mut self, peer_id: &PeerId, generation: u64) -> Option<&mut PeerConnection<L>> {
        self.peers
            .get_mut(peer_id)
            .filter(|conn| conn.generation == generation)
    }
}

fn disconnected<L>(mut conn: PeerConnection<L>) -> PeerConnection<L> {
    conn.state = PeerState::Disconnected;
    conn
}

//! Fan-out of outgoing packets to every connected peer.

use std::sync::Arc;

use bitchat_protocol::{Message, Packet, PacketType, PayloadCodec};
use bitchat_transport::{Link, PeerId, Radio, TransportError};
use futures_util::future::join_all;

use crate::PeerError;
use crate::manager::{Shared, bounded};

/// Per-peer outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: Vec<PeerId>,
    pub failed: Vec<(PeerId, TransportError)>,
}

impl BroadcastReport {
    /// No connected peer missed the packet (vacuously true with no peers).
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_peers(&self) -> impl Iterator<Item = &PeerId> {
        self.failed.iter().map(|(peer_id, _)| peer_id)
    }
}

/// Writes packets to every connected peer at once.
///
/// Obtained from [`PeerManager::dispatcher`](crate::PeerManager::dispatcher);
/// cheap to clone.
pub struct Dispatcher<R: Radio, C> {
    shared: Arc<Shared<R, C>>,
}

impl<R: Radio, C> Clone for Dispatcher<R, C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: Radio, C: PayloadCodec> Dispatcher<R, C> {
    pub(crate) fn new(shared: Arc<Shared<R, C>>) -> Self {
        Self { shared }
    }

    /// Encodes `message` once and writes it to every connected peer.
    ///
    /// # Errors
    /// Returns a [`PeerError::Protocol`] if the message cannot be encoded
    /// or the packet would be too large; nothing is written in that case.
    /// Per-peer write failures are not errors, they are listed in the
    /// report.
    pub async fn broadcast(&self, message: &Message) -> Result<BroadcastReport, PeerError> {
        let payload = self.shared.codec.encode(message)?;
        let packet = Packet::broadcast(PacketType::Message, self.shared.identity.node_id, payload);
        self.send_packet(&packet).await
    }

    /// Writes an already-built packet to every connected peer.
    ///
    /// Each write runs concurrently under `write_timeout`. A slow or
    /// failing peer never delays or fails the others, and nothing is
    /// retried.
    ///
    /// # Errors
    /// Returns a [`PeerError::Protocol`] if the packet cannot be encoded.
    pub async fn send_packet(&self, packet: &Packet) -> Result<BroadcastReport, PeerError> {
        let frame = packet.encode()?;
        let targets = self.shared.table.lock().await.connected_links();
        let limit = self.shared.config.write_timeout;
        let characteristic = &self.shared.config.chat_characteristic;

        let writes = targets.into_iter().map(|(peer_id, link)| {
            let frame = frame.clone();
            async move {
                let written = bounded(limit, link.write(characteristic, &frame, false)).await;
                (peer_id, written)
            }
        });

        let mut report = BroadcastReport::default();
        for (peer_id, written) in join_all(writes).await {
            match written {
                Ok(()) => report.delivered.push(peer_id),
                Err(e) => {
                    tracing::warn!(%peer_id, error = %e, packet_type = %packet.packet_type, "write failed");
                    self.shared
                        .system(format!("[ERROR] Failed to send to {peer_id}: {e}"));
                    report.failed.push((peer_id, e));
                }
            }
        }
        tracing::debug!(
            packet_type = %packet.packet_type,
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "packet dispatched"
        );
        Ok(report)
    }
}

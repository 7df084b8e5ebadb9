//! The inbound pipeline: notification bytes → [`Packet`] → [`ChatEvent`].
//!
//! Radio callbacks push raw frames into a channel; [`inbound_loop`] drains
//! it on its own task. A frame that fails to decode is dropped with a
//! system event and never affects the link it arrived on.

use std::sync::Arc;

use bitchat_protocol::{Packet, PacketType, PayloadCodec};
use bitchat_transport::{PeerId, Radio};
use tokio::sync::mpsc;

use crate::ChatEvent;
use crate::manager::{Origin, Shared};

/// A notification payload as delivered by the radio.
#[derive(Debug)]
pub(crate) struct InboundFrame {
    pub(crate) peer_id: PeerId,
    pub(crate) data: Vec<u8>,
}

pub(crate) async fn inbound_loop<R: Radio, C: PayloadCodec>(
    shared: Arc<Shared<R, C>>,
    mut frames: mpsc::UnboundedReceiver<InboundFrame>,
) {
    while let Some(frame) = frames.recv().await {
        handle_frame(&shared, frame).await;
    }
}

async fn handle_frame<R: Radio, C: PayloadCodec>(shared: &Shared<R, C>, frame: InboundFrame) {
    let InboundFrame { peer_id, data } = frame;
    let packet = match Packet::decode(&data) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::debug!(%peer_id, len = data.len(), error = %e, "dropping undecodable packet");
            shared.system(format!("[ERROR] Dropped packet from {peer_id}: {e}"));
            return;
        }
    };

    match packet.packet_type {
        PacketType::Message => match shared.codec.decode(&packet.payload) {
            Ok(message) => {
                tracing::debug!(%peer_id, id = message.id(), "message received");
                shared.emit(ChatEvent::Message(message));
            }
            Err(e) => {
                tracing::debug!(%peer_id, error = %e, "dropping malformed message");
                shared.system(format!("[ERROR] Dropped message from {peer_id}: {e}"));
            }
        },
        PacketType::Announce => {
            let announced = String::from_utf8_lossy(&packet.payload);
            let nickname = announced.trim();
            if nickname.is_empty() {
                return;
            }
            let previous = shared.table.lock().await.set_nickname(&peer_id, nickname);
            if let Some(previous) = previous {
                tracing::info!(%peer_id, %previous, %nickname, "peer renamed");
                shared.system(format!("{previous} is now known as {nickname}."));
            }
        }
        PacketType::Leave => {
            // Closing the link can take a while; other peers' frames must not wait.
            tracing::info!(%peer_id, "peer said goodbye");
            shared.request_teardown(peer_id, Origin::Local);
        }
        PacketType::KeyExchange => {
            tracing::debug!(%peer_id, "ignoring key exchange packet");
        }
    }
}

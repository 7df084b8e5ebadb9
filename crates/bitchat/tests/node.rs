//! End-to-end tests for `ChatNode` over a simulated radio.

use std::time::Duration;

use bitchat::prelude::*;
use bitchat::bitchat_protocol::{Packet, PacketType};
use tokio::sync::mpsc;

// =========================================================================
// Helpers
// =========================================================================

/// Forwards every event to a channel the test can read.
struct ChannelSink(mpsc::UnboundedSender<ChatEvent>);

impl ChatSink for ChannelSink {
    fn on_message(&mut self, message: Message) {
        let _ = self.0.send(ChatEvent::Message(message));
    }

    fn on_system_event(&mut self, text: String) {
        let _ = self.0.send(ChatEvent::System(text));
    }

    fn on_peer_joined(&mut self, peer_id: PeerId, nickname: String) {
        let _ = self.0.send(ChatEvent::PeerJoined { peer_id, nickname });
    }

    fn on_peer_left(&mut self, peer_id: PeerId) {
        let _ = self.0.send(ChatEvent::PeerLeft { peer_id });
    }
}

struct Harness {
    radio: SimRadio,
    node: ChatNode<SimRadio>,
    events: mpsc::UnboundedReceiver<ChatEvent>,
    bob: PeerId,
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

fn drain(events: &mut mpsc::UnboundedReceiver<ChatEvent>) -> Vec<ChatEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// A node named "alice" connected to a single peer "bob".
async fn connected_node() -> Harness {
    let radio = SimRadio::new();
    radio.add_peer("bob-addr", SimPeer::chat("bob"));
    let (tx, events) = mpsc::unbounded_channel();
    let node = ChatNodeBuilder::new()
        .nickname("alice")
        .node_id(NodeId([0xA1; 8]))
        .build(radio.clone(), ChannelSink(tx));
    node.start_without_discovery();
    node.sweep().await.unwrap();
    settle().await;

    let mut harness = Harness {
        radio,
        node,
        events,
        bob: PeerId::from("bob-addr"),
    };
    drain(&mut harness.events);
    harness
}

fn message_frame(message: &Message) -> Vec<u8> {
    let payload = DelimitedCodec.encode(message).unwrap();
    Packet::broadcast(PacketType::Message, NodeId([0xB0; 8]), payload)
        .encode()
        .unwrap()
        .to_vec()
}

// =========================================================================
// Inbound
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_inbound_notification_reaches_sink() {
    let mut h = connected_node().await;
    let msg = Message::new("bob", "hi alice").with_id("m-1");

    assert!(h.radio.notify(&h.bob, &message_frame(&msg)));
    settle().await;

    assert_eq!(drain(&mut h.events), vec![ChatEvent::Message(msg)]);
}

#[tokio::test(start_paused = true)]
async fn test_bad_packet_dropped_without_disconnecting() {
    let mut h = connected_node().await;

    // Version 2 is not understood.
    let mut frame = message_frame(&Message::new("bob", "from the future"));
    frame[0] = 2;
    h.radio.notify(&h.bob, &frame);
    settle().await;

    let events = drain(&mut h.events);
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], ChatEvent::System(text) if text.contains("unsupported protocol version 2")));
    assert_eq!(h.node.peer_state(&h.bob).await, Some(PeerState::Connected));

    // The link still carries traffic.
    let msg = Message::new("bob", "still here").with_id("m-2");
    h.radio.notify(&h.bob, &message_frame(&msg));
    settle().await;
    assert_eq!(drain(&mut h.events), vec![ChatEvent::Message(msg)]);
}

// =========================================================================
// Outbound
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_say_broadcasts_from_nickname() {
    let h = connected_node().await;

    let report = h.node.say("hello bob").await.unwrap();

    assert_eq!(report.delivered, vec![h.bob.clone()]);
    let written = h.radio.written(&h.bob);
    // Announce on connect, then the message.
    assert_eq!(written.len(), 2);
    let announce = Packet::decode(&written[0]).unwrap();
    assert_eq!(announce.packet_type, PacketType::Announce);
    assert_eq!(announce.payload, b"alice");

    let packet = Packet::decode(&written[1]).unwrap();
    assert_eq!(packet.packet_type, PacketType::Message);
    assert_eq!(packet.sender_id, NodeId([0xA1; 8]));
    let msg = DelimitedCodec.decode(&packet.payload).unwrap();
    assert_eq!(msg.sender(), "alice");
    assert_eq!(msg.content(), "hello bob");
}

#[tokio::test(start_paused = true)]
async fn test_say_unencodable_content_is_error() {
    let h = connected_node().await;

    let result = h.node.say("a | b").await;

    assert!(matches!(result, Err(BitchatError::Peer(_))));
    assert_eq!(h.radio.written(&h.bob).len(), 1, "only the announce was written");
}

#[cfg(feature = "json")]
#[tokio::test(start_paused = true)]
async fn test_json_codec_carries_separator_characters() {
    let radio = SimRadio::new();
    radio.add_peer("bob-addr", SimPeer::chat("bob"));
    let (tx, _events) = mpsc::unbounded_channel();
    let node = ChatNodeBuilder::new()
        .nickname("alice")
        .codec(JsonCodec)
        .build(radio.clone(), ChannelSink(tx));
    node.start_without_discovery();
    node.sweep().await.unwrap();
    settle().await;

    node.say("a | b: c").await.unwrap();

    let written = radio.written(&PeerId::from("bob-addr"));
    let packet = Packet::decode(written.last().unwrap()).unwrap();
    assert_eq!(JsonCodec.decode(&packet.payload).unwrap().content(), "a | b: c");
}

// =========================================================================
// Identity
// =========================================================================

#[tokio::test]
async fn test_default_nickname_derives_from_node_id() {
    let (tx, _events) = mpsc::unbounded_channel();
    let node = ChatNodeBuilder::new()
        .node_id(NodeId([0xAB, 0xCD, 0, 0, 0, 0, 0, 0]))
        .build(SimRadio::new(), ChannelSink(tx));

    assert_eq!(node.nickname(), "user-abcd");
    assert_eq!(node.node_id(), NodeId([0xAB, 0xCD, 0, 0, 0, 0, 0, 0]));
}

// =========================================================================
// Shutdown
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_says_goodbye_and_drains_sink() {
    let mut h = connected_node().await;

    let report = h.node.shutdown().await;

    assert_eq!(report.disconnected, vec![h.bob.clone()]);
    let written = h.radio.written(&h.bob);
    let last = Packet::decode(written.last().unwrap()).unwrap();
    assert_eq!(last.packet_type, PacketType::Leave);
    assert!(!h.radio.is_connected(&h.bob));

    let mut seen = Vec::new();
    while let Some(event) = h.events.recv().await {
        seen.push(event);
    }
    assert!(seen.contains(&ChatEvent::PeerLeft { peer_id: h.bob.clone() }));
    assert!(seen.contains(&ChatEvent::System("bob has disconnected.".into())));
}

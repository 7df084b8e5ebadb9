//! A scripted chat session against an in-memory radio.
//!
//! Usage: `sim-chat [config.json]`. The optional file holds a `PeerConfig`
//! in JSON; missing keys keep their defaults.

use std::time::Duration;

use bitchat::bitchat_protocol::{Packet, PacketType};
use bitchat::prelude::*;

// ---------------------------------------------------------------------------
// Terminal sink
// ---------------------------------------------------------------------------

struct Terminal;

impl ChatSink for Terminal {
    fn on_message(&mut self, message: Message) {
        match message.channel() {
            Some(channel) => println!("[{channel}] <{}> {}", message.sender(), message.content()),
            None => println!("<{}> {}", message.sender(), message.content()),
        }
    }

    fn on_system_event(&mut self, text: String) {
        println!("* {text}");
    }

    fn on_peer_joined(&mut self, peer_id: PeerId, nickname: String) {
        println!("+ {nickname} joined ({peer_id})");
    }

    fn on_peer_left(&mut self, peer_id: PeerId) {
        println!("- {peer_id} left");
    }
}

// ---------------------------------------------------------------------------
// Setup
// ---------------------------------------------------------------------------

fn load_config() -> Result<PeerConfig, Box<dyn std::error::Error>> {
    let Some(path) = std::env::args().nth(1) else {
        return Ok(PeerConfig {
            scan_interval: Duration::from_secs(1),
            retry: RetryPolicy::fixed(2, Duration::from_millis(500)),
            ..PeerConfig::default()
        });
    };
    let text = std::fs::read_to_string(&path)?;
    let config: PeerConfig = serde_json::from_str(&text)?;
    tracing::info!(%path, "loaded config");
    Ok(config)
}

fn populate(radio: &SimRadio) {
    radio.add_peer("B0:B0:B0:B0:B0:B0", SimPeer::chat("bob"));
    radio.add_peer(
        "CA:CA:CA:CA:CA:CA",
        SimPeer::chat("carol")
            .with_connect(ConnectBehavior::AcceptAfter(Duration::from_millis(800))),
    );
    radio.add_peer("DE:AD:DE:AD:DE:AD", SimPeer::impostor("mallory"));
    radio.add_peer(
        "D0:D0:D0:D0:D0:D0",
        SimPeer::chat("dave").with_connect(ConnectBehavior::Refuse),
    );
}

/// What a remote peer would put on the air.
fn remote_message(sender: &str, content: &str) -> Result<Vec<u8>, BitchatError> {
    let message = Message::new(sender, content);
    let payload = DelimitedCodec.encode(&message)?;
    let packet = Packet::broadcast(PacketType::Message, NodeId::random(), payload);
    Ok(packet.encode()?.to_vec())
}

// ---------------------------------------------------------------------------
// Script
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    bitchat::init_tracing();

    let config = load_config()?;
    let radio = SimRadio::new();
    populate(&radio);

    let node = ChatNodeBuilder::new()
        .nickname("alice")
        .config(config)
        .build(radio.clone(), Terminal);
    node.start();
    tokio::time::sleep(Duration::from_secs(3)).await;

    let report = node.say("hello, anyone nearby?").await?;
    println!(
        "# delivered to {} peer(s), {} failed",
        report.delivered.len(),
        report.failed.len()
    );

    let bob = PeerId::from("B0:B0:B0:B0:B0:B0");
    radio.notify(&bob, &remote_message("bob", "hi alice!")?);
    radio.notify(&bob, b"\x01\x04garbage");
    tokio::time::sleep(Duration::from_millis(200)).await;

    println!("# carol walks out of range");
    radio.remove_peer(&PeerId::from("CA:CA:CA:CA:CA:CA"));
    tokio::time::sleep(Duration::from_millis(200)).await;

    for (peer_id, nickname) in node.connected_peers().await {
        println!("# still connected: {nickname} ({peer_id})");
    }

    let report = node.shutdown().await;
    println!(
        "# shutdown: {} disconnected, {} timed out, {} attempts cancelled",
        report.disconnected.len(),
        report.timed_out.len(),
        report.cancelled_attempts
    );
    Ok(())
}

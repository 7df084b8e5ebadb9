//! What the peer layer tells the presentation layer.

use bitchat_protocol::Message;
use bitchat_transport::PeerId;
use tokio::sync::mpsc;

/// Something the user should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    /// A chat message arrived from a peer.
    Message(Message),
    /// A human-readable status line (connects, failures, dropped packets).
    System(String),
    /// A peer passed validation and can receive broadcasts.
    PeerJoined { peer_id: PeerId, nickname: String },
    /// A peer that had joined is gone.
    PeerLeft { peer_id: PeerId },
}

impl ChatEvent {
    /// Calls the matching [`ChatSink`] method.
    pub fn deliver_to<S: ChatSink + ?Sized>(self, sink: &mut S) {
        match self {
            Self::Message(message) => sink.on_message(message),
            Self::System(text) => sink.on_system_event(text),
            Self::PeerJoined { peer_id, nickname } => sink.on_peer_joined(peer_id, nickname),
            Self::PeerLeft { peer_id } => sink.on_peer_left(peer_id),
        }
    }
}

/// Receives chat events, typically to render them.
///
/// Methods are called from a single pump task in the order events were
/// produced, so implementations need no locking of their own.
pub trait ChatSink: Send + 'static {
    fn on_message(&mut self, message: Message);
    fn on_system_event(&mut self, text: String);
    fn on_peer_joined(&mut self, peer_id: PeerId, nickname: String);
    fn on_peer_left(&mut self, peer_id: PeerId);
}

/// Feeds every event from `events` into `sink` until all senders are
/// dropped, then hands the sink back.
pub async fn pump<S: ChatSink>(mut events: mpsc::UnboundedReceiver<ChatEvent>, mut sink: S) -> S {
    while let Some(event) = events.recv().await {
        event.deliver_to(&mut sink);
    }
    sink
}

/// A sink that just records what it was given.
///
/// Useful in tests and as a starting point for log-only deployments.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecordingSink {
    pub events: Vec<ChatEvent>,
}

impl RecordingSink {
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.events.iter().filter_map(|event| match event {
            ChatEvent::Message(message) => Some(message),
            _ => None,
        })
    }

    pub fn system_lines(&self) -> impl Iterator<Item = &str> {
        self.events.iter().filter_map(|event| match event {
            ChatEvent::System(text) => Some(text.as_str()),
            _ => None,
        })
    }
}

impl ChatSink for RecordingSink {
    fn on_message(&mut self, message: Message) {
        self.events.push(ChatEvent::Message(message));
    }

    fn on_system_event(&mut self, text: String) {
        self.events.push(ChatEvent::System(text));
    }

    fn on_peer_joined(&mut self, peer_id: PeerId, nickname: String) {
        self.events.push(ChatEvent::PeerJoined { peer_id, nickname });
    }

    fn on_peer_left(&mut self, peer_id: PeerId) {
        self.events.push(ChatEvent::PeerLeft { peer_id });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pump_delivers_in_order_and_returns_sink() {
        let (tx, rx) = mpsc::unbounded_channel();
        let msg = Message::new("alice", "hi");
        tx.send(ChatEvent::PeerJoined {
            peer_id: PeerId::from("a"),
            nickname: "alice".into(),
        })
        .unwrap();
        tx.send(ChatEvent::Message(msg.clone())).unwrap();
        tx.send(ChatEvent::System("note".into())).unwrap();
        tx.send(ChatEvent::PeerLeft { peer_id: PeerId::from("a") }).unwrap();
        drop(tx);

        let sink = pump(rx, RecordingSink::default()).await;

        assert_eq!(sink.events.len(), 4);
        assert_eq!(sink.messages().collect::<Vec<_>>(), vec![&msg]);
        assert_eq!(sink.system_lines().collect::<Vec<_>>(), vec!["note"]);
        assert!(matches!(sink.events[3], ChatEvent::PeerLeft { .. }));
    }
}

//! The application-level chat message carried inside `Message` packets.

use serde::{Deserialize, Serialize};

use crate::types::now_millis;

/// A chat message.
///
/// Fields are private: a message is immutable once built. Build one with
/// [`Message::new`] and the `with_*` methods, then read it through the
/// accessors.
///
/// ```rust
/// use bitchat_protocol::Message;
///
/// let msg = Message::new("alice", "hello").in_channel("#general");
/// assert_eq!(msg.sender(), "alice");
/// assert_eq!(msg.channel(), Some("#general"));
/// assert_eq!(msg.id().len(), 32);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    id: String,
    sender: String,
    content: String,
    timestamp: u64,
    is_private: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    channel: Option<String>,
}

impl Message {
    /// Creates a public message with a fresh id, stamped with the current
    /// time.
    pub fn new(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: generate_id(),
            sender: sender.into(),
            content: content.into(),
            timestamp: now_millis(),
            is_private: false,
            channel: None,
        }
    }

    /// Replaces the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn private(mut self, is_private: bool) -> Self {
        self.is_private = is_private;
        self
    }

    /// Tags the message with a channel. An empty name means no channel.
    pub fn in_channel(mut self, channel: impl Into<String>) -> Self {
        let channel = channel.into();
        self.channel = (!channel.is_empty()).then_some(channel);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Milliseconds since the Unix epoch.
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn is_private(&self) -> bool {
        self.is_private
    }

    pub fn channel(&self) -> Option<&str> {
        self.channel.as_deref()
    }
}

/// 32 lowercase hex characters (128 random bits).
fn generate_id() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_generates_unique_hex_ids() {
        let a = Message::new("alice", "one");
        let b = Message::new("alice", "two");

        assert_eq!(a.id().len(), 32);
        assert!(a.id().chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_new_defaults_to_public_without_channel() {
        let msg = Message::new("alice", "hi");

        assert!(!msg.is_private());
        assert_eq!(msg.channel(), None);
        assert!(msg.timestamp() > 0);
    }

    #[test]
    fn test_in_channel_empty_means_none() {
        let msg = Message::new("alice", "hi").in_channel("");
        assert_eq!(msg.channel(), None);
    }

    #[test]
    fn test_builders_set_fields() {
        let msg = Message::new("bob", "psst")
            .with_id("m-1")
            .with_timestamp(42)
            .private(true)
            .in_channel("#ops");

        assert_eq!(msg.id(), "m-1");
        assert_eq!(msg.timestamp(), 42);
        assert!(msg.is_private());
        assert_eq!(msg.channel(), Some("#ops"));
    }
}

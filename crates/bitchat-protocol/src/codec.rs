//! Codecs that turn a [`Message`] into a packet payload and back.
//!
//! The packet layer treats its payload as opaque bytes. How a chat message
//! is laid out inside those bytes is a strategy, expressed by the
//! [`PayloadCodec`] trait:
//!
//! - [`DelimitedCodec`] — the `key:value|key:value` text format every
//!   existing bitchat peer speaks. This is the default.
//! - [`JsonCodec`] (feature `json`) — serde_json. Unambiguous for any
//!   content, but only understood by peers configured the same way.

use std::collections::HashMap;

use crate::{Message, ProtocolError};

/// Encodes and decodes chat messages to and from packet payloads.
///
/// Implementations must never panic on arbitrary input: anything that
/// cannot be parsed is a [`ProtocolError::MalformedPayload`].
pub trait PayloadCodec: Send + Sync + 'static {
    /// Serializes a message.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Unencodable`] if a field cannot be
    /// represented in this format.
    fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError>;

    /// Parses a payload.
    ///
    /// # Errors
    /// Returns [`ProtocolError::MalformedPayload`] for anything that is not
    /// a valid message in this format.
    fn decode(&self, payload: &[u8]) -> Result<Message, ProtocolError>;
}

// ---------------------------------------------------------------------------
// DelimitedCodec
// ---------------------------------------------------------------------------

/// Segment separator.
const FIELD_SEP: char = '|';
/// Key/value separator within a segment. Only the first one counts.
const KV_SEP: char = ':';

/// The interoperable text format:
/// `id:<v>|s:<v>|c:<v>|t:<v>|p:<True|False>|ch:<v>`.
///
/// Fields may appear in any order and optional ones may be missing.
/// Decoding defaults the sender to `"unknown"`, the id to empty, the
/// timestamp to 0 and the channel to none; only the content (`c`) is
/// mandatory. Unknown keys are ignored.
///
/// There is no escaping. A value may contain `:` (only the first colon
/// of a segment splits), but a `|` inside any field would split the
/// segment on the receiving side, so [`encode`](PayloadCodec::encode)
/// refuses such messages instead of emitting a frame that decodes to
/// something else.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedCodec;

impl PayloadCodec for DelimitedCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        let fields = [
            ("id", message.id()),
            ("sender", message.sender()),
            ("content", message.content()),
            ("channel", message.channel().unwrap_or("")),
        ];
        if let Some((name, _)) =
            fields.iter().find(|(_, value)| value.contains(FIELD_SEP))
        {
            return Err(ProtocolError::Unencodable(format!(
                "{name} contains the '{FIELD_SEP}' separator"
            )));
        }

        let text = format!(
            "id:{}|s:{}|c:{}|t:{}|p:{}|ch:{}",
            message.id(),
            message.sender(),
            message.content(),
            message.timestamp(),
            if message.is_private() { "True" } else { "False" },
            message.channel().unwrap_or(""),
        );
        Ok(text.into_bytes())
    }

    fn decode(&self, payload: &[u8]) -> Result<Message, ProtocolError> {
        let text = std::str::from_utf8(payload).map_err(|e| {
            ProtocolError::MalformedPayload(format!("not UTF-8: {e}"))
        })?;

        let mut fields: HashMap<&str, &str> = HashMap::new();
        for segment in text.split(FIELD_SEP) {
            let (key, value) = segment.split_once(KV_SEP).ok_or_else(|| {
                ProtocolError::MalformedPayload(format!(
                    "segment {segment:?} has no key"
                ))
            })?;
            fields.insert(key, value);
        }

        let content = fields.get("c").ok_or_else(|| {
            ProtocolError::MalformedPayload("missing content field".into())
        })?;
        let timestamp = match fields.get("t") {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                ProtocolError::MalformedPayload(format!(
                    "timestamp {raw:?} is not a number"
                ))
            })?,
            None => 0,
        };

        Ok(Message::new(fields.get("s").copied().unwrap_or("unknown"), *content)
            .with_id(fields.get("id").copied().unwrap_or(""))
            .with_timestamp(timestamp)
            .private(fields.get("p").is_some_and(|p| *p == "True"))
            .in_channel(fields.get("ch").copied().unwrap_or("")))
    }
}

// ---------------------------------------------------------------------------
// JsonCodec
// ---------------------------------------------------------------------------

/// A [`PayloadCodec`] that uses JSON (via `serde_json`).
///
/// JSON escapes every character it needs to, so any sender or content
/// survives the trip. The trade-off is interop: delimiter-format peers
/// will reject these payloads as malformed.
///
/// ```rust
/// use bitchat_protocol::{JsonCodec, Message, PayloadCodec};
///
/// let codec = JsonCodec;
/// let msg = Message::new("a|b", "c:d|e");
///
/// let bytes = codec.encode(&msg).unwrap();
/// assert_eq!(codec.decode(&bytes).unwrap(), msg);
/// ```
#[cfg(feature = "json")]
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

#[cfg(feature = "json")]
impl PayloadCodec for JsonCodec {
    fn encode(&self, message: &Message) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(message)
            .map_err(|e| ProtocolError::Unencodable(e.to_string()))
    }

    fn decode(&self, payload: &[u8]) -> Result<Message, ProtocolError> {
        serde_json::from_slice(payload)
            .map_err(|e| ProtocolError::MalformedPayload(e.to_string()))
    }
}

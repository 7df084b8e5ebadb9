//! Peer connection management for bitchat.
//!
//! This crate decides *who* we talk to and delivers what they say:
//!
//! 1. **Discovery and connection** — [`PeerManager`] sweeps for nearby
//!    peers, connects, validates that each one speaks the chat protocol and
//!    retries transient failures per a [`RetryPolicy`].
//! 2. **Connection tracking** — [`ConnectionTable`] holds one
//!    [`PeerConnection`] per peer and enforces at most one live or
//!    in-flight connection each.
//! 3. **Broadcast** — [`Dispatcher`] writes a packet to every connected
//!    peer concurrently and reports per-peer outcomes.
//! 4. **Events** — everything the user should see arrives as a
//!    [`ChatEvent`], which a [`ChatSink`] renders.
//!
//! # How it fits in the stack
//!
//! ```text
//! Facade (above)      ← ChatNode: builds a manager, pumps events to a sink
//!     ↕
//! Peer layer (this crate)  ← lifecycle, retries, fan-out, inbound decode
//!     ↕
//! Protocol + Transport (below)  ← Packet/Message codecs, Radio/Link traits
//! ```

mod config;
mod connection;
mod dispatch;
mod error;
mod events;
mod inbound;
mod manager;
mod retry;
mod table;

pub use config::{LocalIdentity, PeerConfig};
pub use connection::{PeerConnection, PeerState, PeerSummary};
pub use dispatch::{BroadcastReport, Dispatcher};
pub use error::PeerError;
pub use events::{ChatEvent, ChatSink, RecordingSink, pump};
pub use manager::{PeerManager, ShutdownReport};
pub use retry::{Backoff, RetryPolicy};
pub use table::{ConnectionTable, UNKNOWN_NICKNAME};

//! # bitchat
//!
//! Peer-to-peer chat over short-range radio links.
//!
//! A [`ChatNode`] discovers nearby peers, connects to the ones that speak
//! the chat protocol, broadcasts messages to all of them and hands
//! everything it hears to a [`ChatSink`](bitchat_peer::ChatSink).
//!
//! The layers are also usable on their own:
//!
//! - [`bitchat_transport`] — the `Radio`/`Link` traits and `SimRadio`
//! - [`bitchat_protocol`] — packet and message codecs
//! - [`bitchat_peer`] — connection lifecycle, retries and broadcast
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bitchat::prelude::*;
//!
//! # async fn demo() -> Result<(), BitchatError> {
//! bitchat::init_tracing();
//!
//! let radio = SimRadio::new();
//! radio.add_peer("AA:BB", SimPeer::chat("bob"));
//!
//! let node = ChatNodeBuilder::new()
//!     .nickname("alice")
//!     .build(radio, RecordingSink::default());
//! node.start();
//! node.say("hi bob").await?;
//! node.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod error;
mod node;

pub use error::BitchatError;
pub use node::{ChatNode, ChatNodeBuilder};

pub use bitchat_peer;
pub use bitchat_protocol;
pub use bitchat_transport;

/// Installs a `tracing` subscriber that prints to stderr.
///
/// The filter comes from `RUST_LOG`, defaulting to `info` for the bitchat
/// crates. Calling it again (or after another subscriber was installed)
/// does nothing.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("warn,bitchat=info,bitchat_peer=info,bitchat_transport=info")
    });
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Everything needed to run a node.
pub mod prelude {
    pub use crate::{BitchatError, ChatNode, ChatNodeBuilder};
    pub use bitchat_peer::{
        BroadcastReport, ChatEvent, ChatSink, PeerConfig, PeerState, RecordingSink, RetryPolicy,
        ShutdownReport,
    };
    #[cfg(feature = "json")]
    pub use bitchat_protocol::JsonCodec;
    pub use bitchat_protocol::{DelimitedCodec, Message, NodeId, PayloadCodec};
    pub use bitchat_transport::{PeerId, Radio};
    #[cfg(feature = "sim")]
    pub use bitchat_transport::{ConnectBehavior, SimPeer, SimRadio};
}

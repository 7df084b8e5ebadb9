//! `ChatNode` builder and lifecycle.
//!
//! This is the entry point for running a bitchat node. It ties together
//! the layers: radio → peer manager → event pump → sink.

use std::time::Duration;

use bitchat_peer::{
    BroadcastReport, ChatSink, Dispatcher, LocalIdentity, PeerConfig, PeerManager, PeerState,
    ShutdownReport,
};
use bitchat_protocol::{DelimitedCodec, Message, NodeId, Packet, PacketType, PayloadCodec};
use bitchat_transport::{PeerId, Radio};
use tokio::task::JoinHandle;

use crate::BitchatError;

/// How long [`ChatNode::shutdown`] waits for the sink to drain.
const PUMP_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Builder for configuring a [`ChatNode`].
///
/// # Example
///
/// ```rust,no_run
/// use bitchat::prelude::*;
///
/// # async fn demo() -> Result<(), BitchatError> {
/// let node = ChatNodeBuilder::new()
///     .nickname("alice")
///     .build(SimRadio::new(), RecordingSink::default());
/// node.start();
/// node.say("hello").await?;
/// node.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct ChatNodeBuilder<C = DelimitedCodec> {
    nickname: Option<String>,
    node_id: Option<NodeId>,
    config: PeerConfig,
    codec: C,
}

impl ChatNodeBuilder<DelimitedCodec> {
    /// Creates a builder with default settings and the interoperable
    /// delimited message format.
    pub fn new() -> Self {
        Self {
            nickname: None,
            node_id: None,
            config: PeerConfig::default(),
            codec: DelimitedCodec,
        }
    }
}

impl Default for ChatNodeBuilder<DelimitedCodec> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: PayloadCodec> ChatNodeBuilder<C> {
    /// Sets the name shown to peers. Defaults to `user-` plus the first
    /// four hex digits of the node id.
    pub fn nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    /// Fixes the node id instead of drawing a random one.
    pub fn node_id(mut self, node_id: NodeId) -> Self {
        self.node_id = Some(node_id);
        self
    }

    pub fn config(mut self, config: PeerConfig) -> Self {
        self.config = config;
        self
    }

    /// Swaps the message payload format.
    pub fn codec<C2: PayloadCodec>(self, codec: C2) -> ChatNodeBuilder<C2> {
        ChatNodeBuilder {
            nickname: self.nickname,
            node_id: self.node_id,
            config: self.config,
            codec,
        }
    }

    /// Creates the node and starts delivering its events to `sink`.
    ///
    /// Must be called from within a Tokio runtime. The node does not look
    /// for peers until [`ChatNode::start`] is called.
    pub fn build<R: Radio, S: ChatSink>(self, radio: R, sink: S) -> ChatNode<R, C> {
        let node_id = self.node_id.unwrap_or_else(NodeId::random);
        let nickname = self
            .nickname
            .unwrap_or_else(|| format!("user-{}", &node_id.to_string()[..4]));
        let identity = LocalIdentity::new(node_id, nickname);

        let (manager, events) = PeerManager::new(radio, self.config, identity, self.codec);
        let pump = tokio::spawn(async move {
            bitchat_peer::pump(events, sink).await;
        });
        tracing::info!(%node_id, nickname = %manager.identity().nickname, "chat node created");

        ChatNode {
            dispatcher: manager.dispatcher(),
            manager,
            pump,
        }
    }
}

/// A running chat participant.
pub struct ChatNode<R: Radio, C: PayloadCodec = DelimitedCodec> {
    manager: PeerManager<R, C>,
    dispatcher: Dispatcher<R, C>,
    pump: JoinHandle<()>,
}

impl<R: Radio, C: PayloadCodec> ChatNode<R, C> {
    /// Starts periodic discovery and the background loops.
    pub fn start(&self) {
        self.manager.start();
    }

    /// Starts the background loops only; peers are found by calling
    /// [`sweep`](Self::sweep).
    pub fn start_without_discovery(&self) {
        self.manager.start_without_discovery();
    }

    /// Runs one discovery sweep now.
    ///
    /// # Errors
    /// Fails if the node is shutting down or the radio cannot scan.
    pub async fn sweep(&self) -> Result<usize, BitchatError> {
        Ok(self.manager.sweep().await?)
    }

    /// Sends a message to every connected peer.
    ///
    /// # Errors
    /// Fails only if the message cannot be encoded; per-peer delivery
    /// failures are listed in the report.
    pub async fn broadcast(&self, message: Message) -> Result<BroadcastReport, BitchatError> {
        Ok(self.dispatcher.broadcast(&message).await?)
    }

    /// Sends `content` as a public message from this node.
    ///
    /// # Errors
    /// See [`broadcast`](Self::broadcast).
    pub async fn say(&self, content: impl Into<String>) -> Result<BroadcastReport, BitchatError> {
        let message = Message::new(self.nickname(), content);
        self.broadcast(message).await
    }

    pub async fn disconnect(&self, peer_id: &PeerId) -> bool {
        self.manager.disconnect(peer_id).await
    }

    pub async fn connected_peers(&self) -> Vec<(PeerId, String)> {
        self.manager.connected_peers().await
    }

    pub async fn peer_state(&self, peer_id: &PeerId) -> Option<PeerState> {
        self.manager.peer_state(peer_id).await
    }

    pub fn nickname(&self) -> &str {
        &self.manager.identity().nickname
    }

    pub fn node_id(&self) -> NodeId {
        self.manager.identity().node_id
    }

    /// The underlying peer manager, for queries the node does not wrap.
    pub fn manager(&self) -> &PeerManager<R, C> {
        &self.manager
    }

    /// Says goodbye to every peer, shuts the manager down and waits for
    /// the sink to receive the remaining events.
    pub async fn shutdown(self) -> ShutdownReport {
        let leave = Packet::broadcast(PacketType::Leave, self.node_id(), Vec::new());
        match self.dispatcher.send_packet(&leave).await {
            Ok(report) => {
                tracing::debug!(notified = report.delivered.len(), "leave packet sent");
            }
            Err(e) => tracing::warn!(error = %e, "could not send leave packet"),
        }

        let report = self.manager.shutdown().await;

        // The pump ends once every event sender is gone.
        let Self {
            manager,
            dispatcher,
            mut pump,
        } = self;
        drop(dispatcher);
        drop(manager);
        if tokio::time::timeout(PUMP_DRAIN_TIMEOUT, &mut pump).await.is_err() {
            tracing::warn!("event sink did not drain in time");
            pump.abort();
        }
        report
    }
}

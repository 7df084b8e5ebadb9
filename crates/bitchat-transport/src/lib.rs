//! Radio abstraction layer for bitchat.
//!
//! Provides the [`Radio`] and [`Link`] traits that abstract over the
//! short-range wireless stack (BLE central role in practice). The connection
//! manager only ever talks to these traits, so the same lifecycle code runs
//! against real hardware or against the in-memory [`SimRadio`].
//!
//! # Callbacks
//!
//! Radios deliver notifications and disconnects through callbacks that may
//! fire on any thread, from inside the radio's own call stack. Handlers
//! must therefore be cheap and non-blocking: push into a channel and return.
//!
//! # Feature Flags
//!
//! - `sim` (default) — [`SimRadio`], a scriptable in-memory radio

mod error;
#[cfg(feature = "sim")]
mod sim;

pub use error::TransportError;
#[cfg(feature = "sim")]
pub use sim::{ConnectBehavior, SimLink, SimPeer, SimRadio};

use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// GATT service every bitchat peer advertises.
pub const CHAT_SERVICE: CapabilityId =
    CapabilityId::from_static("F47B5E2D-4A9E-4C5A-9B3F-8E1D2C3A4B5C");

/// Characteristic used for both notifications and writes.
pub const CHAT_CHARACTERISTIC: CapabilityId =
    CapabilityId::from_static("A1B2C3D4-E5F6-4A5B-8C9D-0E1F2A3B4C5D");

/// Transport-level address of a nearby peer (a BLE address on hardware).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(String);

impl PeerId {
    /// Creates a `PeerId` from a transport address.
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into())
    }

    /// Returns the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(addr: &str) -> Self {
        Self::new(addr)
    }
}

impl From<String> for PeerId {
    fn from(addr: String) -> Self {
        Self(addr)
    }
}

/// Identifier of a service or characteristic exposed by a peer.
///
/// UUIDs are compared in their uppercase form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CapabilityId(Cow<'static, str>);

impl CapabilityId {
    /// Creates an id from a string literal. The literal must already be
    /// uppercase.
    pub const fn from_static(uuid: &'static str) -> Self {
        Self(Cow::Borrowed(uuid))
    }

    /// Creates an id from any UUID string, normalising its case.
    pub fn new(uuid: impl AsRef<str>) -> Self {
        Self(Cow::Owned(uuid.as_ref().to_ascii_uppercase()))
    }

    /// Returns the UUID string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CapabilityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A peer seen during a discovery sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPeer {
    /// Transport address.
    pub id: PeerId,
    /// Advertised local name, if the peer sent one.
    pub name: Option<String>,
}

impl DiscoveredPeer {
    pub fn new(id: impl Into<PeerId>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
        }
    }
}

/// Called with every notification payload received on a subscription.
pub type DataHandler = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Called once when the radio reports that a link went down.
pub type DisconnectHandler = Arc<dyn Fn() + Send + Sync>;

/// Scans for and opens links to nearby peers.
///
/// Methods return `Send` futures so the connection manager can drive them
/// from spawned Tokio tasks.
pub trait Radio: Send + Sync + 'static {
    /// The link type produced by this radio.
    type Link: Link;

    /// Lists peers advertising `service`, scanning for at most `timeout`.
    fn discover(
        &self,
        service: &CapabilityId,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<DiscoveredPeer>, TransportError>> + Send;

    /// Opens a link to `peer`.
    ///
    /// `on_disconnect` is registered for the lifetime of the returned link
    /// and fires when the radio (not the caller) tears it down.
    fn connect(
        &self,
        peer: &DiscoveredPeer,
        timeout: Duration,
        on_disconnect: DisconnectHandler,
    ) -> impl Future<Output = Result<Self::Link, TransportError>> + Send;
}

/// An open link to a single peer.
pub trait Link: Send + Sync + 'static {
    /// The peer at the other end.
    fn peer_id(&self) -> &PeerId;

    /// Enumerates the capabilities (characteristics) the peer exposes.
    fn capabilities(
        &self,
    ) -> impl Future<Output = Result<HashSet<CapabilityId>, TransportError>> + Send;

    /// Subscribes to notifications on `capability`.
    fn subscribe(
        &self,
        capability: &CapabilityId,
        on_data: DataHandler,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Writes `data` to `capability`. `ack` requests a write-with-response.
    fn write(
        &self,
        capability: &CapabilityId,
        data: &[u8],
        ack: bool,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Closes the link. Closing an already-closed link is not an error.
    fn disconnect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

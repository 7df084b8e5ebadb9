//! Simulated radio: an in-memory [`Radio`] whose peers are scripted.
//!
//! Every peer is described by a [`SimPeer`] profile: what it advertises,
//! which characteristics it exposes, how it answers connect requests and
//! whether writes to it succeed. Tests and the demo drive the "other side"
//! through [`SimRadio`]'s control methods (`notify`, `drop_link`, ...).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::{
    CHAT_CHARACTERISTIC, CHAT_SERVICE, CapabilityId, DataHandler,
    DisconnectHandler, DiscoveredPeer, Link, PeerId, Radio, TransportError,
};

/// Counter for generating unique link sessions.
static NEXT_SESSION: AtomicU64 = AtomicU64::new(1);

/// How a simulated peer answers a connect request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Accept immediately.
    Accept,
    /// Accept after the given delay.
    AcceptAfter(Duration),
    /// Fail right away with [`TransportError::ConnectFailed`].
    Refuse,
    /// Never answer. Only the caller's timeout ends the attempt.
    Hang,
}

/// Scripted profile of one simulated peer.
#[derive(Debug, Clone)]
pub struct SimPeer {
    /// Advertised local name.
    pub name: Option<String>,
    /// Services included in advertisements (used by discovery filtering).
    pub services: HashSet<CapabilityId>,
    /// Characteristics exposed once connected.
    pub capabilities: HashSet<CapabilityId>,
    /// Connect behavior.
    pub connect: ConnectBehavior,
    /// When `true`, every write fails.
    pub fail_writes: bool,
    /// How long listing capabilities takes.
    pub capabilities_delay: Duration,
    /// How long closing a link takes.
    pub disconnect_delay: Duration,
}

impl SimPeer {
    /// A well-behaved chat peer.
    pub fn chat(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            services: HashSet::from([CHAT_SERVICE]),
            capabilities: HashSet::from([CHAT_CHARACTERISTIC]),
            connect: ConnectBehavior::Accept,
            fail_writes: false,
            capabilities_delay: Duration::ZERO,
            disconnect_delay: Duration::ZERO,
        }
    }

    /// A device that advertises the chat service but does not expose the
    /// chat characteristic once connected.
    pub fn impostor(name: &str) -> Self {
        Self {
            capabilities: HashSet::new(),
            ..Self::chat(name)
        }
    }

    pub fn with_connect(mut self, behavior: ConnectBehavior) -> Self {
        self.connect = behavior;
        self
    }

    pub fn with_failing_writes(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    /// Makes service discovery on an open link take `delay`.
    pub fn with_slow_capabilities(mut self, delay: Duration) -> Self {
        self.capabilities_delay = delay;
        self
    }

    /// Makes closing a link take `delay`.
    pub fn with_slow_disconnect(mut self, delay: Duration) -> Self {
        self.disconnect_delay = delay;
        self
    }
}

struct OpenLink {
    session: u64,
    on_disconnect: DisconnectHandler,
    subscriptions: HashMap<CapabilityId, DataHandler>,
}

struct PeerSlot {
    profile: SimPeer,
    connect_attempts: u32,
    link: Option<OpenLink>,
    written: Vec<Vec<u8>>,
}

impl PeerSlot {
    fn open_link(&self, session: u64) -> Result<&OpenLink, TransportError> {
        match &self.link {
            Some(link) if link.session == session => Ok(link),
            _ => Err(TransportError::ConnectionClosed("link is closed".into())),
        }
    }
}

#[derive(Default)]
struct Air {
    peers: Mutex<HashMap<PeerId, PeerSlot>>,
    discovery_error: Mutex<Option<TransportError>>,
}

impl Air {
    fn peers(&self) -> MutexGuard<'_, HashMap<PeerId, PeerSlot>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A scriptable in-memory [`Radio`].
///
/// Cloning is cheap; all clones share the same simulated airspace.
#[derive(Clone, Default)]
pub struct SimRadio {
    air: Arc<Air>,
}

impl SimRadio {
    /// Creates an empty airspace.
    pub fn new() -> Self {
        Self::default()
    }

    /// Brings a peer into range (or replaces its profile).
    pub fn add_peer(&self, id: impl Into<PeerId>, profile: SimPeer) {
        let id = id.into();
        let mut peers = self.air.peers();
        match peers.get_mut(&id) {
            Some(slot) => slot.profile = profile,
            None => {
                peers.insert(
                    id,
                    PeerSlot {
                        profile,
                        connect_attempts: 0,
                        link: None,
                        written: Vec::new(),
                    },
                );
            }
        }
    }

    /// Takes a peer out of range. An open link drops as if the radio lost it.
    pub fn remove_peer(&self, id: &PeerId) -> bool {
        let slot = self.air.peers().remove(id);
        match slot {
            Some(slot) => {
                if let Some(link) = slot.link {
                    (link.on_disconnect)();
                }
                true
            }
            None => false,
        }
    }

    /// Changes how a peer answers future connect requests.
    pub fn set_connect(&self, id: &PeerId, behavior: ConnectBehavior) {
        if let Some(slot) = self.air.peers().get_mut(id) {
            slot.profile.connect = behavior;
        }
    }

    /// Makes future writes to a peer fail (or succeed again).
    pub fn set_fail_writes(&self, id: &PeerId, fail: bool) {
        if let Some(slot) = self.air.peers().get_mut(id) {
            slot.profile.fail_writes = fail;
        }
    }

    /// Makes the next discovery sweep fail with `error`.
    pub fn fail_next_discovery(&self, error: TransportError) {
        *self
            .air
            .discovery_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(error);
    }

    /// Number of connect requests the peer has received.
    pub fn connect_attempts(&self, id: &PeerId) -> u32 {
        self.air
            .peers()
            .get(id)
            .map_or(0, |slot| slot.connect_attempts)
    }

    /// Returns `true` if a link to the peer is currently open.
    pub fn is_connected(&self, id: &PeerId) -> bool {
        self.air
            .peers()
            .get(id)
            .is_some_and(|slot| slot.link.is_some())
    }

    /// Every payload successfully written to the peer, oldest first.
    pub fn written(&self, id: &PeerId) -> Vec<Vec<u8>> {
        self.air
            .peers()
            .get(id)
            .map(|slot| slot.written.clone())
            .unwrap_or_default()
    }

    /// Delivers a notification from the peer on the chat characteristic.
    ///
    /// Returns `false` if nobody is subscribed.
    pub fn notify(&self, id: &PeerId, data: &[u8]) -> bool {
        let handler = self
            .air
            .peers()
            .get(id)
            .and_then(|slot| slot.link.as_ref())
            .and_then(|link| link.subscriptions.get(&CHAT_CHARACTERISTIC))
            .cloned();
        match handler {
            Some(handler) => {
                handler(data.to_vec());
                true
            }
            None => false,
        }
    }

    /// Drops the peer's link from the radio side, firing its disconnect
    /// handler. The peer stays in range.
    pub fn drop_link(&self, id: &PeerId) -> bool {
        let link = self
            .air
            .peers()
            .get_mut(id)
            .and_then(|slot| slot.link.take());
        match link {
            Some(link) => {
                (link.on_disconnect)();
                true
            }
            None => false,
        }
    }
}

impl Radio for SimRadio {
    type Link = SimLink;

    async fn discover(
        &self,
        service: &CapabilityId,
        _timeout: Duration,
    ) -> Result<Vec<DiscoveredPeer>, TransportError> {
        let injected = self
            .air
            .discovery_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(error) = injected {
            return Err(error);
        }

        let mut found: Vec<DiscoveredPeer> = self
            .air
            .peers()
            .iter()
            .filter(|(_, slot)| slot.profile.services.contains(service))
            .map(|(id, slot)| {
                DiscoveredPeer::new(id.clone(), slot.profile.name.clone())
            })
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(found)
    }

    async fn connect(
        &self,
        peer: &DiscoveredPeer,
        _timeout: Duration,
        on_disconnect: DisconnectHandler,
    ) -> Result<SimLink, TransportError> {
        let behavior = {
            let mut peers = self.air.peers();
            let slot = peers.get_mut(&peer.id).ok_or_else(|| {
                TransportError::ConnectFailed(format!(
                    "{} is out of range",
                    peer.id
                ))
            })?;
            slot.connect_attempts += 1;
            slot.profile.connect.clone()
        };

        match behavior {
            ConnectBehavior::Accept => {}
            ConnectBehavior::AcceptAfter(delay) => tokio::time::sleep(delay).await,
            ConnectBehavior::Refuse => {
                return Err(TransportError::ConnectFailed(
                    "peer refused connection".into(),
                ));
            }
            ConnectBehavior::Hang => std::future::pending::<()>().await,
        }

        let session = NEXT_SESSION.fetch_add(1, Ordering::Relaxed);
        {
            let mut peers = self.air.peers();
            let slot = peers.get_mut(&peer.id).ok_or_else(|| {
                TransportError::ConnectFailed(format!(
                    "{} went out of range",
                    peer.id
                ))
            })?;
            slot.link = Some(OpenLink {
                session,
                on_disconnect,
                subscriptions: HashMap::new(),
            });
        }
        tracing::debug!(peer_id = %peer.id, session, "simulated link opened");

        Ok(SimLink {
            peer_id: peer.id.clone(),
            session,
            air: Arc::clone(&self.air),
        })
    }
}

/// A link produced by [`SimRadio`].
pub struct SimLink {
    peer_id: PeerId,
    session: u64,
    air: Arc<Air>,
}

impl SimLink {
    fn closed(&self) -> TransportError {
        TransportError::ConnectionClosed(format!("{} is gone", self.peer_id))
    }

    /// Sleeps for the profile delay picked by `pick`, without holding the
    /// airspace lock.
    async fn lag(&self, pick: impl FnOnce(&SimPeer) -> Duration) {
        let delay = self
            .air
            .peers()
            .get(&self.peer_id)
            .map_or(Duration::ZERO, |slot| pick(&slot.profile));
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Link for SimLink {
    fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    async fn capabilities(
        &self,
    ) -> Result<HashSet<CapabilityId>, TransportError> {
        self.lag(|profile| profile.capabilities_delay).await;
        let peers = self.air.peers();
        let slot = peers.get(&self.peer_id).ok_or_else(|| self.closed())?;
        slot.open_link(self.session)?;
        Ok(slot.profile.capabilities.clone())
    }

    async fn subscribe(
        &self,
        capability: &CapabilityId,
        on_data: DataHandler,
    ) -> Result<(), TransportError> {
        let mut peers = self.air.peers();
        let slot = peers.get_mut(&self.peer_id).ok_or_else(|| self.closed())?;
        slot.open_link(self.session)?;
        if !slot.profile.capabilities.contains(capability) {
            return Err(TransportError::Unsupported(capability.to_string()));
        }
        if let Some(link) = slot.link.as_mut() {
            link.subscriptions.insert(capability.clone(), on_data);
        }
        Ok(())
    }

    async fn write(
        &self,
        capability: &CapabilityId,
        data: &[u8],
        _ack: bool,
    ) -> Result<(), TransportError> {
        let mut peers = self.air.peers();
        let slot = peers.get_mut(&self.peer_id).ok_or_else(|| self.closed())?;
        slot.open_link(self.session)?;
        if !slot.profile.capabilities.contains(capability) {
            return Err(TransportError::Unsupported(capability.to_string()));
        }
        if slot.profile.fail_writes {
            return Err(TransportError::WriteFailed(
                "simulated write failure".into(),
            ));
        }
        slot.written.push(data.to_vec());
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.lag(|profile| profile.disconnect_delay).await;
        let mut peers = self.air.peers();
        if let Some(slot) = peers.get_mut(&self.peer_id) {
            if slot.open_link(self.session).is_ok() {
                slot.link = None;
                tracing::debug!(
                    peer_id = %self.peer_id,
                    session = self.session,
                    "simulated link closed"
                );
            }
        }
        Ok(())
    }
}

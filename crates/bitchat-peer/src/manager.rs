//! The peer connection manager.
//!
//! [`PeerManager`] owns the [`ConnectionTable`] and every task that touches
//! it:
//!
//! - a **discovery loop** that sweeps for peers every `scan_interval` and
//!   spawns one attempt task per new peer,
//! - **attempt tasks** that connect, validate and subscribe, retrying
//!   transient failures per the [`RetryPolicy`](crate::RetryPolicy),
//! - a **lifecycle loop** that turns radio disconnect callbacks and
//!   goodbyes from peers into table removals,
//! - an **inbound loop** that decodes notification frames (see
//!   the `inbound` module).
//!
//! Radio callbacks never touch the table. They push into unbounded
//! channels and return; the loops above do the rest.
//!
//! Attempts are never aborted. Each one watches its own cancel signal and,
//! when it fires, closes whatever link it holds before it returns.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};
use std::time::Duration;

use bitchat_protocol::{Packet, PacketType, PayloadCodec};
use bitchat_transport::{
    DataHandler, DisconnectHandler, DiscoveredPeer, Link, PeerId, Radio, TransportError,
};
use futures_util::future::join_all;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::inbound::{InboundFrame, inbound_loop};
use crate::{
    ChatEvent, ConnectionTable, Dispatcher, LocalIdentity, PeerConfig, PeerConnection, PeerError,
    PeerState, PeerSummary,
};

/// What [`PeerManager::shutdown`] did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Peers whose links were closed.
    pub disconnected: Vec<PeerId>,
    /// Peers whose links did not close within `disconnect_timeout`.
    pub timed_out: Vec<PeerId>,
    /// Connect attempts that were still running and got cancelled.
    pub cancelled_attempts: usize,
}

/// A request to tear a peer down, queued for the lifecycle loop.
#[derive(Debug)]
pub(crate) struct Teardown {
    pub(crate) peer_id: PeerId,
    pub(crate) origin: Origin,
}

/// Who asked for a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    /// The application (or a `Leave` packet). The link is closed by us.
    Local,
    /// The radio's disconnect callback for one attempt. The link is
    /// already down.
    Radio { generation: u64 },
}

struct Attempt {
    generation: u64,
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Attempt {
    /// Signals the attempt to stop and returns its task, which finishes
    /// once any link it acquired is closed.
    fn cancel(self) -> JoinHandle<()> {
        self.cancel.send_replace(true);
        self.task
    }
}

#[derive(Default)]
struct Tasks {
    discovery: Option<JoinHandle<()>>,
    lifecycle: Option<JoinHandle<()>>,
    inbound: Option<JoinHandle<()>>,
}

struct Receivers {
    frames: mpsc::UnboundedReceiver<InboundFrame>,
    teardown: mpsc::UnboundedReceiver<Teardown>,
}

/// State shared by the manager, its tasks and its dispatchers.
pub(crate) struct Shared<R: Radio, C> {
    pub(crate) radio: R,
    pub(crate) codec: C,
    pub(crate) config: PeerConfig,
    pub(crate) identity: LocalIdentity,
    pub(crate) table: Mutex<ConnectionTable<R::Link>>,
    attempts: StdMutex<HashMap<PeerId, Attempt>>,
    events: mpsc::UnboundedSender<ChatEvent>,
    frames: mpsc::UnboundedSender<InboundFrame>,
    teardown: mpsc::UnboundedSender<Teardown>,
    shutdown: watch::Sender<bool>,
}

/// Discovers, connects to and supervises nearby peers.
///
/// ```rust,no_run
/// use bitchat_peer::{LocalIdentity, PeerConfig, PeerManager};
/// use bitchat_protocol::{DelimitedCodec, NodeId};
/// use bitchat_transport::SimRadio;
///
/// # async fn demo() {
/// let identity = LocalIdentity::new(NodeId::random(), "alice");
/// let (manager, mut events) =
///     PeerManager::new(SimRadio::new(), PeerConfig::default(), identity, DelimitedCodec);
/// manager.start();
///
/// while let Some(event) = events.recv().await {
///     println!("{event:?}");
/// }
/// # }
/// ```
pub struct PeerManager<R: Radio, C: PayloadCodec> {
    shared: Arc<Shared<R, C>>,
    tasks: StdMutex<Tasks>,
    receivers: StdMutex<Option<Receivers>>,
}

impl<R: Radio, C: PayloadCodec> PeerManager<R, C> {
    /// Creates a stopped manager and the channel its events arrive on.
    ///
    /// Nothing runs until [`start`](Self::start) is called.
    pub fn new(
        radio: R,
        config: PeerConfig,
        identity: LocalIdentity,
        codec: C,
    ) -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (frames, frames_rx) = mpsc::unbounded_channel();
        let (teardown, teardown_rx) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);

        let shared = Arc::new(Shared {
            radio,
            codec,
            config: config.validated(),
            identity,
            table: Mutex::new(ConnectionTable::new()),
            attempts: StdMutex::new(HashMap::new()),
            events,
            frames,
            teardown,
            shutdown,
        });
        let manager = Self {
            shared,
            tasks: StdMutex::new(Tasks::default()),
            receivers: StdMutex::new(Some(Receivers {
                frames: frames_rx,
                teardown: teardown_rx,
            })),
        };
        (manager, events_rx)
    }

    /// Spawns the discovery, lifecycle and inbound loops.
    ///
    /// Must be called from within a Tokio runtime. Calling it twice is a
    /// no-op.
    pub fn start(&self) {
        self.spawn_loops(true);
    }

    /// Like [`start`](Self::start) but without the periodic discovery loop;
    /// peers are only found when [`sweep`](Self::sweep) is called.
    pub fn start_without_discovery(&self) {
        self.spawn_loops(false);
    }

    fn spawn_loops(&self, with_discovery: bool) {
        let Some(receivers) = lock(&self.receivers).take() else {
            tracing::warn!("peer manager already started");
            return;
        };
        let mut tasks = lock(&self.tasks);
        tasks.lifecycle = Some(tokio::spawn(lifecycle_loop(
            Arc::clone(&self.shared),
            receivers.teardown,
        )));
        tasks.inbound = Some(tokio::spawn(inbound_loop(
            Arc::clone(&self.shared),
            receivers.frames,
        )));
        if with_discovery {
            tasks.discovery = Some(tokio::spawn(discovery_loop(Arc::clone(&self.shared))));
        }
        tracing::info!(with_discovery, "peer manager started");
    }

    /// Runs one discovery sweep now and returns how many new attempts it
    /// started. Attempts run in the background.
    ///
    /// # Errors
    /// [`PeerError::ShuttingDown`] after shutdown, or the radio's discovery
    /// error.
    pub async fn sweep(&self) -> Result<usize, PeerError> {
        sweep(&self.shared).await
    }

    /// Starts a connect attempt for one peer without scanning.
    ///
    /// # Errors
    /// [`PeerError::AlreadyActive`] if the peer is connecting or connected,
    /// [`PeerError::ShuttingDown`] after shutdown.
    pub async fn connect(&self, peer: DiscoveredPeer) -> Result<(), PeerError> {
        begin_attempt(&self.shared, peer).await
    }

    /// Disconnects a peer: cancels any running attempt, forgets the record
    /// and closes the link. Returns `false` if there was nothing to do, so
    /// calling it twice is harmless.
    pub async fn disconnect(&self, peer_id: &PeerId) -> bool {
        self.shared.disconnect(peer_id, Origin::Local).await
    }

    /// A handle for writing to every connected peer.
    pub fn dispatcher(&self) -> Dispatcher<R, C> {
        Dispatcher::new(Arc::clone(&self.shared))
    }

    pub async fn peer_state(&self, peer_id: &PeerId) -> Option<PeerState> {
        self.shared.table.lock().await.state(peer_id)
    }

    /// Failed attempts recorded for the peer's current generation. `None`
    /// once the record is gone.
    pub async fn retry_count(&self, peer_id: &PeerId) -> Option<u32> {
        self.shared
            .table
            .lock()
            .await
            .get(peer_id)
            .map(|conn| conn.retries())
    }

    /// `(peer id, nickname)` of every connected peer.
    pub async fn connected_peers(&self) -> Vec<(PeerId, String)> {
        self.shared.table.lock().await.connected_peers()
    }

    /// Every peer that is connecting or connected.
    pub async fn peers(&self) -> Vec<PeerSummary> {
        self.shared.table.lock().await.summaries()
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.shared.identity
    }

    pub fn config(&self) -> &PeerConfig {
        &self.shared.config
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.is_stopping()
    }

    /// Stops everything in order: discovery, pending attempts (each closes
    /// the link it holds), connected links (closed concurrently, each
    /// within `disconnect_timeout`), then the lifecycle and inbound loops.
    /// A `PeerLeft` event is emitted for every peer that was connected.
    ///
    /// A second call returns an empty report.
    pub async fn shutdown(&self) -> ShutdownReport {
        if self.shared.shutdown.send_replace(true) {
            return ShutdownReport::default();
        }
        tracing::info!("peer manager shutting down");

        let discovery = lock(&self.tasks).discovery.take();
        if let Some(task) = discovery {
            task.abort();
            let _ = task.await;
        }

        let attempts: Vec<JoinHandle<()>> = lock(&self.shared.attempts)
            .drain()
            .map(|(_, attempt)| attempt.cancel())
            .collect();
        let mut report = ShutdownReport {
            cancelled_attempts: attempts.len(),
            ..ShutdownReport::default()
        };
        join_all(attempts).await;

        let records = self.shared.table.lock().await.drain();
        let limit = self.shared.config.disconnect_timeout;
        let closing = records
            .into_iter()
            .filter(PeerConnection::had_joined)
            .map(|conn| async move {
                let outcome = match conn.link() {
                    Some(link) => tokio::time::timeout(limit, link.disconnect()).await,
                    None => Ok(Ok(())),
                };
                (conn, outcome)
            });
        for (conn, outcome) in join_all(closing).await {
            let peer_id = conn.peer_id().clone();
            match outcome {
                Ok(Ok(())) => report.disconnected.push(peer_id.clone()),
                Ok(Err(e)) => {
                    tracing::warn!(%peer_id, error = %e, "disconnect failed during shutdown");
                    report.disconnected.push(peer_id.clone());
                }
                Err(_) => {
                    tracing::warn!(%peer_id, "disconnect timed out during shutdown");
                    report.timed_out.push(peer_id.clone());
                }
            }
            self.shared.emit(ChatEvent::PeerLeft { peer_id });
            self.shared
                .system(format!("{} has disconnected.", conn.nickname()));
        }

        // The lifecycle loop finishes the teardown it is running, if any,
        // and then stops on its own. Inbound frames are simply dropped.
        let (lifecycle, inbound) = {
            let mut tasks = lock(&self.tasks);
            (tasks.lifecycle.take(), tasks.inbound.take())
        };
        if let Some(task) = lifecycle {
            let _ = task.await;
        }
        if let Some(task) = inbound {
            task.abort();
            let _ = task.await;
        }

        tracing::info!(
            disconnected = report.disconnected.len(),
            timed_out = report.timed_out.len(),
            cancelled = report.cancelled_attempts,
            "peer manager stopped"
        );
        report
    }
}

impl<R: Radio, C> Shared<R, C> {
    pub(crate) fn emit(&self, event: ChatEvent) {
        // The receiver going away only means nobody is listening any more.
        let _ = self.events.send(event);
    }

    pub(crate) fn system(&self, text: impl Into<String>) {
        self.emit(ChatEvent::System(text.into()));
    }

    pub(crate) fn is_stopping(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Queues a teardown for the lifecycle loop instead of running it on
    /// the caller's task.
    pub(crate) fn request_teardown(&self, peer_id: PeerId, origin: Origin) {
        let _ = self.teardown.send(Teardown { peer_id, origin });
    }

    /// Removes a finished or cancelled attempt, if it is still the one
    /// registered for `generation`.
    fn take_attempt(&self, peer_id: &PeerId, generation: u64) -> Option<Attempt> {
        let mut attempts = lock(&self.attempts);
        match attempts.get(peer_id) {
            Some(attempt) if attempt.generation == generation => attempts.remove(peer_id),
            _ => None,
        }
    }

    /// Tears a peer down. See [`PeerManager::disconnect`].
    pub(crate) async fn disconnect(&self, peer_id: &PeerId, origin: Origin) -> bool {
        let removed = {
            let mut table = self.table.lock().await;
            let removed = match origin {
                Origin::Local => table.remove(peer_id),
                Origin::Radio { generation } => table.remove_generation(peer_id, generation),
            };
            // Emitted under the lock so a join racing this removal cannot
            // be reported after it.
            if let Some(conn) = removed.as_ref().filter(|conn| conn.had_joined()) {
                self.emit(ChatEvent::PeerLeft {
                    peer_id: peer_id.clone(),
                });
                self.system(format!("{} has disconnected.", conn.nickname()));
            }
            removed
        };
        let Some(conn) = removed else {
            tracing::debug!(%peer_id, ?origin, "disconnect ignored, no matching record");
            return false;
        };

        if let Some(attempt) = self.take_attempt(peer_id, conn.generation()) {
            let _ = attempt.cancel().await;
        }
        if origin == Origin::Local {
            if let Some(link) = conn.link() {
                release(link.as_ref(), self.config.disconnect_timeout).await;
            }
        }

        if conn.had_joined() {
            tracing::info!(%peer_id, ?origin, "peer disconnected");
        } else {
            tracing::debug!(%peer_id, ?origin, "attempt called off before joining");
        }
        true
    }
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Runs a radio operation with a time budget; overrunning it is a
/// [`TransportError::Timeout`].
pub(crate) async fn bounded<T>(
    limit: Duration,
    operation: impl Future<Output = Result<T, TransportError>>,
) -> Result<T, TransportError> {
    tokio::time::timeout(limit, operation)
        .await
        .unwrap_or(Err(TransportError::Timeout))
}

/// Best-effort link close.
async fn release<L: Link>(link: &L, limit: Duration) {
    if let Err(e) = bounded(limit, link.disconnect()).await {
        tracing::debug!(peer_id = %link.peer_id(), error = %e, "link close failed");
    }
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

async fn discovery_loop<R: Radio, C: PayloadCodec>(shared: Arc<Shared<R, C>>) {
    let mut shutdown = shared.shutdown.subscribe();
    let mut ticker = tokio::time::interval(shared.config.scan_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.wait_for(|stopping| *stopping) => break,
        }
        match sweep(&shared).await {
            Ok(started) => tracing::debug!(started, "discovery sweep finished"),
            Err(PeerError::ShuttingDown) => break,
            Err(e) => {
                tracing::warn!(error = %e, "discovery sweep failed");
                shared.system(format!("[ERROR] Scan failed: {e}"));
            }
        }
    }
    tracing::debug!("discovery loop stopped");
}

async fn sweep<R: Radio, C: PayloadCodec>(shared: &Arc<Shared<R, C>>) -> Result<usize, PeerError> {
    if shared.is_stopping() {
        return Err(PeerError::ShuttingDown);
    }
    let scan = shared.config.scan_timeout;
    let found = bounded(
        scan.saturating_mul(2),
        shared.radio.discover(&shared.config.service, scan),
    )
    .await?;

    let mut started = 0;
    for peer in found {
        let peer_id = peer.id.clone();
        match begin_attempt(shared, peer).await {
            Ok(()) => started += 1,
            Err(PeerError::AlreadyActive(_)) => {
                tracing::trace!(%peer_id, "already connecting or connected");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(started)
}

// ---------------------------------------------------------------------------
// Connect attempts
// ---------------------------------------------------------------------------

async fn begin_attempt<R: Radio, C: PayloadCodec>(
    shared: &Arc<Shared<R, C>>,
    peer: DiscoveredPeer,
) -> Result<(), PeerError> {
    if shared.is_stopping() {
        return Err(PeerError::ShuttingDown);
    }
    let generation = shared.table.lock().await.begin_attempt(&peer)?;
    tracing::info!(peer_id = %peer.id, generation, "connecting");

    // Registered under the lock so the task cannot finish and deregister
    // before it has been recorded. Shutdown drains this map after raising
    // its flag, so checking the flag here means no attempt is missed.
    let mut attempts = lock(&shared.attempts);
    if shared.is_stopping() {
        return Err(PeerError::ShuttingDown);
    }
    let peer_id = peer.id.clone();
    let (cancel, cancelled) = watch::channel(false);
    let task = tokio::spawn(run_attempt(Arc::clone(shared), peer, generation, cancelled));
    let attempt = Attempt {
        generation,
        cancel,
        task,
    };
    if let Some(previous) = attempts.insert(peer_id, attempt) {
        // A finished attempt that has not deregistered yet.
        previous.cancel.send_replace(true);
    }
    Ok(())
}

async fn run_attempt<R: Radio, C: PayloadCodec>(
    shared: Arc<Shared<R, C>>,
    peer: DiscoveredPeer,
    generation: u64,
    mut cancelled: watch::Receiver<bool>,
) {
    drive_attempt(&shared, &peer, generation, &mut cancelled).await;
    shared.take_attempt(&peer.id, generation);
}

/// Tries up to `retry.max_attempts` times, then leaves the record
/// `Connected` or removes it as failed. Returns early, with no link left
/// open, once `cancelled` fires.
async fn drive_attempt<R: Radio, C: PayloadCodec>(
    shared: &Shared<R, C>,
    peer: &DiscoveredPeer,
    generation: u64,
    cancelled: &mut watch::Receiver<bool>,
) {
    let policy = &shared.config.retry;
    let mut attempt = 0;

    let failure = loop {
        attempt += 1;
        tracing::debug!(peer_id = %peer.id, generation, attempt, "connect attempt");

        let error = match establish(shared, peer, generation, cancelled).await {
            Ok(link) => return join(shared, &peer.id, generation, link).await,
            Err(PeerError::NotFound(_) | PeerError::Cancelled(_)) => {
                tracing::debug!(peer_id = %peer.id, generation, "attempt called off");
                return;
            }
            Err(e) => e,
        };
        if !error.is_retryable() {
            break error;
        }
        let Some(retries) = shared.table.lock().await.record_failure(&peer.id, generation) else {
            return;
        };
        if !policy.allows_another(attempt) {
            break error;
        }

        tracing::debug!(peer_id = %peer.id, attempt, retries, error = %error, "connect failed, will retry");
        shared.system(format!(
            "Connection to {} failed ({error}); retrying ({attempt}/{})",
            peer.id, policy.max_attempts
        ));
        if !policy.wait(attempt, cancelled).await {
            return;
        }
    };

    let failed = shared.table.lock().await.mark_failed(&peer.id, generation);
    if failed.is_some() {
        tracing::warn!(peer_id = %peer.id, attempts = attempt, error = %failure, "giving up on peer");
        shared.system(format!("[ERROR] Could not connect to {}: {failure}", peer.id));
    }
}

/// Races `operation` against the attempt's cancel signal. A dropped
/// sender counts as cancelled.
async fn cancellable<T, E>(
    cancelled: &mut watch::Receiver<bool>,
    peer_id: &PeerId,
    operation: impl Future<Output = Result<T, E>>,
) -> Result<T, PeerError>
where
    PeerError: From<E>,
{
    tokio::select! {
        biased;
        _ = cancelled.wait_for(|stop| *stop) => Err(PeerError::Cancelled(peer_id.clone())),
        result = operation => Ok(result?),
    }
}

/// One connect-and-validate pass. Any link acquired here is closed again
/// before an error is returned, cancellation included.
async fn establish<R: Radio, C>(
    shared: &Shared<R, C>,
    peer: &DiscoveredPeer,
    generation: u64,
    cancelled: &mut watch::Receiver<bool>,
) -> Result<R::Link, PeerError> {
    let config = &shared.config;
    let on_disconnect: DisconnectHandler = {
        let teardown = shared.teardown.clone();
        let peer_id = peer.id.clone();
        Arc::new(move || {
            let _ = teardown.send(Teardown {
                peer_id: peer_id.clone(),
                origin: Origin::Radio { generation },
            });
        })
    };

    let connecting = bounded(
        config.connect_timeout,
        shared.radio.connect(peer, config.connect_timeout, on_disconnect),
    );
    let link = cancellable(cancelled, &peer.id, connecting).await?;

    let validating = shared.table.lock().await.mark_validating(&peer.id, generation);
    if !validating {
        release(&link, config.disconnect_timeout).await;
        return Err(PeerError::NotFound(peer.id.clone()));
    }
    if let Err(e) = cancellable(cancelled, &peer.id, validate(shared, &link)).await {
        release(&link, config.disconnect_timeout).await;
        return Err(e);
    }
    Ok(link)
}

/// Checks for the chat characteristic and subscribes to it.
async fn validate<R: Radio, C>(shared: &Shared<R, C>, link: &R::Link) -> Result<(), PeerError> {
    let config = &shared.config;
    let capabilities = bounded(config.connect_timeout, link.capabilities()).await?;
    if !capabilities.contains(&config.chat_characteristic) {
        return Err(PeerError::MissingCapability(link.peer_id().clone()));
    }

    let on_data: DataHandler = {
        let frames = shared.frames.clone();
        let peer_id = link.peer_id().clone();
        Arc::new(move |data| {
            let _ = frames.send(InboundFrame {
                peer_id: peer_id.clone(),
                data,
            });
        })
    };
    bounded(
        config.connect_timeout,
        link.subscribe(&config.chat_characteristic, on_data),
    )
    .await?;
    Ok(())
}

/// Publishes a validated link and announces ourselves on it.
async fn join<R: Radio, C>(shared: &Shared<R, C>, peer_id: &PeerId, generation: u64, link: R::Link) {
    let link = Arc::new(link);
    {
        let mut table = shared.table.lock().await;
        match table.mark_connected(peer_id, generation, Arc::clone(&link)) {
            Ok(nickname) => {
                // Emitted under the lock; see `Shared::disconnect`.
                tracing::info!(%peer_id, %nickname, generation, "peer connected");
                shared.emit(ChatEvent::PeerJoined {
                    peer_id: peer_id.clone(),
                    nickname: nickname.clone(),
                });
                shared.system(format!("{nickname} ({peer_id}) has connected."));
            }
            Err(e) => {
                drop(table);
                tracing::debug!(%peer_id, generation, error = %e, "attempt superseded before joining");
                release(link.as_ref(), shared.config.disconnect_timeout).await;
                return;
            }
        }
    }

    if shared.config.announce_on_connect {
        announce(shared, link.as_ref()).await;
    }
}

async fn announce<R: Radio, C>(shared: &Shared<R, C>, link: &R::Link) {
    let packet = Packet::broadcast(
        PacketType::Announce,
        shared.identity.node_id,
        shared.identity.nickname.as_bytes().to_vec(),
    );
    let frame = match packet.encode() {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(error = %e, "cannot encode announce");
            return;
        }
    };
    let written = bounded(
        shared.config.write_timeout,
        link.write(&shared.config.chat_characteristic, &frame, false),
    )
    .await;
    if let Err(e) = written {
        tracing::debug!(peer_id = %link.peer_id(), error = %e, "announce not delivered");
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Runs queued teardowns one at a time until shutdown. A teardown is never
/// interrupted halfway, so the link it is closing does get closed.
async fn lifecycle_loop<R: Radio, C>(
    shared: Arc<Shared<R, C>>,
    mut requests: mpsc::UnboundedReceiver<Teardown>,
) {
    let mut shutdown = shared.shutdown.subscribe();
    loop {
        let request = tokio::select! {
            biased;
            request = requests.recv() => request,
            _ = shutdown.wait_for(|stopping| *stopping) => None,
        };
        let Some(Teardown { peer_id, origin }) = request else {
            break;
        };
        tracing::debug!(%peer_id, ?origin, "teardown requested");
        shared.disconnect(&peer_id, origin).await;
    }
    tracing::debug!("lifecycle loop stopped");
}

#[cfg(test)]
mod tests {
    use bitchat_protocol::{DelimitedCodec, NodeId};
    use bitchat_transport::{SimPeer, SimRadio};

    use super::*;

    fn manager(radio: &SimRadio) -> (PeerManager<SimRadio, DelimitedCodec>, mpsc::UnboundedReceiver<ChatEvent>) {
        let config = PeerConfig {
            announce_on_connect: false,
            ..PeerConfig::default()
        };
        let identity = LocalIdentity::new(NodeId([1; 8]), "me");
        PeerManager::new(radio.clone(), config, identity, DelimitedCodec)
    }

    /// With the clock paused, sleeping lets every runnable task finish first.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_stale_generation_is_ignored() {
        let radio = SimRadio::new();
        radio.add_peer("a", SimPeer::chat("alice"));
        let (manager, _events) = manager(&radio);
        manager.start_without_discovery();
        manager.sweep().await.unwrap();
        settle().await;
        let peer_id = PeerId::from("a");
        let generation = manager
            .shared
            .table
            .lock()
            .await
            .get(&peer_id)
            .unwrap()
            .generation();

        manager.shared.request_teardown(
            peer_id.clone(),
            Origin::Radio {
                generation: generation - 1,
            },
        );
        settle().await;

        assert_eq!(manager.peer_state(&peer_id).await, Some(PeerState::Connected));
        assert!(radio.is_connected(&peer_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_handle_is_released_after_connect() {
        let radio = SimRadio::new();
        radio.add_peer("a", SimPeer::chat("alice"));
        let (manager, _events) = manager(&radio);

        manager.sweep().await.unwrap();
        settle().await;

        assert!(lock(&manager.shared.attempts).is_empty());
        assert_eq!(manager.peer_state(&PeerId::from("a")).await, Some(PeerState::Connected));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_twice_returns_empty_report() {
        let radio = SimRadio::new();
        radio.add_peer("a", SimPeer::chat("alice"));
        let (manager, _events) = manager(&radio);
        manager.start_without_discovery();
        manager.sweep().await.unwrap();
        settle().await;

        let first = manager.shutdown().await;
        let second = manager.shutdown().await;

        assert_eq!(first.disconnected, vec![PeerId::from("a")]);
        assert_eq!(second, ShutdownReport::default());
        assert!(matches!(manager.sweep().await, Err(PeerError::ShuttingDown)));
    }
}

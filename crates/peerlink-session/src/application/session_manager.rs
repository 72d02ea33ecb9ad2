//! Connection Session Manager: the host/client link state machine.
//!
//! One [`SessionManager`] owns at most one transport session.  In **host**
//! role the session accepts any number of inbound connections; in **client**
//! role it holds a single outbound uplink to the host and rebuilds the whole
//! session after a fixed delay whenever that uplink (or the session) fails.
//!
//! # Architecture
//!
//! ```text
//! SessionManager (cloneable handle)
//!   │  Command ──────────────┐
//!   │                        ▼
//!   │               SessionActor (one tokio task)
//!   │                 ├─ TransportProvider::open / TransportSession::*
//!   │                 ├─ (generation, TransportEvent) <── EventSink
//!   │                 ├─ reconnect timer (at most one)
//!   │                 ├─ watch<SessionState>  ──> SessionStateStore
//!   │                 └─ MessageBus           ──> subscribers
//! ```
//!
//! Every transition happens inside the actor, so the peer map and the
//! session are never shared and need no lock.  Public methods only enqueue a
//! command; none of them blocks except [`SessionManager::start_host`], which
//! waits for the one terminal event (open or error) of the host session.
//!
//! # Status state machine
//!
//! ```text
//! Disconnected ──start──> Connecting ──open──> Connected
//!      ▲                       │                   │
//!      └────────failure────────┴──────loss─────────┘
//! stop(): any state ──> Disconnected
//! ```
//!
//! A host stays `Connected` while its session lives, even with zero peers.
//!
//! # Stale events
//!
//! Each session gets a fresh [`Generation`].  The provider stamps it on every
//! event, and the actor drops any event whose generation is not the live
//! session's, or whose connection is no longer tracked.  A close arriving
//! from a session destroyed by `stop()` or by a reconnect therefore cannot
//! change status, the peer map, or the bus.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use peerlink_core::{ConnectionStatus, Identity, Message, NetworkMode, SessionState, TransportSettings};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{self, Instant};
use tracing::{debug, info, trace, warn};

use super::message_bus::{MessageBus, DEFAULT_BUS_CAPACITY};
use super::state_store::SessionStateStore;
use crate::infrastructure::transport::{
    ConnectOptions, ConnectionEvent, ConnectionId, EventSink, Generation, SessionEvent,
    TaggedEvent, TransportError, TransportEvent, TransportProvider, TransportSession,
};

/// Default delay before a client rebuilds its session after losing it.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(4);

/// Errors surfaced to callers of the session manager.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// `start_host` was called while a session already exists.
    #[error("a session is already active; stop it first")]
    AlreadyActive,
    /// `init_client` was called with an empty host identity.
    #[error("host identity must not be empty")]
    InvalidHostIdentity,
    /// The transport provider could not open the local session.
    #[error("could not open session: {detail}")]
    SessionOpen { detail: String },
    /// `stop` was called before the host session finished opening.
    #[error("session start cancelled")]
    Cancelled,
    /// The session actor has exited.
    #[error("session manager has shut down")]
    ManagerClosed,
}

/// Runtime settings of a [`SessionManager`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionManagerConfig {
    /// Fixed delay between losing a client session and rebuilding it.
    pub reconnect_delay: Duration,
    /// Events retained per bus stream for slow subscribers.
    pub bus_capacity: usize,
    /// Endpoint sets; the operating mode picks one per session.
    pub transport: TransportSettings,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            bus_capacity: DEFAULT_BUS_CAPACITY,
            transport: TransportSettings::default(),
        }
    }
}

// ── Public handle ─────────────────────────────────────────────────────────────

enum Command {
    SetOperatingMode(NetworkMode),
    StartHost {
        reply: oneshot::Sender<Result<Identity, SessionError>>,
    },
    InitClient {
        host: Identity,
    },
    Send(Message),
    Stop,
    LocalIdentity {
        reply: oneshot::Sender<Option<Identity>>,
    },
    SwitchRememberHost,
    Shutdown,
}

/// Handle to a session actor.
///
/// Cloning is cheap; all clones drive the same actor.  The actor exits when
/// [`shutdown`](Self::shutdown) is called or the last handle is dropped.
#[derive(Clone)]
pub struct SessionManager {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    bus: MessageBus,
}

impl SessionManager {
    /// Spawns a session actor with default state.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(provider: Arc<dyn TransportProvider>, config: SessionManagerConfig) -> Self {
        Self::with_state(provider, config, SessionState::default())
    }

    /// Spawns a session actor seeded with `initial` state.
    ///
    /// Use this to restore a host identity the caller remembered across a
    /// restart.  The status is always reset to `Disconnected`.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn with_state(
        provider: Arc<dyn TransportProvider>,
        config: SessionManagerConfig,
        initial: SessionState,
    ) -> Self {
        let initial = SessionState {
            peer_connection_state: ConnectionStatus::Disconnected,
            ..initial
        };
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(initial);
        let bus = MessageBus::new(config.bus_capacity);

        let actor = SessionActor {
            provider,
            config,
            state: state_tx,
            bus: bus.clone(),
            events: event_tx,
            generation: Generation::default(),
            session: None,
            reconnect: None,
        };
        tokio::spawn(actor.run(command_rx, event_rx));

        Self {
            commands: command_tx,
            state: state_rx,
            bus,
        }
    }

    /// Selects the local (`true`) or public (`false`) endpoint set for the
    /// next session.  An already open session is unaffected.
    pub fn set_operating_mode(&self, local: bool) {
        self.command(Command::SetOperatingMode(NetworkMode::from_local_flag(local)));
    }

    /// Opens a host session and waits until it is registered.
    ///
    /// Reuses the remembered host identity when "remember host" is enabled,
    /// otherwise registers a fresh random identity.  On success the identity
    /// is remembered and inbound connections are accepted.  Failures are not
    /// retried; call again to retry.
    ///
    /// # Errors
    ///
    /// - [`SessionError::AlreadyActive`] if a session exists.
    /// - [`SessionError::SessionOpen`] if the provider reports a session error.
    /// - [`SessionError::Cancelled`] if `stop` runs before the session opens.
    /// - [`SessionError::ManagerClosed`] if the actor has exited.
    pub async fn start_host(&self) -> Result<Identity, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::StartHost { reply })
            .map_err(|_| SessionError::ManagerClosed)?;
        rx.await.map_err(|_| SessionError::ManagerClosed)?
    }

    /// Starts a client session that dials `host` and keeps redialing it.
    ///
    /// Returns immediately; progress is visible through [`state`](Self::state)
    /// and the [`bus`](Self::bus).  Any existing session is replaced.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidHostIdentity`] if `host` is empty.
    pub fn init_client(&self, host: &str) -> Result<(), SessionError> {
        let host = Identity::parse(host).map_err(|_| SessionError::InvalidHostIdentity)?;
        self.command(Command::InitClient { host });
        Ok(())
    }

    /// Sends `message` to every open connection.
    ///
    /// Never blocks and never fails: with no session, a disconnected
    /// session, or zero open connections this is a silent no-op.
    pub fn send_message(&self, message: Message) {
        self.command(Command::Send(message));
    }

    /// Destroys the session and all connections, cancels any pending
    /// reconnect, and reports `Disconnected`.  Safe to call repeatedly.
    pub fn stop(&self) {
        self.command(Command::Stop);
    }

    /// Identity of the current session once it is open.
    pub async fn local_identity(&self) -> Option<Identity> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::LocalIdentity { reply }).ok()?;
        rx.await.ok().flatten()
    }

    /// Toggles whether `start_host` reuses the remembered host identity.
    pub fn switch_remember_host(&self) {
        self.command(Command::SwitchRememberHost);
    }

    /// Read-only view of the published session state.
    pub fn state(&self) -> SessionStateStore {
        SessionStateStore::new(self.state.clone())
    }

    /// Subscription surface for inbound messages and peer-joined events.
    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Stops the session and terminates the actor.
    pub fn shutdown(&self) {
        self.command(Command::Shutdown);
    }

    fn command(&self, command: Command) {
        if self.commands.send(command).is_err() {
            debug!("session actor has exited; command dropped");
        }
    }
}

// ── Actor ─────────────────────────────────────────────────────────────────────

/// A connection tracked by the live session.
#[derive(Debug, Clone, Copy)]
struct PeerLink {
    id: ConnectionId,
    open: bool,
}

impl PeerLink {
    fn pending(id: ConnectionId) -> Self {
        Self { id, open: false }
    }
}

/// Host-side links grouped by remote identity, indexed by connection id.
///
/// One remote may hold several links at once (e.g. a reconnect racing the
/// close of its previous link).
#[derive(Debug, Default)]
struct PeerMap {
    by_remote: HashMap<Identity, Vec<PeerLink>>,
    by_connection: HashMap<ConnectionId, Identity>,
}

impl PeerMap {
    fn insert(&mut self, remote: Identity, id: ConnectionId) {
        self.by_connection.insert(id, remote.clone());
        self.by_remote.entry(remote).or_default().push(PeerLink::pending(id));
    }

    fn get_mut(&mut self, id: ConnectionId) -> Option<(&Identity, &mut PeerLink)> {
        let remote = self.by_connection.get(&id)?;
        let link = self.by_remote.get_mut(remote)?.iter_mut().find(|l| l.id == id)?;
        Some((remote, link))
    }

    /// Forgets `id`, dropping its remote once no link is left.
    fn remove(&mut self, id: ConnectionId) -> Option<Identity> {
        let remote = self.by_connection.remove(&id)?;
        if let Some(links) = self.by_remote.get_mut(&remote) {
            links.retain(|l| l.id != id);
            if links.is_empty() {
                self.by_remote.remove(&remote);
            }
        }
        Some(remote)
    }

    fn links(&self) -> impl Iterator<Item = &PeerLink> {
        self.by_remote.values().flatten()
    }
}

enum Role {
    Host {
        pending_start: Option<oneshot::Sender<Result<Identity, SessionError>>>,
        peers: PeerMap,
    },
    Client {
        host: Identity,
        uplink: Option<PeerLink>,
    },
}

struct ActiveSession {
    generation: Generation,
    identity: Identity,
    transport: Box<dyn TransportSession>,
    open: bool,
    role: Role,
}

struct PendingReconnect {
    deadline: Instant,
    host: Identity,
}

struct SessionActor {
    provider: Arc<dyn TransportProvider>,
    config: SessionManagerConfig,
    state: watch::Sender<SessionState>,
    bus: MessageBus,
    events: mpsc::UnboundedSender<TaggedEvent>,
    generation: Generation,
    session: Option<ActiveSession>,
    reconnect: Option<PendingReconnect>,
}

impl SessionActor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut events: mpsc::UnboundedReceiver<TaggedEvent>,
    ) {
        loop {
            let deadline = self.reconnect.as_ref().map(|r| r.deadline);
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(tagged) = events.recv() => self.handle_event(tagged),
                () = reconnect_timer(deadline) => self.fire_reconnect(),
            }
        }
        self.stop();
        debug!("session actor exited");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetOperatingMode(mode) => {
                self.state.send_if_modified(|s| replace(&mut s.network_mode, mode));
            }
            Command::StartHost { reply } => self.start_host(reply),
            Command::InitClient { host } => self.init_client(host),
            Command::Send(message) => self.fan_out(&message),
            Command::Stop => self.stop(),
            Command::LocalIdentity { reply } => {
                let identity = self
                    .session
                    .as_ref()
                    .filter(|s| s.open)
                    .map(|s| s.identity.clone());
                let _ = reply.send(identity);
            }
            Command::SwitchRememberHost => {
                self.state.send_modify(|s| s.save_host = !s.save_host);
            }
            // Handled by the run loop.
            Command::Shutdown => {}
        }
    }

    // ── Operations ────────────────────────────────────────────────────────────

    fn start_host(&mut self, reply: oneshot::Sender<Result<Identity, SessionError>>) {
        if self.session.is_some() {
            let _ = reply.send(Err(SessionError::AlreadyActive));
            return;
        }
        self.reconnect = None;
        self.set_status(ConnectionStatus::Connecting);

        let identity = self.state.borrow().next_host_identity();
        info!("[host] opening session as {identity}");
        let role = Role::Host {
            pending_start: None,
            peers: PeerMap::default(),
        };
        match self.open_session(identity, role) {
            Ok(()) => {
                if let Some(ActiveSession {
                    role: Role::Host { pending_start, .. },
                    ..
                }) = self.session.as_mut()
                {
                    *pending_start = Some(reply);
                }
            }
            Err(e) => {
                warn!("[host] could not open session: {e}");
                self.set_status(ConnectionStatus::Disconnected);
                let _ = reply.send(Err(SessionError::SessionOpen {
                    detail: e.to_string(),
                }));
            }
        }
    }

    fn init_client(&mut self, host: Identity) {
        self.reconnect = None;
        if let Some(previous) = self.session.take() {
            debug!("[client] replacing session {}", previous.identity);
            self.teardown(previous);
        }
        self.set_status(ConnectionStatus::Connecting);

        let identity = Identity::random();
        info!("[client] opening session as {identity} for host {host}");
        let role = Role::Client {
            host: host.clone(),
            uplink: None,
        };
        if let Err(e) = self.open_session(identity, role) {
            warn!("[client] could not open session: {e}");
            self.set_status(ConnectionStatus::Disconnected);
            self.schedule_reconnect(host);
        }
    }

    fn fan_out(&self, message: &Message) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if !session.open || session.transport.is_disconnected() {
            trace!("session disconnected; dropping outbound {:?}", message.kind);
            return;
        }
        let targets: Vec<ConnectionId> = match &session.role {
            Role::Host { peers, .. } => peers
                .links()
                .filter(|link| link.open)
                .map(|link| link.id)
                .collect(),
            Role::Client { uplink, .. } => uplink.iter().filter(|l| l.open).map(|l| l.id).collect(),
        };
        for id in &targets {
            if let Err(e) = session.transport.send(*id, message) {
                warn!("send on {id} failed: {e}");
            }
        }
        debug!("sent {:?} to {} connection(s)", message.kind, targets.len());
    }

    fn stop(&mut self) {
        self.reconnect = None;
        self.set_status(ConnectionStatus::Disconnected);
        if let Some(session) = self.session.take() {
            info!("stopping session {}", session.identity);
            self.teardown(session);
        }
    }

    // ── Transport events ──────────────────────────────────────────────────────

    fn handle_event(&mut self, tagged: TaggedEvent) {
        let live = self.session.as_ref().map(|s| s.generation);
        if live != Some(tagged.generation) {
            trace!("discarding stale event from {}: {:?}", tagged.generation, tagged.event);
            return;
        }
        match tagged.event {
            TransportEvent::Session(event) => self.on_session_event(event),
            TransportEvent::Connection { id, event } => self.on_connection_event(id, event),
        }
    }

    fn on_session_event(&mut self, event: SessionEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match event {
            SessionEvent::Open => {
                session.open = true;
                let identity = session.identity.clone();
                match &mut session.role {
                    Role::Host { pending_start, .. } => {
                        info!("[host] session open as {identity}");
                        let reply = pending_start.take();
                        self.state.send_modify(|s| {
                            s.peer_connection_state = ConnectionStatus::Connected;
                            s.host_id = Some(identity.clone());
                        });
                        if let Some(reply) = reply {
                            let _ = reply.send(Ok(identity));
                        }
                    }
                    Role::Client { host, uplink } => {
                        debug!("[client] session open as {identity}; dialing {host}");
                        match session.transport.connect(host, ConnectOptions::reliable()) {
                            Ok(id) => *uplink = Some(PeerLink::pending(id)),
                            Err(e) => {
                                warn!("[client] could not dial {host}: {e}");
                                self.reconnect_client();
                            }
                        }
                    }
                }
            }
            SessionEvent::Error(detail) => match &mut session.role {
                Role::Host { pending_start, .. } => match pending_start.take() {
                    Some(reply) => {
                        warn!("[host] session failed to open: {detail}");
                        if let Some(session) = self.session.take() {
                            self.teardown(session);
                        }
                        self.set_status(ConnectionStatus::Disconnected);
                        let _ = reply.send(Err(SessionError::SessionOpen { detail }));
                    }
                    None => warn!("[host] session error: {detail}"),
                },
                Role::Client { .. } => {
                    warn!("[client] session error: {detail}");
                    self.reconnect_client();
                }
            },
            SessionEvent::Disconnected => {
                warn!("signaling channel of {} lost", session.identity);
            }
            SessionEvent::IncomingConnection { connection, remote } => match &mut session.role {
                Role::Host { peers, .. } => {
                    debug!("[host] incoming {connection} from {remote}");
                    peers.insert(remote, connection);
                }
                Role::Client { .. } => {
                    debug!("[client] refusing inbound {connection} from {remote}");
                    session.transport.close(connection);
                }
            },
        }
    }

    fn on_connection_event(&mut self, id: ConnectionId, event: ConnectionEvent) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        match &mut session.role {
            Role::Host { peers, .. } => {
                let Some((remote, link)) = peers.get_mut(id) else {
                    trace!("discarding event for untracked {id}");
                    return;
                };
                let remote = remote.clone();
                match event {
                    ConnectionEvent::Open => {
                        link.open = true;
                        info!("[host] peer {remote} joined on {id}");
                        self.bus.publish_peer_joined(remote);
                    }
                    ConnectionEvent::Data(message) => {
                        if link.open {
                            self.bus.publish_message(message);
                        }
                    }
                    ConnectionEvent::Close => {
                        info!("[host] peer {remote} left ({id} closed)");
                        peers.remove(id);
                    }
                    ConnectionEvent::Error(detail) => {
                        warn!("[host] connection {id} to {remote} failed: {detail}");
                        peers.remove(id);
                        session.transport.close(id);
                    }
                }
            }
            Role::Client { host, uplink } => {
                let Some(link) = uplink.as_mut().filter(|l| l.id == id) else {
                    trace!("discarding event for untracked {id}");
                    return;
                };
                match event {
                    ConnectionEvent::Open => {
                        link.open = true;
                        info!("[client] connected to host {host}");
                        self.set_status(ConnectionStatus::Connected);
                    }
                    ConnectionEvent::Data(message) => {
                        if link.open {
                            self.bus.publish_message(message);
                        }
                    }
                    ConnectionEvent::Close => {
                        warn!("[client] uplink to {host} closed");
                        self.reconnect_client();
                    }
                    ConnectionEvent::Error(detail) => {
                        warn!("[client] uplink to {host} failed: {detail}");
                        self.reconnect_client();
                    }
                }
            }
        }
    }

    // ── Reconnect procedure ───────────────────────────────────────────────────

    /// Tears the client session down and arms the reconnect timer.
    ///
    /// Unbounded and constant-delay: every failure of the replacement session
    /// comes back through here.
    fn reconnect_client(&mut self) {
        let host = match self.session.as_ref().map(|s| &s.role) {
            Some(Role::Client { host, .. }) => host.clone(),
            _ => return,
        };
        self.set_status(ConnectionStatus::Disconnected);
        if let Some(session) = self.session.take() {
            self.teardown(session);
        }
        self.schedule_reconnect(host);
    }

    fn schedule_reconnect(&mut self, host: Identity) {
        let delay = self.config.reconnect_delay;
        warn!("[client] reconnecting to {host} in {delay:?}");
        self.reconnect = Some(PendingReconnect {
            deadline: Instant::now() + delay,
            host,
        });
    }

    fn fire_reconnect(&mut self) {
        if let Some(pending) = self.reconnect.take() {
            info!("[client] reset");
            self.init_client(pending.host);
        }
    }

    // ── Helpers ───────────────────────────────────────────────────────────────

    fn open_session(&mut self, identity: Identity, role: Role) -> Result<(), TransportError> {
        self.generation = self.generation.next();
        let sink = EventSink::new(self.generation, self.events.clone());
        let mode = self.state.borrow().network_mode;
        let config = self.config.transport.for_mode(mode).clone();

        let transport = self.provider.open(&identity, &config, sink)?;
        self.session = Some(ActiveSession {
            generation: self.generation,
            identity,
            transport,
            open: false,
            role,
        });
        Ok(())
    }

    fn teardown(&self, mut session: ActiveSession) {
        match session.role {
            Role::Host {
                pending_start,
                peers,
            } => {
                for link in peers.links() {
                    session.transport.close(link.id);
                }
                if let Some(reply) = pending_start {
                    let _ = reply.send(Err(SessionError::Cancelled));
                }
            }
            Role::Client { uplink, .. } => {
                if let Some(link) = uplink {
                    session.transport.close(link.id);
                }
            }
        }
        session.transport.destroy();
        trace!("destroyed session {} ({})", session.identity, session.generation);
    }

    fn set_status(&self, status: ConnectionStatus) {
        let changed = self
            .state
            .send_if_modified(|s| replace(&mut s.peer_connection_state, status));
        if changed {
            debug!("status -> {status:?}");
        }
    }
}

/// Writes `value` into `slot`; returns `true` if it differed.
fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

async fn reconnect_timer(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use peerlink_core::TransportConfig;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    mock! {
        Provider {}
        impl TransportProvider for Provider {
            fn open(
                &self,
                identity: &Identity,
                config: &TransportConfig,
                sink: EventSink,
            ) -> Result<Box<dyn TransportSession>, TransportError>;
        }
    }

    /// A session that accepts every call and never produces events itself.
    struct QuietSession;

    impl TransportSession for QuietSession {
        fn connect(&mut self, _: &Identity, _: ConnectOptions) -> Result<ConnectionId, TransportError> {
            Ok(ConnectionId(1))
        }
        fn send(&self, _: ConnectionId, _: &Message) -> Result<(), TransportError> {
            Ok(())
        }
        fn close(&mut self, _: ConnectionId) {}
        fn destroy(&mut self) {}
        fn is_disconnected(&self) -> bool {
            false
        }
    }

    fn opens_immediately(provider: &mut MockProvider) {
        provider.expect_open().returning(|_, _, sink| {
            sink.session_open();
            Ok(Box::new(QuietSession))
        });
    }

    fn manager(provider: MockProvider) -> SessionManager {
        SessionManager::new(Arc::new(provider), SessionManagerConfig::default())
    }

    #[test]
    fn test_default_config_uses_four_second_reconnect_delay() {
        let cfg = SessionManagerConfig::default();
        assert_eq!(cfg.reconnect_delay, Duration::from_secs(4));
        assert_eq!(cfg.bus_capacity, DEFAULT_BUS_CAPACITY);
    }

    #[tokio::test]
    async fn test_start_host_reports_connected_and_remembers_identity() {
        // Arrange
        let mut provider = MockProvider::new();
        opens_immediately(&mut provider);
        let mgr = manager(provider);

        // Act
        let identity = assert_ok!(mgr.start_host().await);

        // Assert
        let state = mgr.state();
        assert_eq!(state.status(), ConnectionStatus::Connected);
        assert_eq!(state.host_id(), Some(identity.clone()));
        assert_eq!(mgr.local_identity().await, Some(identity));
    }

    #[tokio::test]
    async fn test_start_host_surfaces_synchronous_open_failure() {
        // Arrange
        let mut provider = MockProvider::new();
        provider
            .expect_open()
            .returning(|_, _, _| Err(TransportError::Unreachable("signaling down".into())));
        let mgr = manager(provider);

        // Act
        let err = assert_err!(mgr.start_host().await);

        // Assert
        assert!(matches!(err, SessionError::SessionOpen { ref detail } if detail.contains("signaling down")));
        assert_eq!(mgr.state().status(), ConnectionStatus::Disconnected);
        assert_eq!(mgr.local_identity().await, None);
    }

    #[tokio::test]
    async fn test_start_host_surfaces_session_error_event() {
        let mut provider = MockProvider::new();
        provider.expect_open().returning(|_, _, sink| {
            sink.session_error("ID is taken");
            Ok(Box::new(QuietSession))
        });
        let mgr = manager(provider);

        let err = assert_err!(mgr.start_host().await);

        assert_eq!(err, SessionError::SessionOpen { detail: "ID is taken".into() });
        assert_eq!(mgr.state().status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_start_host_twice_is_rejected() {
        let mut provider = MockProvider::new();
        opens_immediately(&mut provider);
        let mgr = manager(provider);
        assert_ok!(mgr.start_host().await);

        assert_eq!(mgr.start_host().await, Err(SessionError::AlreadyActive));
        assert_eq!(mgr.state().status(), ConnectionStatus::Connected);
    }

    #[tokio::test]
    async fn test_start_host_reuses_remembered_identity_when_saving() {
        // Arrange: the provider only accepts the remembered identity
        let remembered = Identity::parse("host-123").unwrap();
        let mut provider = MockProvider::new();
        provider
            .expect_open()
            .withf(|identity, _, _| identity.as_str() == "host-123")
            .returning(|_, _, sink| {
                sink.session_open();
                Ok(Box::new(QuietSession))
            });
        let mgr = SessionManager::with_state(
            Arc::new(provider),
            SessionManagerConfig::default(),
            SessionState::remembering(remembered.clone()),
        );

        // Act / Assert
        assert_eq!(mgr.start_host().await, Ok(remembered));
    }

    #[tokio::test]
    async fn test_operating_mode_selects_local_endpoint() {
        // Arrange
        let mut provider = MockProvider::new();
        provider
            .expect_open()
            .withf(|_, config, _| config.host == "localhost" && config.port == 3030)
            .returning(|_, _, sink| {
                sink.session_open();
                Ok(Box::new(QuietSession))
            });
        let mgr = manager(provider);

        // Act
        mgr.set_operating_mode(true);
        let result = mgr.start_host().await;

        // Assert
        assert_ok!(result);
        assert_eq!(mgr.state().network_mode(), NetworkMode::Local);
    }

    #[tokio::test]
    async fn test_stop_while_host_opening_cancels_start() {
        // Arrange: the provider never reports a terminal event
        let mut provider = MockProvider::new();
        provider
            .expect_open()
            .returning(|_, _, _| Ok(Box::new(QuietSession)));
        let mgr = manager(provider);

        // Act
        let pending = {
            let mgr = mgr.clone();
            tokio::spawn(async move { mgr.start_host().await })
        };
        let mut state = mgr.state();
        assert_ok!(state.wait_for_status(ConnectionStatus::Connecting).await);
        mgr.stop();

        // Assert
        assert_eq!(pending.await.unwrap(), Err(SessionError::Cancelled));
        assert_eq!(mgr.state().status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_init_client_rejects_empty_host() {
        let mgr = manager(MockProvider::new());
        assert_eq!(mgr.init_client(""), Err(SessionError::InvalidHostIdentity));
        assert_eq!(mgr.state().status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_switch_remember_host_toggles_flag() {
        let mgr = manager(MockProvider::new());
        let mut state = mgr.state();

        mgr.switch_remember_host();
        assert!(state.changed().await.unwrap().save_host);

        mgr.switch_remember_host();
        assert!(!state.changed().await.unwrap().save_host);
    }

    #[tokio::test]
    async fn test_send_without_session_is_noop() {
        let mgr = manager(MockProvider::new());
        mgr.send_message(Message::new("style", json!({})));
        assert_eq!(mgr.local_identity().await, None);
    }

    #[tokio::test]
    async fn test_calls_after_shutdown_report_closed() {
        let mgr = manager(MockProvider::new());
        mgr.shutdown();

        assert_eq!(mgr.start_host().await, Err(SessionError::ManagerClosed));
        assert_eq!(mgr.local_identity().await, None);
        mgr.stop();
    }

    #[test]
    fn test_replace_reports_whether_value_changed() {
        let mut slot = ConnectionStatus::Disconnected;
        assert!(!replace(&mut slot, ConnectionStatus::Disconnected));
        assert!(replace(&mut slot, ConnectionStatus::Connected));
        assert_eq!(slot, ConnectionStatus::Connected);
    }

    #[test]
    fn test_peer_map_finds_link_by_connection() {
        // Arrange
        let remote = Identity::parse("overlay").unwrap();
        let mut peers = PeerMap::default();
        peers.insert(remote.clone(), ConnectionId(7));
        peers.insert(remote.clone(), ConnectionId(9));

        // Act
        let (found, link) = peers.get_mut(ConnectionId(9)).unwrap();

        // Assert
        assert_eq!(found, &remote);
        assert_eq!(link.id, ConnectionId(9));
        assert!(!link.open);
        assert!(peers.get_mut(ConnectionId(8)).is_none());
    }

    #[test]
    fn test_peer_map_remove_drops_index_and_empty_remote() {
        // Arrange
        let remote = Identity::parse("overlay").unwrap();
        let mut peers = PeerMap::default();
        peers.insert(remote.clone(), ConnectionId(7));
        peers.insert(remote.clone(), ConnectionId(9));

        // Act / Assert: the remote stays while one of its links is left
        assert_eq!(peers.remove(ConnectionId(7)), Some(remote.clone()));
        assert!(peers.get_mut(ConnectionId(7)).is_none());
        assert_eq!(peers.links().count(), 1);

        assert_eq!(peers.remove(ConnectionId(9)), Some(remote));
        assert!(peers.by_remote.is_empty());
        assert!(peers.by_connection.is_empty());
        assert_eq!(peers.remove(ConnectionId(9)), None);
    }
}

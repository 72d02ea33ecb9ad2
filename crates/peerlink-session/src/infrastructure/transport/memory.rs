//! In-process transport provider.
//!
//! [`MemoryRendezvous`] plays the role of the rendezvous service and of every
//! data channel between the sessions registered with it.  It is a complete
//! provider, not a stub: identities collide, unknown peers are unavailable,
//! delivery is reliable and in order, and destroying a session closes the
//! far end of each of its connections.
//!
//! It exists so that the session manager can be exercised end to end (in the
//! demo binary and in tests) without a signaling server.  A few
//! fault-injection hooks simulate what a real network does to a session:
//!
//! - [`MemoryRendezvous::set_unreachable`] – new sessions fail to register.
//! - [`MemoryRendezvous::drop_links`] – every connection of one peer closes.
//! - [`MemoryRendezvous::lose_signaling`] – the signaling channel of one
//!   session drops while its connections stay up.
//!
//! # Connection ends
//!
//! Each connection has two ends with distinct [`ConnectionId`]s: one owned by
//! the dialing session and one owned by the accepting session.  Sending on an
//! end delivers `Data` to the opposite end's sink.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use peerlink_core::{Identity, Message, TransportConfig};
use tracing::{debug, trace};

use super::{
    ConnectOptions, ConnectionId, EventSink, TransportError, TransportProvider, TransportSession,
};

/// A registered session as the rendezvous sees it.
#[derive(Debug)]
struct Registration {
    token: u64,
    sink: EventSink,
    signaling_lost: bool,
}

/// One end of a connection.
#[derive(Debug)]
struct LinkEnd {
    owner: Identity,
    owner_token: u64,
    sink: EventSink,
    peer_end: ConnectionId,
}

#[derive(Debug, Default)]
struct Registry {
    sessions: HashMap<Identity, Registration>,
    links: HashMap<ConnectionId, LinkEnd>,
    next_id: u64,
    unreachable: bool,
    open_attempts: Vec<Identity>,
}

impl Registry {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Removes both ends of the connection `id` belongs to and reports
    /// `Close` on each.
    fn close_link(&mut self, id: ConnectionId) {
        let Some(end) = self.links.remove(&id) else {
            return;
        };
        end.sink.connection_close(id);
        if let Some(peer) = self.links.remove(&end.peer_end) {
            peer.sink.connection_close(end.peer_end);
        }
    }

    fn ends_owned_by(&self, owner: &Identity, token: Option<u64>) -> Vec<ConnectionId> {
        self.links
            .iter()
            .filter(|(_, end)| &end.owner == owner && token.map_or(true, |t| t == end.owner_token))
            .map(|(id, _)| *id)
            .collect()
    }
}

/// In-process rendezvous service shared by every session in a test or demo.
///
/// Cloning is cheap; all clones share one registry.
#[derive(Debug, Clone, Default)]
pub struct MemoryRendezvous {
    inner: Arc<Mutex<Registry>>,
}

impl MemoryRendezvous {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a provider that registers sessions with this rendezvous.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            rendezvous: self.clone(),
        }
    }

    /// While `true`, every new session fails with a session error.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.registry().unreachable = unreachable;
    }

    /// Closes every connection owned by `identity`, on both ends.
    ///
    /// Simulates a network blip between `identity` and its peers.  Returns
    /// the number of connections closed.
    pub fn drop_links(&self, identity: &Identity) -> usize {
        let mut registry = self.registry();
        let ids = registry.ends_owned_by(identity, None);
        for id in &ids {
            registry.close_link(*id);
        }
        debug!("dropped {} link(s) of {identity}", ids.len());
        ids.len()
    }

    /// Drops the signaling channel of `identity` without touching its
    /// connections.  Returns `false` if no such session is registered.
    pub fn lose_signaling(&self, identity: &Identity) -> bool {
        let mut registry = self.registry();
        match registry.sessions.get_mut(identity) {
            Some(registration) => {
                registration.signaling_lost = true;
                registration.sink.session_disconnected();
                true
            }
            None => false,
        }
    }

    /// Connection ends owned by `owner`, each with the identity at the far
    /// end, ordered by id.
    pub fn connections(&self, owner: &Identity) -> Vec<(ConnectionId, Identity)> {
        let registry = self.registry();
        let mut ends: Vec<(ConnectionId, Identity)> = registry
            .links
            .iter()
            .filter(|(_, end)| &end.owner == owner)
            .filter_map(|(id, end)| {
                let remote = registry.links.get(&end.peer_end)?.owner.clone();
                Some((*id, remote))
            })
            .collect();
        ends.sort_by_key(|(id, _)| id.0);
        ends
    }

    /// `true` if a live session is registered under `identity`.
    pub fn is_registered(&self, identity: &Identity) -> bool {
        self.registry().sessions.contains_key(identity)
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.registry().sessions.len()
    }

    /// Every identity that asked to register, in order, including failures.
    pub fn open_attempts(&self) -> Vec<Identity> {
        self.registry().open_attempts.clone()
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        // A panic while holding the lock cannot leave the registry half
        // updated in a way later callers care about.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// [`TransportProvider`] backed by a [`MemoryRendezvous`].
#[derive(Debug, Clone)]
pub struct MemoryTransport {
    rendezvous: MemoryRendezvous,
}

impl TransportProvider for MemoryTransport {
    fn open(
        &self,
        identity: &Identity,
        config: &TransportConfig,
        sink: EventSink,
    ) -> Result<Box<dyn TransportSession>, TransportError> {
        let mut registry = self.rendezvous.registry();
        registry.open_attempts.push(identity.clone());
        let token = registry.allocate();

        let registered = if registry.unreachable {
            sink.session_error(format!(
                "could not reach rendezvous at {}",
                config.signaling_url()
            ));
            false
        } else if registry.sessions.contains_key(identity) {
            sink.session_error(format!("ID \"{identity}\" is taken"));
            false
        } else {
            registry.sessions.insert(
                identity.clone(),
                Registration {
                    token,
                    sink: sink.clone(),
                    signaling_lost: false,
                },
            );
            sink.session_open();
            true
        };
        trace!("open {identity} via {} -> registered={registered}", config.signaling_url());

        Ok(Box::new(MemorySession {
            identity: identity.clone(),
            token,
            sink,
            registered,
            rendezvous: self.rendezvous.clone(),
        }))
    }
}

/// A session registered with a [`MemoryRendezvous`].
#[derive(Debug)]
pub struct MemorySession {
    identity: Identity,
    token: u64,
    sink: EventSink,
    registered: bool,
    rendezvous: MemoryRendezvous,
}

impl TransportSession for MemorySession {
    fn connect(
        &mut self,
        remote: &Identity,
        _options: ConnectOptions,
    ) -> Result<ConnectionId, TransportError> {
        if !self.registered {
            return Err(TransportError::Closed);
        }
        let mut registry = self.rendezvous.registry();
        let local_end = ConnectionId(registry.allocate());

        let Some(remote_sink) = registry.sessions.get(remote).map(|r| r.sink.clone()) else {
            // The handle is returned anyway; it simply never opens.
            self.sink
                .session_error(format!("could not connect to peer {remote}"));
            return Ok(local_end);
        };
        let remote_token = registry.sessions.get(remote).map_or(0, |r| r.token);
        let remote_end = ConnectionId(registry.allocate());

        registry.links.insert(
            local_end,
            LinkEnd {
                owner: self.identity.clone(),
                owner_token: self.token,
                sink: self.sink.clone(),
                peer_end: remote_end,
            },
        );
        registry.links.insert(
            remote_end,
            LinkEnd {
                owner: remote.clone(),
                owner_token: remote_token,
                sink: remote_sink.clone(),
                peer_end: local_end,
            },
        );

        remote_sink.incoming_connection(remote_end, self.identity.clone());
        remote_sink.connection_open(remote_end);
        self.sink.connection_open(local_end);
        Ok(local_end)
    }

    fn send(&self, connection: ConnectionId, message: &Message) -> Result<(), TransportError> {
        let registry = self.rendezvous.registry();
        let end = registry
            .links
            .get(&connection)
            .filter(|end| end.owner_token == self.token)
            .ok_or(TransportError::UnknownConnection(connection))?;
        let peer = registry
            .links
            .get(&end.peer_end)
            .ok_or(TransportError::Closed)?;
        peer.sink.data(end.peer_end, message.clone());
        Ok(())
    }

    fn close(&mut self, connection: ConnectionId) {
        let mut registry = self.rendezvous.registry();
        let owned = registry
            .links
            .get(&connection)
            .is_some_and(|end| end.owner_token == self.token);
        if owned {
            registry.close_link(connection);
        }
    }

    fn destroy(&mut self) {
        let mut registry = self.rendezvous.registry();
        for id in registry.ends_owned_by(&self.identity, Some(self.token)) {
            registry.close_link(id);
        }
        let ours = registry
            .sessions
            .get(&self.identity)
            .is_some_and(|r| r.token == self.token);
        if ours {
            registry.sessions.remove(&self.identity);
        }
        self.registered = false;
    }

    fn is_disconnected(&self) -> bool {
        if !self.registered {
            return true;
        }
        self.rendezvous
            .registry()
            .sessions
            .get(&self.identity)
            .map_or(true, |r| r.token != self.token || r.signaling_lost)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::transport::{
        ConnectionEvent, Generation, SessionEvent, TaggedEvent, TransportEvent,
    };
    use serde_json::json;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn id(s: &str) -> Identity {
        Identity::parse(s).unwrap()
    }

    fn open(
        rendezvous: &MemoryRendezvous,
        name: &str,
    ) -> (Box<dyn TransportSession>, UnboundedReceiver<TaggedEvent>) {
        let (sink, rx) = EventSink::channel(Generation(1));
        let session = rendezvous
            .transport()
            .open(&id(name), &TransportConfig::local(), sink)
            .unwrap();
        (session, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<TaggedEvent>) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        while let Ok(tagged) = rx.try_recv() {
            out.push(tagged.event);
        }
        out
    }

    #[test]
    fn test_open_registers_and_reports_open() {
        // Arrange
        let rendezvous = MemoryRendezvous::new();

        // Act
        let (session, mut rx) = open(&rendezvous, "host");

        // Assert
        assert!(rendezvous.is_registered(&id("host")));
        assert!(!session.is_disconnected());
        assert_eq!(drain(&mut rx), vec![TransportEvent::Session(SessionEvent::Open)]);
    }

    #[test]
    fn test_open_with_taken_identity_reports_error() {
        let rendezvous = MemoryRendezvous::new();
        let (_first, _rx1) = open(&rendezvous, "host");

        let (second, mut rx2) = open(&rendezvous, "host");

        assert!(second.is_disconnected());
        let events = drain(&mut rx2);
        assert!(matches!(
            events.as_slice(),
            [TransportEvent::Session(SessionEvent::Error(detail))] if detail.contains("taken")
        ));
    }

    #[test]
    fn test_open_while_unreachable_reports_error_and_registers_nothing() {
        let rendezvous = MemoryRendezvous::new();
        rendezvous.set_unreachable(true);

        let (_session, mut rx) = open(&rendezvous, "host");

        assert_eq!(rendezvous.session_count(), 0);
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [TransportEvent::Session(SessionEvent::Error(_))]
        ));
        assert_eq!(rendezvous.open_attempts(), vec![id("host")]);
    }

    #[test]
    fn test_connect_opens_both_ends_and_delivers_data() {
        // Arrange
        let rendezvous = MemoryRendezvous::new();
        let (_host, mut host_rx) = open(&rendezvous, "host");
        let (mut client, mut client_rx) = open(&rendezvous, "client");
        drain(&mut host_rx);
        drain(&mut client_rx);

        // Act
        let conn = client.connect(&id("host"), ConnectOptions::reliable()).unwrap();
        client.send(conn, &Message::new("style", json!({"a": 1}))).unwrap();

        // Assert
        let host_events = drain(&mut host_rx);
        assert_eq!(host_events.len(), 3);
        let remote_end = match &host_events[0] {
            TransportEvent::Session(SessionEvent::IncomingConnection { connection, remote }) => {
                assert_eq!(remote, &id("client"));
                *connection
            }
            other => panic!("expected IncomingConnection, got {other:?}"),
        };
        assert_eq!(
            host_events[1],
            TransportEvent::Connection { id: remote_end, event: ConnectionEvent::Open }
        );
        assert_eq!(
            host_events[2],
            TransportEvent::Connection {
                id: remote_end,
                event: ConnectionEvent::Data(Message::new("style", json!({"a": 1})))
            }
        );
        assert_eq!(
            drain(&mut client_rx),
            vec![TransportEvent::Connection { id: conn, event: ConnectionEvent::Open }]
        );
    }

    #[test]
    fn test_connect_to_unknown_peer_reports_session_error() {
        let rendezvous = MemoryRendezvous::new();
        let (mut client, mut rx) = open(&rendezvous, "client");
        drain(&mut rx);

        let conn = client.connect(&id("nobody"), ConnectOptions::reliable());

        assert!(conn.is_ok(), "a handle is returned even though it never opens");
        assert!(matches!(
            drain(&mut rx).as_slice(),
            [TransportEvent::Session(SessionEvent::Error(_))]
        ));
    }

    #[test]
    fn test_destroy_closes_far_end_and_unregisters() {
        // Arrange
        let rendezvous = MemoryRendezvous::new();
        let (_host, mut host_rx) = open(&rendezvous, "host");
        let (mut client, _client_rx) = open(&rendezvous, "client");
        client.connect(&id("host"), ConnectOptions::reliable()).unwrap();
        drain(&mut host_rx);

        // Act
        client.destroy();

        // Assert
        assert!(!rendezvous.is_registered(&id("client")));
        assert!(client.is_disconnected());
        assert!(matches!(
            drain(&mut host_rx).as_slice(),
            [TransportEvent::Connection { event: ConnectionEvent::Close, .. }]
        ));
    }

    #[test]
    fn test_drop_links_closes_every_link_of_peer() {
        let rendezvous = MemoryRendezvous::new();
        let (_host, _host_rx) = open(&rendezvous, "host");
        let (mut client, mut client_rx) = open(&rendezvous, "client");
        let conn = client.connect(&id("host"), ConnectOptions::reliable()).unwrap();
        drain(&mut client_rx);

        assert_eq!(rendezvous.drop_links(&id("client")), 1);

        assert_eq!(
            drain(&mut client_rx),
            vec![TransportEvent::Connection { id: conn, event: ConnectionEvent::Close }]
        );
        assert_eq!(
            client.send(conn, &Message::new("x", json!(null))),
            Err(TransportError::UnknownConnection(conn))
        );
    }

    #[test]
    fn test_connections_lists_each_end_with_its_remote() {
        // Arrange
        let rendezvous = MemoryRendezvous::new();
        let (_host, _host_rx) = open(&rendezvous, "host");
        let (mut client, _client_rx) = open(&rendezvous, "client");

        // Act
        let conn = client.connect(&id("host"), ConnectOptions::reliable()).unwrap();

        // Assert
        assert_eq!(rendezvous.connections(&id("client")), vec![(conn, id("host"))]);
        let host_ends = rendezvous.connections(&id("host"));
        assert_eq!(host_ends.len(), 1);
        assert_eq!(host_ends[0].1, id("client"));
        assert_ne!(host_ends[0].0, conn);
    }

    #[test]
    fn test_lose_signaling_marks_session_disconnected() {
        let rendezvous = MemoryRendezvous::new();
        let (session, mut rx) = open(&rendezvous, "host");
        drain(&mut rx);

        assert!(rendezvous.lose_signaling(&id("host")));

        assert!(session.is_disconnected());
        assert_eq!(drain(&mut rx), vec![TransportEvent::Session(SessionEvent::Disconnected)]);
    }

    #[test]
    fn test_destroying_stale_session_keeps_newer_registration() {
        // Arrange: a session is destroyed after its identity was re-registered
        let rendezvous = MemoryRendezvous::new();
        let (mut old, _old_rx) = open(&rendezvous, "host");
        old.destroy();
        let (_new, _new_rx) = open(&rendezvous, "host");

        // Act
        old.destroy();

        // Assert
        assert!(rendezvous.is_registered(&id("host")));
    }
}

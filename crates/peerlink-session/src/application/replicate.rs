//! Keeps one JSON document in sync across every peer of a session.
//!
//! A [`TopicReplicator`] owns the latest value of a single message type (the
//! "topic").  It is the typical consumer of the message bus:
//!
//! - [`publish`](TopicReplicator::publish) stores a new value locally and
//!   sends it to every connected peer;
//! - inbound messages of the topic replace the local value;
//! - whenever a peer joins a host session, the current value is sent again so
//!   the newcomer catches up.
//!
//! The catch-up is an application-level resend of the *latest* value; the
//! bus itself never replays history.

use peerlink_core::Message;
use serde_json::Value;
use tokio::sync::{
    broadcast::{self, error::RecvError},
    watch,
};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::message_bus::PeerJoined;
use super::session_manager::SessionManager;

/// Replicates the latest value of one message type.
///
/// The background task stops when the replicator is dropped.
pub struct TopicReplicator {
    topic: String,
    manager: SessionManager,
    current: watch::Sender<Option<Value>>,
    task: JoinHandle<()>,
}

impl TopicReplicator {
    /// Subscribes to `manager`'s bus and starts tracking `topic`.
    ///
    /// # Panics
    ///
    /// Must be called from within a Tokio runtime.
    pub fn spawn(manager: SessionManager, topic: impl Into<String>) -> Self {
        let topic = topic.into();
        let (current, _) = watch::channel(None);
        // Subscribe before returning so nothing published afterwards is missed.
        let streams = Streams {
            messages: manager.bus().subscribe_messages(),
            joined: manager.bus().subscribe_peer_joined(),
        };
        let task = tokio::spawn(track(manager.clone(), topic.clone(), current.clone(), streams));
        Self {
            topic,
            manager,
            current,
            task,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Stores `value` and sends it to every connected peer.
    pub fn publish(&self, value: Value) {
        self.current.send_replace(Some(value.clone()));
        self.manager.send_message(Message::new(self.topic.clone(), value));
    }

    /// Latest value, local or received.
    pub fn current(&self) -> Option<Value> {
        self.current.borrow().clone()
    }

    /// Watches the latest value.
    pub fn watch(&self) -> watch::Receiver<Option<Value>> {
        self.current.subscribe()
    }
}

impl Drop for TopicReplicator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Streams {
    messages: broadcast::Receiver<Message>,
    joined: broadcast::Receiver<PeerJoined>,
}

async fn track(
    manager: SessionManager,
    topic: String,
    current: watch::Sender<Option<Value>>,
    streams: Streams,
) {
    let Streams {
        mut messages,
        mut joined,
    } = streams;
    loop {
        tokio::select! {
            received = messages.recv() => match received {
                Ok(message) if message.is(&topic) => {
                    current.send_replace(Some(message.data));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!("{topic}: skipped {skipped} message(s)"),
                Err(RecvError::Closed) => break,
            },
            peer = joined.recv() => {
                match peer {
                    Ok(peer) => debug!("{topic}: catching up {}", peer.peer),
                    Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
                let latest = current.borrow().clone();
                if let Some(value) = latest {
                    manager.send_message(Message::new(topic.clone(), value));
                }
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::application::session_manager::SessionManagerConfig;
    use crate::infrastructure::transport::memory::MemoryRendezvous;
    use serde_json::json;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;
    use tokio::time::{sleep, timeout};

    fn manager() -> SessionManager {
        let rendezvous = MemoryRendezvous::new();
        SessionManager::new(Arc::new(rendezvous.transport()), SessionManagerConfig::default())
    }

    #[tokio::test]
    async fn test_publish_stores_value_locally() {
        // Arrange
        let replicator = TopicReplicator::spawn(manager(), "style");

        // Act
        replicator.publish(json!({"color": "red"}));

        // Assert
        assert_eq!(replicator.current(), Some(json!({"color": "red"})));
        assert_eq!(replicator.topic(), "style");
    }

    #[tokio::test]
    async fn test_inbound_message_of_topic_replaces_value() {
        // Arrange
        let mgr = manager();
        let replicator = TopicReplicator::spawn(mgr.clone(), "style");
        let mut watch = replicator.watch();

        // Act: simulate inbound traffic on the bus
        mgr.bus().publish_message(Message::new("chat", json!("ignored")));
        mgr.bus().publish_message(Message::new("style", json!({"color": "blue"})));

        // Assert
        let value = watch.wait_for(|v| v.is_some()).await.unwrap().clone();
        assert_eq!(value, Some(json!({"color": "blue"})));
    }

    #[tokio::test]
    async fn test_late_joiner_receives_value_published_before_it_joined() {
        // Arrange: the host publishes while nobody is connected
        let rendezvous = MemoryRendezvous::new();
        let provider = Arc::new(rendezvous.transport());
        let host = SessionManager::new(provider.clone(), SessionManagerConfig::default());
        let host_id = host.start_host().await.unwrap();
        let host_style = TopicReplicator::spawn(host.clone(), "style");
        host_style.publish(json!({"color": "red"}));

        // Act
        let client = SessionManager::new(provider, SessionManagerConfig::default());
        let client_style = TopicReplicator::spawn(client.clone(), "style");
        client.init_client(host_id.as_str()).unwrap();

        // Assert
        let mut watch = client_style.watch();
        let value = timeout(Duration::from_secs(2), watch.wait_for(|v| v.is_some()))
            .await
            .expect("value not replicated in time")
            .unwrap()
            .clone();
        assert_eq!(value, Some(json!({"color": "red"})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_joined_without_value_sends_nothing() {
        // Arrange: host replicator holds no value yet
        let rendezvous = MemoryRendezvous::new();
        let provider = Arc::new(rendezvous.transport());
        let host = SessionManager::new(provider.clone(), SessionManagerConfig::default());
        let host_id = host.start_host().await.unwrap();
        let host_style = TopicReplicator::spawn(host.clone(), "style");
        let mut joined = host.bus().subscribe_peer_joined();
        let client = SessionManager::new(provider, SessionManagerConfig::default());
        let mut inbound = client.bus().subscribe_messages();

        // Act
        client.init_client(host_id.as_str()).unwrap();
        let peer = joined.recv().await.unwrap().peer;
        sleep(Duration::from_secs(1)).await;

        // Assert: nothing arrived on join, but the link carries later values
        assert_eq!(client.local_identity().await, Some(peer));
        assert!(matches!(inbound.try_recv(), Err(TryRecvError::Empty)));
        host_style.publish(json!({"color": "green"}));
        let message = inbound.recv().await.unwrap();
        assert!(message.is("style"));
        assert_eq!(message.data, json!({"color": "green"}));
    }
}

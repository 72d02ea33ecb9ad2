//! Application layer: the session manager and what it publishes.
//!
//! # What lives here?
//!
//! - **`session_manager`** – the host/client link state machine.  It owns the
//!   transport session, the reconnect timer, and the peer map, and it is the
//!   only writer of the session state.
//!
//! - **`message_bus`** – broadcast streams of inbound messages and
//!   peer-joined notifications.
//!
//! - **`state_store`** – read-only projection of the session state for
//!   displays and tests.
//!
//! - **`replicate`** – keeps one JSON document in sync across all peers, the
//!   way an overlay editor shares its current style.
//!
//! **Dependency rule**: this layer talks to the network only through the
//! traits in `infrastructure::transport`.

pub mod message_bus;
pub mod replicate;
pub mod session_manager;
pub mod state_store;

pub use message_bus::{MessageBus, PeerJoined};
pub use replicate::TopicReplicator;
pub use session_manager::{SessionError, SessionManager, SessionManagerConfig};
pub use state_store::SessionStateStore;

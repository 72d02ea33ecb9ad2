//! # peerlink-core
//!
//! Shared domain types for peerlink: the host/client messaging channel that
//! lets one participant advertise a rendezvous identity and accept direct
//! peer links from others.
//!
//! This crate has zero dependencies on async runtimes, sockets, or the
//! transport provider.  It only defines the vocabulary the session manager
//! and its consumers agree on.
//!
//! # Architecture overview (for beginners)
//!
//! A peerlink deployment has exactly one **host** and any number of
//! **clients**.  The host registers a well-known identity with a rendezvous
//! service; clients register throwaway identities and dial the host.  Once a
//! link is open, both sides exchange small typed [`Message`]s.
//!
//! - **`domain::identity`** – the opaque address of a session.
//! - **`domain::message`** – the `{ type, data }` envelope on the wire.
//! - **`domain::status`** – connection status, operating mode, and the
//!   [`SessionState`] projection that user interfaces display.
//! - **`domain::config`** – where the transport should register: a local
//!   development endpoint or the public rendezvous plus relay servers.

pub mod domain;

// Re-export the most-used types at the crate root so callers can write
// `peerlink_core::Identity` instead of `peerlink_core::domain::identity::Identity`.
pub use domain::config::{RelayServer, TransportConfig, TransportSettings};
pub use domain::identity::{Identity, IdentityError};
pub use domain::message::Message;
pub use domain::status::{ConnectionStatus, NetworkMode, SessionState};

//! Infrastructure layer for the session manager.
//!
//! Contains the adapters around the application layer: the transport
//! contract and its in-process implementation, the TOML settings file, and
//! the UI command bridge.
//!
//! **Dependency rule**: the application layer may only use the traits and
//! event types in `transport`; `storage` and `ui_bridge` sit on top of the
//! application layer and are never imported by it.
//!
//! # Sub-modules
//!
//! - **`transport`** – `TransportProvider` / `TransportSession` traits, the
//!   generation-tagged `EventSink`, and `memory`, an in-process rendezvous
//!   with fault injection used by tests and the demo.
//!
//! - **`storage`** – loads and saves the `peerlink.toml` settings file.
//!
//! - **`ui_bridge`** – command handlers that expose session status and
//!   host/join/stop actions to a UI front-end.

pub mod storage;
pub mod transport;
pub mod ui_bridge;

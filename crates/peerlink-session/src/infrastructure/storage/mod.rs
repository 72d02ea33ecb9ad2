//! Storage infrastructure: the settings file.
//!
//! The `config` sub-module reads and writes the TOML settings that configure
//! a session manager (reconnect delay, bus capacity, transport endpoints) and
//! supplies defaults when the file does not exist yet.

pub mod config;

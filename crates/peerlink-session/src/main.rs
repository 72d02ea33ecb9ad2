//! peerlink demo: entry point.
//!
//! Runs one host and N clients against an in-process rendezvous, shares a
//! JSON document between them, cuts one client's link to show the reconnect
//! procedure, and then stops every session.
//!
//! # Usage
//!
//! ```text
//! peerlink [OPTIONS]
//!
//! Options:
//!   --config <PATH>              Settings file [default: peerlink.toml]
//!   --local                      Use the local endpoint set
//!   --log-level <FILTER>         tracing filter, e.g. "debug" [default: info]
//!   --clients <N>                Number of client sessions [default: 2]
//!   --reconnect-delay-ms <MS>    Override [session] reconnect_delay_ms
//! ```
//!
//! # Environment variable overrides
//!
//! | Variable                       | Flag                   |
//! |--------------------------------|------------------------|
//! | `PEERLINK_CONFIG`              | `--config`             |
//! | `PEERLINK_LOCAL`               | `--local`              |
//! | `PEERLINK_LOG`                 | `--log-level`          |
//! | `PEERLINK_CLIENTS`             | `--clients`            |
//! | `PEERLINK_RECONNECT_DELAY_MS`  | `--reconnect-delay-ms` |
//!
//! CLI args take precedence when both are present.  Without `--log-level`,
//! `RUST_LOG` is honoured.
//!
//! # What the demo shows
//!
//! ```text
//! host ── start_host ─────────────────────────> Connected
//! client[i] ── init_client(host) ─────────────> Connected
//! host.publish("style") ──fan-out──> client[i] replicators
//! drop_links(client[0]) ──> Disconnected ──delay──> Connected (new identity)
//!                           (host resends "style" on PeerJoined)
//! stop everything
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use serde_json::json;
use tokio::time::timeout;
use tracing::info;
use tracing_subscriber::EnvFilter;

use peerlink_core::{ConnectionStatus, Identity};
use peerlink_session::application::{SessionManager, SessionManagerConfig, TopicReplicator};
use peerlink_session::infrastructure::storage::config::load_config;
use peerlink_session::infrastructure::transport::memory::MemoryRendezvous;
use peerlink_session::infrastructure::ui_bridge::get_session_status;

/// Topic the demo replicates.
const STYLE_TOPIC: &str = "style";

/// Upper bound for each step on top of the reconnect delay.
const STEP_TIMEOUT: Duration = Duration::from_secs(5);

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Peer-to-peer session demo.
///
/// The `#[derive(Parser)]` macro from `clap` generates the argument parser
/// from the struct fields and their `#[arg(...)]` attributes.
#[derive(Debug, Parser)]
#[command(
    name = "peerlink",
    about = "Host/client peer session demo with automatic reconnect",
    version
)]
struct Cli {
    /// Settings file; a missing file means defaults.
    #[arg(long, default_value = "peerlink.toml", env = "PEERLINK_CONFIG")]
    config: PathBuf,

    /// Use the local endpoint set instead of the public one.
    #[arg(long, env = "PEERLINK_LOCAL")]
    local: bool,

    /// tracing filter directive (e.g. `info`, `peerlink_session=debug`).
    #[arg(long, env = "PEERLINK_LOG")]
    log_level: Option<String>,

    /// Number of client sessions to start.
    #[arg(long, default_value_t = 2, env = "PEERLINK_CLIENTS")]
    clients: usize,

    /// Overrides `[session] reconnect_delay_ms` from the settings file.
    #[arg(long, env = "PEERLINK_RECONNECT_DELAY_MS")]
    reconnect_delay_ms: Option<u64>,
}

impl Cli {
    fn env_filter(&self) -> EnvFilter {
        match &self.log_level {
            Some(level) => EnvFilter::new(level),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        }
    }

    /// Loads the settings file and applies CLI overrides.
    fn manager_config(&self) -> anyhow::Result<SessionManagerConfig> {
        let mut file = load_config(&self.config)
            .with_context(|| format!("loading settings from {}", self.config.display()))?;
        if let Some(ms) = self.reconnect_delay_ms {
            file.session.reconnect_delay_ms = ms;
        }
        Ok(file.to_manager_config()?)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_env_filter(cli.env_filter()).init();

    if cli.clients == 0 {
        bail!("--clients must be at least 1");
    }
    let config = cli.manager_config()?;
    let reconnect_budget = config.reconnect_delay + STEP_TIMEOUT;
    info!(
        "peerlink demo starting: {} client(s), reconnect delay {:?}",
        cli.clients, config.reconnect_delay
    );

    let rendezvous = MemoryRendezvous::new();
    let provider = Arc::new(rendezvous.transport());

    // ── Host ──────────────────────────────────────────────────────────────────
    let host = SessionManager::new(provider.clone(), config.clone());
    host.set_operating_mode(cli.local);
    let host_id = timeout(STEP_TIMEOUT, host.start_host())
        .await
        .context("host did not open in time")??;
    let host_style = TopicReplicator::spawn(host.clone(), STYLE_TOPIC);
    info!("host registered as {host_id}");

    // ── Clients ───────────────────────────────────────────────────────────────
    let mut clients = Vec::with_capacity(cli.clients);
    for index in 0..cli.clients {
        let client = SessionManager::new(provider.clone(), config.clone());
        client.set_operating_mode(cli.local);
        let style = TopicReplicator::spawn(client.clone(), STYLE_TOPIC);
        client.init_client(host_id.as_str())?;
        wait_for(&client, ConnectionStatus::Connected, STEP_TIMEOUT)
            .await
            .with_context(|| format!("client {index} did not connect"))?;
        clients.push((client, style));
    }
    info!("{} client(s) connected", clients.len());

    // ── Replicate a document ──────────────────────────────────────────────────
    let document = json!({ "color": "#ff8800", "font": "Inter", "size": 32 });
    host_style.publish(document.clone());
    for (index, (_, style)) in clients.iter().enumerate() {
        wait_for_value(style, &document, STEP_TIMEOUT)
            .await
            .with_context(|| format!("client {index} did not receive the document"))?;
    }
    info!("document replicated to every client");

    // ── Cut one uplink and watch it come back ─────────────────────────────────
    let (victim, victim_style) = &clients[0];
    let victim_id = victim
        .local_identity()
        .await
        .context("client 0 has no open session")?;
    let dropped = rendezvous.drop_links(&victim_id);
    info!("dropped {dropped} link(s) of client 0 ({victim_id})");

    let updated = json!({ "color": "#0088ff", "font": "Inter", "size": 32 });
    host_style.publish(updated.clone());

    timeout(reconnect_budget, wait_for_new_session(victim, &victim_id))
        .await
        .context("client 0 did not reconnect")??;
    wait_for_value(victim_style, &updated, STEP_TIMEOUT)
        .await
        .context("client 0 did not catch up after reconnecting")?;
    let new_id = victim.local_identity().await;
    info!(
        "client 0 reconnected as {} and caught up",
        new_id.as_ref().map_or("?", Identity::as_str)
    );

    let status = get_session_status(victim).await;
    info!("client 0 status: {}", serde_json::to_string(&status)?);

    // ── Stop ──────────────────────────────────────────────────────────────────
    for (client, _) in &clients {
        client.shutdown();
    }
    host.stop();
    wait_for(&host, ConnectionStatus::Disconnected, STEP_TIMEOUT).await?;
    host.shutdown();

    info!("peerlink demo finished");
    Ok(())
}

async fn wait_for(
    manager: &SessionManager,
    status: ConnectionStatus,
    limit: Duration,
) -> anyhow::Result<()> {
    let mut state = manager.state();
    timeout(limit, state.wait_for_status(status))
        .await
        .with_context(|| format!("timed out waiting for {status:?}"))??;
    Ok(())
}

/// Waits until `manager` is connected again under an identity other than
/// `previous`, i.e. the reconnect procedure built a fresh session.
async fn wait_for_new_session(
    manager: &SessionManager,
    previous: &Identity,
) -> Result<(), peerlink_session::application::SessionError> {
    let mut state = manager.state();
    loop {
        if state.status() == ConnectionStatus::Connected {
            if let Some(current) = manager.local_identity().await {
                if &current != previous {
                    return Ok(());
                }
            }
        }
        state.changed().await?;
    }
}

async fn wait_for_value(
    replicator: &TopicReplicator,
    expected: &serde_json::Value,
    limit: Duration,
) -> anyhow::Result<()> {
    let mut watch = replicator.watch();
    timeout(limit, watch.wait_for(|value| value.as_ref() == Some(expected)))
        .await
        .context("timed out waiting for document")?
        .context("replicator stopped")?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! # signet-daemon
//!
//! Headless bookmark-sync node. This binary provides:
//! - **UDP discovery** broadcasting and collecting instance announcements
//! - **Encrypted sync sessions** (Noise XX handshake, enveloped messages)
//!   guarded by per-address rate limiting and blacklisting
//! - **Two-way merges** of bookmark collections with URL-similarity
//!   duplicate detection
//!
//! Per-browser parsing and write-back are external collaborators; the
//! daemon starts from an empty collection unless one is injected through
//! the source registry by the embedding application.

mod config;

use std::path::Path;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use signet_model::{BookmarkCollection, BrowserTag};
use signet_net::{spawn_discovery, PeerRegistry, SecurityGuard};
use signet_shared::Identity;
use signet_sync::{spawn_engine, EngineCommand, EngineEvent};

use crate::config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,signet_net=debug,signet_sync=debug")),
        )
        .init();

    info!("Starting Signet daemon v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = DaemonConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Identity (load or create the key file)
    // -----------------------------------------------------------------------
    let identity = load_or_create_identity(&config.key_file)?;
    info!(
        peer = %identity.peer_id(),
        fingerprint = %identity.fingerprint(),
        "Identity ready"
    );

    // -----------------------------------------------------------------------
    // 4. Shared state: guard, registry, starting collection
    // -----------------------------------------------------------------------
    let guard = SecurityGuard::new(config.guard_config());
    let registry = PeerRegistry::new();

    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    let collection = BookmarkCollection::new(BrowserTag::Unknown, host);

    // -----------------------------------------------------------------------
    // 5. Spawn background tasks: discovery, guard sweep, engine
    // -----------------------------------------------------------------------
    let (discovery_tx, discovery_rx) = mpsc::channel(64);
    let (_discovery_handle, discovery_shutdown) = spawn_discovery(
        &identity,
        config.discovery_config(),
        registry.clone(),
        discovery_tx,
    )
    .await
    .context("Failed to start discovery")?;

    // Periodic session sweep (the only background task with
    // unconditional side effects)
    let sweep_guard = guard.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            sweep_guard.sweep().await;
        }
    });

    let mut engine = spawn_engine(
        identity,
        config.sync_config(),
        collection,
        guard,
        registry,
        discovery_rx,
    )
    .await
    .context("Failed to start sync engine")?;

    info!(
        addr = %engine.local_addr,
        share_mode = ?config.share_mode,
        "Signet daemon running"
    );

    // -----------------------------------------------------------------------
    // 6. Drain engine events until shutdown
    // -----------------------------------------------------------------------
    loop {
        tokio::select! {
            event = engine.events.recv() => match event {
                Some(event) => log_event(event),
                None => {
                    warn!("Engine event channel closed");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                let _ = engine.commands.send(EngineCommand::Shutdown).await;
                let _ = discovery_shutdown.send(()).await;
                break;
            }
        }
    }

    Ok(())
}

fn log_event(event: EngineEvent) {
    match event {
        EngineEvent::PeerDiscovered(peer) => {
            info!(peer = %peer.peer_id.short(), addr = %peer.addr, name = %peer.instance_name, "Peer discovered")
        }
        EngineEvent::PeerExpired(peer_id) => {
            info!(peer = %peer_id.short(), "Peer expired")
        }
        EngineEvent::PeerConnected { peer_id, addr } => {
            info!(peer = %peer_id.short(), addr = %addr, "Peer connected")
        }
        EngineEvent::PeerDisconnected { peer_id } => {
            info!(peer = %peer_id.short(), "Peer disconnected")
        }
        EngineEvent::ShareReceived { peer_id, result } => {
            info!(peer = %peer_id.short(), summary = %result.summary(), "Bookmarks received")
        }
        EngineEvent::SyncProgress { peer_id, stage } => {
            info!(peer = %peer_id.short(), ?stage, "Sync progress")
        }
        EngineEvent::DuplicateCandidates { peer_id, candidates } => {
            info!(
                peer = %peer_id.short(),
                count = candidates.len(),
                "Duplicate candidates awaiting resolution"
            )
        }
        EngineEvent::SyncCompleted { peer_id, summary } => {
            info!(peer = %peer_id.short(), %summary, "Sync completed")
        }
        EngineEvent::EngineError { peer_id, message } => {
            warn!(peer = ?peer_id.map(|p| p.short()), %message, "Engine error")
        }
    }
}

/// Load the identity from a hex-encoded key file, creating one on first
/// run.
fn load_or_create_identity(path: &Path) -> anyhow::Result<Identity> {
    if path.exists() {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read key file {}", path.display()))?;
        let bytes = hex::decode(content.trim())
            .with_context(|| format!("Key file {} is not valid hex", path.display()))?;
        let secret: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| anyhow::anyhow!("Key file must contain exactly 32 hex-encoded bytes"))?;
        Ok(Identity::from_secret_bytes(&secret))
    } else {
        let identity = Identity::generate();
        std::fs::write(path, hex::encode(identity.secret_bytes()))
            .with_context(|| format!("Failed to write key file {}", path.display()))?;
        info!(path = %path.display(), "Generated new identity key file");
        Ok(identity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_file_roundtrip() {
        let dir = std::env::temp_dir().join("signet_test_identity");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("signet.key");
        let _ = std::fs::remove_file(&path);

        let created = load_or_create_identity(&path).unwrap();
        let reloaded = load_or_create_identity(&path).unwrap();
        assert_eq!(created.peer_id(), reloaded.peer_id());

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_dir(&dir);
    }

    #[test]
    fn test_corrupt_key_file_rejected() {
        let dir = std::env::temp_dir().join("signet_test_identity_bad");
        let _ = std::fs::create_dir_all(&dir);
        let path = dir.join("signet.key");
        std::fs::write(&path, "not-hex-at-all").unwrap();

        assert!(load_or_create_identity(&path).is_err());

        let _ = std::fs::remove_file(&path);
        let _ = std::fs::remove_dir(&dir);
    }
}

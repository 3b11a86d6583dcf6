//! Peer discovery over UDP broadcast.
//!
//! Each instance periodically broadcasts a JSON announcement on the
//! well-known port and listens for announcements from others, upserting
//! them into the shared peer registry. Entries that stop refreshing are
//! evicted after the liveness window; that is an ordinary timeout, not a
//! security event.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use signet_shared::constants::{
    DEFAULT_ANNOUNCE_INTERVAL_SECS, DEFAULT_LIVENESS_WINDOW_SECS, DEFAULT_PORT, PROTOCOL_VERSION,
};
use signet_shared::{Announcement, Capabilities, ConnectionStatus, Identity, PeerId};

/// A peer known to this instance.
#[derive(Debug, Clone)]
pub struct PeerInstance {
    pub peer_id: PeerId,
    pub instance_name: String,
    /// Address to dial for a sync session.
    pub addr: SocketAddr,
    pub fingerprint: String,
    pub capabilities: Capabilities,
    pub last_seen: DateTime<Utc>,
    pub status: ConnectionStatus,
}

/// Registry changes surfaced to the engine.
#[derive(Debug, Clone)]
pub enum DiscoveryUpdate {
    Discovered(PeerInstance),
    Expired(PeerId),
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// UDP port announcements are broadcast and received on.
    pub port: u16,
    /// TCP port advertised for sync sessions.
    pub advertised_port: u16,
    pub instance_name: String,
    pub capabilities: Capabilities,
    pub announce_interval: Duration,
    pub liveness_window: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            advertised_port: DEFAULT_PORT,
            instance_name: "Signet".to_string(),
            capabilities: Capabilities::all(),
            announce_interval: Duration::from_secs(DEFAULT_ANNOUNCE_INTERVAL_SECS),
            liveness_window: Duration::from_secs(DEFAULT_LIVENESS_WINDOW_SECS),
        }
    }
}

/// Shared peer registry: written by the discovery listener and the sync
/// engine, read concurrently by the UI collaborator. Snapshots are
/// consistent clones taken under the read lock.
#[derive(Clone, Default)]
pub struct PeerRegistry {
    inner: Arc<RwLock<HashMap<PeerId, PeerInstance>>>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert from a received announcement. Returns the instance when it
    /// was previously unknown.
    pub async fn apply_announcement(
        &self,
        announcement: &Announcement,
        source: SocketAddr,
    ) -> Option<PeerInstance> {
        let mut map = self.inner.write().await;
        let addr = SocketAddr::new(source.ip(), announcement.port);
        let now = Utc::now();

        match map.get_mut(&announcement.peer_id) {
            Some(existing) => {
                existing.addr = addr;
                existing.last_seen = now;
                None
            }
            None => {
                let instance = PeerInstance {
                    peer_id: announcement.peer_id,
                    instance_name: announcement.instance_name.clone(),
                    addr,
                    fingerprint: announcement.fingerprint.clone(),
                    capabilities: announcement.capabilities,
                    last_seen: now,
                    status: ConnectionStatus::Discovered,
                };
                map.insert(announcement.peer_id, instance.clone());
                info!(
                    peer = %announcement.peer_id.short(),
                    addr = %addr,
                    name = %announcement.instance_name,
                    "Discovered peer"
                );
                Some(instance)
            }
        }
    }

    /// Insert or refresh a peer reached through the manual-connect path.
    pub async fn upsert_manual(&self, peer_id: PeerId, addr: SocketAddr) {
        let mut map = self.inner.write().await;
        map.entry(peer_id)
            .and_modify(|p| {
                p.addr = addr;
                p.last_seen = Utc::now();
            })
            .or_insert_with(|| PeerInstance {
                peer_id,
                instance_name: String::new(),
                addr,
                fingerprint: peer_id.short(),
                capabilities: Capabilities::all(),
                last_seen: Utc::now(),
                status: ConnectionStatus::Discovered,
            });
    }

    /// Record a peer that connected *to us*. The source address carries an
    /// ephemeral port, so an already-known dialable address is preserved.
    pub async fn note_inbound(&self, peer_id: PeerId, addr: SocketAddr) {
        let mut map = self.inner.write().await;
        map.entry(peer_id)
            .and_modify(|p| p.last_seen = Utc::now())
            .or_insert_with(|| PeerInstance {
                peer_id,
                instance_name: String::new(),
                addr,
                fingerprint: peer_id.short(),
                capabilities: Capabilities::all(),
                last_seen: Utc::now(),
                status: ConnectionStatus::Handshaking,
            });
    }

    pub async fn set_status(&self, peer_id: &PeerId, status: ConnectionStatus) {
        let mut map = self.inner.write().await;
        if let Some(peer) = map.get_mut(peer_id) {
            peer.status = status;
        }
    }

    pub async fn get(&self, peer_id: &PeerId) -> Option<PeerInstance> {
        self.inner.read().await.get(peer_id).cloned()
    }

    /// Consistent snapshot of all known peers.
    pub async fn snapshot(&self) -> Vec<PeerInstance> {
        self.inner.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }

    /// Remove peers not seen within the liveness window. Peers with a
    /// live session are kept; discovery silence only expires idle
    /// entries.
    pub async fn evict_stale(&self, liveness: Duration) -> Vec<PeerId> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(liveness).unwrap_or(chrono::Duration::zero());
        let mut map = self.inner.write().await;
        let expired: Vec<PeerId> = map
            .values()
            .filter(|p| {
                p.last_seen < cutoff
                    && matches!(
                        p.status,
                        ConnectionStatus::Discovered | ConnectionStatus::Blacklisted
                    )
            })
            .map(|p| p.peer_id)
            .collect();
        for id in &expired {
            map.remove(id);
            debug!(peer = %id.short(), "Evicted stale peer");
        }
        expired
    }
}

/// Spawn the announcer/listener task.
///
/// Returns the task handle and a shutdown sender; dropping the sender or
/// sending `()` stops the task.
pub async fn spawn_discovery(
    identity: &Identity,
    config: DiscoveryConfig,
    registry: PeerRegistry,
    updates: mpsc::Sender<DiscoveryUpdate>,
) -> std::io::Result<(JoinHandle<()>, mpsc::Sender<()>)> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.port)).await?;
    socket.set_broadcast(true)?;

    let announcement = Announcement {
        peer_id: identity.peer_id(),
        instance_name: config.instance_name.clone(),
        port: config.advertised_port,
        fingerprint: identity.fingerprint(),
        capabilities: config.capabilities,
        version: PROTOCOL_VERSION.to_string(),
    };
    let self_id = identity.peer_id();
    let broadcast_to = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), config.port);

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    info!(
        peer = %self_id.short(),
        port = config.port,
        interval_secs = config.announce_interval.as_secs(),
        "Discovery service started"
    );

    let handle = tokio::spawn(async move {
        let mut announce = tokio::time::interval(config.announce_interval);
        let mut evict = tokio::time::interval(Duration::from_secs(60));
        let mut buf = [0u8; 2048];

        loop {
            tokio::select! {
                _ = announce.tick() => {
                    match announcement.to_json() {
                        Ok(payload) => {
                            if let Err(e) = socket.send_to(&payload, broadcast_to).await {
                                warn!(error = %e, "Failed to broadcast announcement");
                            }
                        }
                        Err(e) => warn!(error = %e, "Failed to encode announcement"),
                    }
                }

                _ = evict.tick() => {
                    for peer_id in registry.evict_stale(config.liveness_window).await {
                        let _ = updates.send(DiscoveryUpdate::Expired(peer_id)).await;
                    }
                }

                recv = socket.recv_from(&mut buf) => {
                    let (len, source) = match recv {
                        Ok(ok) => ok,
                        Err(e) => {
                            warn!(error = %e, "Discovery receive failed");
                            continue;
                        }
                    };
                    let announcement = match Announcement::from_json(&buf[..len]) {
                        Ok(a) => a,
                        Err(e) => {
                            debug!(source = %source, error = %e, "Ignoring malformed announcement");
                            continue;
                        }
                    };
                    // our own broadcast loops back
                    if announcement.peer_id == self_id {
                        continue;
                    }
                    if let Some(instance) =
                        registry.apply_announcement(&announcement, source).await
                    {
                        let _ = updates.send(DiscoveryUpdate::Discovered(instance)).await;
                    }
                }

                _ = shutdown_rx.recv() => {
                    info!("Discovery service shutting down");
                    break;
                }
            }
        }
    });

    Ok((handle, shutdown_tx))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_announcement(id: u8, port: u16) -> Announcement {
        Announcement {
            peer_id: PeerId([id; 32]),
            instance_name: format!("peer-{id}"),
            port,
            fingerprint: hex::encode([id; 4]),
            capabilities: Capabilities::all(),
            version: PROTOCOL_VERSION.to_string(),
        }
    }

    fn source(ip: &str) -> SocketAddr {
        format!("{ip}:50000").parse().unwrap()
    }

    #[tokio::test]
    async fn test_apply_announcement_upserts() {
        let registry = PeerRegistry::new();
        let ann = test_announcement(1, 8765);

        // first sighting is new
        let first = registry.apply_announcement(&ann, source("192.168.1.10")).await;
        assert!(first.is_some());
        let instance = first.unwrap();
        assert_eq!(instance.status, ConnectionStatus::Discovered);
        assert_eq!(instance.addr, "192.168.1.10:8765".parse().unwrap());

        // refresh is not a new discovery, but updates the address
        let again = registry.apply_announcement(&ann, source("192.168.1.11")).await;
        assert!(again.is_none());
        let stored = registry.get(&ann.peer_id).await.unwrap();
        assert_eq!(stored.addr, "192.168.1.11:8765".parse().unwrap());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_snapshot_is_cloned() {
        let registry = PeerRegistry::new();
        registry
            .apply_announcement(&test_announcement(1, 8765), source("10.0.0.1"))
            .await;
        registry
            .apply_announcement(&test_announcement(2, 8765), source("10.0.0.2"))
            .await;

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.len(), 2);
    }

    #[tokio::test]
    async fn test_evict_stale_only_idle_peers() {
        let registry = PeerRegistry::new();
        let ann = test_announcement(3, 8765);
        registry.apply_announcement(&ann, source("10.0.0.3")).await;

        // a syncing peer is not evicted even when silent
        registry.set_status(&ann.peer_id, ConnectionStatus::Syncing).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(registry.evict_stale(Duration::from_millis(1)).await.is_empty());

        registry.set_status(&ann.peer_id, ConnectionStatus::Discovered).await;
        let evicted = registry.evict_stale(Duration::from_millis(1)).await;
        assert_eq!(evicted, vec![ann.peer_id]);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_manual_upsert() {
        let registry = PeerRegistry::new();
        let peer_id = PeerId([9u8; 32]);
        let addr: SocketAddr = "172.16.0.1:8765".parse().unwrap();

        registry.upsert_manual(peer_id, addr).await;
        let stored = registry.get(&peer_id).await.unwrap();
        assert_eq!(stored.addr, addr);
        assert_eq!(stored.status, ConnectionStatus::Discovered);
    }
}

//! Sync engine orchestration with a tokio mpsc command/event pattern.
//!
//! The engine loop runs in a dedicated task. External code (the UI
//! collaborator, the daemon) sends typed commands in and receives status
//! and duplicate-candidate events out, independent of any dispatch loop.
//!
//! Every accepted or dialed connection runs in its own task that
//! exclusively owns its secure channel; there is no lock shared across
//! peer sessions. The bookmark collection and the security guard are the
//! only shared state, each behind its own async lock.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use signet_model::{BookmarkCollection, BookmarkId, DuplicateCandidate, MergeResult};
use signet_net::{
    accept_peer, connect_peer, DiscoveryUpdate, GuardError, HandshakeConfig, NetError,
    PeerInstance, PeerRegistry, SecureChannel, SecurityGuard,
};
use signet_shared::constants::{DEFAULT_PORT, SYNC_TIMEOUT_SECS};
use signet_shared::protocol::ErrorCode;
use signet_shared::{ConnectionStatus, Identity, PeerId, ProtocolError, WireMessage};

use crate::error::SyncError;
use crate::merge::{apply_merge, merge_bookmarks, merge_collections, MergeConfig};

/// Default share behavior offered to the UI collaborator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShareMode {
    #[default]
    All,
    Selected,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub listen_addr: IpAddr,
    pub listen_port: u16,
    pub handshake: HandshakeConfig,
    /// Cap on a full-collection transfer round trip.
    pub sync_timeout: Duration,
    /// Extra connect attempts after the first, with doubling delay.
    /// Handshake and security failures are never retried.
    pub connect_retries: u32,
    pub retry_base_delay: Duration,
    pub merge: MergeConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            listen_port: DEFAULT_PORT,
            handshake: HandshakeConfig::default(),
            sync_timeout: Duration::from_secs(SYNC_TIMEOUT_SECS),
            connect_retries: 3,
            retry_base_delay: Duration::from_secs(1),
            merge: MergeConfig::default(),
        }
    }
}

/// Result of a selective share: ids not found are skipped and reported.
#[derive(Debug, Clone)]
pub struct ShareOutcome {
    pub sent: usize,
    pub missing: Vec<BookmarkId>,
}

/// Commands sent *into* the engine task.
#[derive(Debug)]
pub enum EngineCommand {
    /// Dial a peer (discovered or manually entered address).
    Connect {
        addr: SocketAddr,
        reply: oneshot::Sender<Result<PeerId, SyncError>>,
    },
    /// Close the outbound session with a peer.
    Disconnect { peer_id: PeerId },
    /// Transmit the entire local collection.
    ShareAll {
        peer_id: PeerId,
        reply: oneshot::Sender<Result<usize, SyncError>>,
    },
    /// Transmit a subset by id.
    ShareSelected {
        peer_id: PeerId,
        ids: Vec<BookmarkId>,
        reply: oneshot::Sender<Result<ShareOutcome, SyncError>>,
    },
    /// Request the peer's collection and merge it locally.
    TwoWaySync {
        peer_id: PeerId,
        reply: oneshot::Sender<Result<MergeResult, SyncError>>,
    },
    /// Snapshot of the peer registry.
    GetPeers {
        reply: oneshot::Sender<Vec<PeerInstance>>,
    },
    /// Gracefully stop the engine, listener, and all sessions.
    Shutdown,
}

/// Progress markers emitted during a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStage {
    Requesting,
    Merging,
}

/// Notifications sent *from* the engine to the application.
#[derive(Debug)]
pub enum EngineEvent {
    PeerDiscovered(PeerInstance),
    PeerExpired(PeerId),
    PeerConnected { peer_id: PeerId, addr: SocketAddr },
    PeerDisconnected { peer_id: PeerId },
    /// A peer pushed bookmarks to us; the merge already ran.
    ShareReceived { peer_id: PeerId, result: MergeResult },
    SyncProgress { peer_id: PeerId, stage: SyncStage },
    /// Ambiguous fuzzy pairs needing a manual decision.
    DuplicateCandidates {
        peer_id: PeerId,
        candidates: Vec<DuplicateCandidate>,
    },
    SyncCompleted { peer_id: PeerId, summary: String },
    EngineError {
        peer_id: Option<PeerId>,
        message: String,
    },
}

/// Handle returned by [`spawn_engine`].
pub struct EngineHandle {
    pub commands: mpsc::Sender<EngineCommand>,
    pub events: mpsc::Receiver<EngineEvent>,
    /// Actual bound listener address (useful when the port was 0).
    pub local_addr: SocketAddr,
    pub peer_id: PeerId,
}

struct Shared {
    identity: Identity,
    config: SyncConfig,
    collection: RwLock<BookmarkCollection>,
    guard: SecurityGuard,
    registry: PeerRegistry,
    events: mpsc::Sender<EngineEvent>,
    internal: mpsc::Sender<Internal>,
}

enum Internal {
    /// A dial attempt finished; the engine loop registers the session
    /// before answering the caller, so follow-up commands always see it.
    Dialed {
        result: Result<SecureChannel<TcpStream>, SyncError>,
        reply: oneshot::Sender<Result<PeerId, SyncError>>,
        addr: SocketAddr,
    },
    OutboundClosed { peer_id: PeerId },
}

enum PeerOp {
    ShareAll {
        reply: oneshot::Sender<Result<usize, SyncError>>,
    },
    ShareSelected {
        ids: Vec<BookmarkId>,
        reply: oneshot::Sender<Result<ShareOutcome, SyncError>>,
    },
    TwoWaySync {
        reply: oneshot::Sender<Result<MergeResult, SyncError>>,
    },
    Disconnect,
}

/// Spawn the sync engine: the TCP listener, the command loop, and the
/// bridge from discovery updates to engine events.
pub async fn spawn_engine(
    identity: Identity,
    config: SyncConfig,
    collection: BookmarkCollection,
    guard: SecurityGuard,
    registry: PeerRegistry,
    discovery_rx: mpsc::Receiver<DiscoveryUpdate>,
) -> Result<EngineHandle, SyncError> {
    let listener = TcpListener::bind((config.listen_addr, config.listen_port))
        .await
        .map_err(NetError::from)?;
    let local_addr = listener.local_addr().map_err(NetError::from)?;

    let (cmd_tx, cmd_rx) = mpsc::channel::<EngineCommand>(64);
    let (event_tx, event_rx) = mpsc::channel::<EngineEvent>(256);
    let (internal_tx, internal_rx) = mpsc::channel::<Internal>(64);

    let peer_id = identity.peer_id();
    let shared = Arc::new(Shared {
        identity,
        config,
        collection: RwLock::new(collection),
        guard,
        registry,
        events: event_tx,
        internal: internal_tx,
    });

    // Accept loop: every connection gets its own handler task, so one
    // misbehaving peer never stalls the others.
    let (accept_shutdown_tx, mut accept_shutdown_rx) = mpsc::channel::<()>(1);
    let accept_shared = shared.clone();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = accept_shutdown_rx.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        let shared = accept_shared.clone();
                        tokio::spawn(async move {
                            serve_connection(stream, addr, shared).await;
                        });
                    }
                    Err(e) => warn!(error = %e, "Accept failed"),
                },
            }
        }
        info!("Listener stopped");
    });

    info!(peer = %peer_id.short(), addr = %local_addr, "Sync engine listening");

    tokio::spawn(engine_loop(
        shared,
        cmd_rx,
        internal_rx,
        discovery_rx,
        accept_shutdown_tx,
    ));

    Ok(EngineHandle {
        commands: cmd_tx,
        events: event_rx,
        local_addr,
        peer_id,
    })
}

async fn engine_loop(
    shared: Arc<Shared>,
    mut cmd_rx: mpsc::Receiver<EngineCommand>,
    mut internal_rx: mpsc::Receiver<Internal>,
    mut discovery_rx: mpsc::Receiver<DiscoveryUpdate>,
    accept_shutdown: mpsc::Sender<()>,
) {
    let mut outbound: HashMap<PeerId, mpsc::Sender<PeerOp>> = HashMap::new();
    let mut discovery_done = false;

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(EngineCommand::Connect { addr, reply }) => {
                    // dial in its own task so the loop stays responsive
                    let shared = shared.clone();
                    tokio::spawn(async move {
                        let result = dial(addr, shared.clone()).await;
                        let _ = shared
                            .internal
                            .send(Internal::Dialed { result, reply, addr })
                            .await;
                    });
                }
                Some(EngineCommand::Disconnect { peer_id }) => {
                    match outbound.remove(&peer_id) {
                        Some(op_tx) => {
                            let _ = op_tx.send(PeerOp::Disconnect).await;
                        }
                        None => debug!(peer = %peer_id.short(), "Disconnect: no session"),
                    }
                }
                Some(EngineCommand::ShareAll { peer_id, reply }) => {
                    forward_op(&mut outbound, peer_id, PeerOp::ShareAll { reply }).await;
                }
                Some(EngineCommand::ShareSelected { peer_id, ids, reply }) => {
                    forward_op(&mut outbound, peer_id, PeerOp::ShareSelected { ids, reply })
                        .await;
                }
                Some(EngineCommand::TwoWaySync { peer_id, reply }) => {
                    forward_op(&mut outbound, peer_id, PeerOp::TwoWaySync { reply }).await;
                }
                Some(EngineCommand::GetPeers { reply }) => {
                    let _ = reply.send(shared.registry.snapshot().await);
                }
                Some(EngineCommand::Shutdown) | None => {
                    info!("Engine shutdown requested");
                    let _ = accept_shutdown.send(()).await;
                    for (_, op_tx) in outbound.drain() {
                        let _ = op_tx.send(PeerOp::Disconnect).await;
                    }
                    break;
                }
            },

            Some(internal) = internal_rx.recv() => match internal {
                Internal::Dialed { result, reply, addr } => match result {
                    Ok(channel) => {
                        let peer_id = channel.peer_id();
                        let (op_tx, op_rx) = mpsc::channel::<PeerOp>(16);
                        outbound.insert(peer_id, op_tx);
                        let conn_shared = shared.clone();
                        tokio::spawn(outbound_loop(channel, op_rx, conn_shared));
                        let _ = shared
                            .events
                            .send(EngineEvent::PeerConnected { peer_id, addr })
                            .await;
                        let _ = reply.send(Ok(peer_id));
                    }
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                },
                Internal::OutboundClosed { peer_id } => {
                    outbound.remove(&peer_id);
                }
            },

            update = discovery_rx.recv(), if !discovery_done => match update {
                Some(DiscoveryUpdate::Discovered(instance)) => {
                    let _ = shared.events.send(EngineEvent::PeerDiscovered(instance)).await;
                }
                Some(DiscoveryUpdate::Expired(peer_id)) => {
                    let _ = shared.events.send(EngineEvent::PeerExpired(peer_id)).await;
                }
                None => discovery_done = true,
            },
        }
    }
    info!("Engine stopped");
}

/// Route an operation to the peer's connection task, answering with
/// `NotConnected` when there is no live outbound session.
async fn forward_op(
    outbound: &mut HashMap<PeerId, mpsc::Sender<PeerOp>>,
    peer_id: PeerId,
    op: PeerOp,
) {
    let Some(op_tx) = outbound.get(&peer_id).cloned() else {
        reject_op(op, peer_id);
        return;
    };
    if let Err(send_err) = op_tx.send(op).await {
        outbound.remove(&peer_id);
        reject_op(send_err.0, peer_id);
    }
}

fn reject_op(op: PeerOp, peer_id: PeerId) {
    match op {
        PeerOp::ShareAll { reply } => {
            let _ = reply.send(Err(SyncError::NotConnected(peer_id)));
        }
        PeerOp::ShareSelected { reply, .. } => {
            let _ = reply.send(Err(SyncError::NotConnected(peer_id)));
        }
        PeerOp::TwoWaySync { reply } => {
            let _ = reply.send(Err(SyncError::NotConnected(peer_id)));
        }
        PeerOp::Disconnect => {}
    }
}

/// Dial-side connection establishment: guard admission, TCP connect with
/// timeout, handshake, session registration.
async fn dial(addr: SocketAddr, shared: Arc<Shared>) -> Result<SecureChannel<TcpStream>, SyncError> {
    shared.guard.admit(addr.ip()).await.map_err(NetError::from)?;

    // network failures get bounded backoff; anything past the TCP
    // connect (handshake, verification) fails immediately
    let mut attempt = 0u32;
    let stream = loop {
        let outcome = timeout(shared.config.handshake.timeout, TcpStream::connect(addr)).await;
        let err = match outcome {
            Ok(Ok(stream)) => break stream,
            Ok(Err(e)) => SyncError::Net(NetError::from(e)),
            Err(_) => SyncError::Timeout("connect"),
        };
        if attempt >= shared.config.connect_retries {
            return Err(err);
        }
        let delay = shared.config.retry_base_delay * 2u32.pow(attempt);
        attempt += 1;
        warn!(addr = %addr, attempt, error = %err, "Connect failed, retrying");
        tokio::time::sleep(delay).await;
    };

    let channel = connect_peer(stream, &shared.identity, &shared.config.handshake).await?;
    let peer_id = channel.peer_id();

    shared
        .guard
        .register_session(channel.token(), peer_id, addr.ip())
        .await
        .map_err(NetError::from)?;
    shared.registry.upsert_manual(peer_id, addr).await;
    shared
        .registry
        .set_status(&peer_id, ConnectionStatus::Authenticated)
        .await;

    info!(peer = %peer_id.short(), addr = %addr, "Connected to peer");
    Ok(channel)
}

/// Owns the outbound channel for one peer and executes its operations.
/// Any failed operation closes the connection; the peer can reconnect.
async fn outbound_loop(
    mut channel: SecureChannel<TcpStream>,
    mut op_rx: mpsc::Receiver<PeerOp>,
    shared: Arc<Shared>,
) {
    let peer_id = channel.peer_id();
    shared.registry.set_status(&peer_id, ConnectionStatus::Idle).await;

    while let Some(op) = op_rx.recv().await {
        shared.registry.set_status(&peer_id, ConnectionStatus::Syncing).await;
        let failed = match op {
            PeerOp::Disconnect => break,
            PeerOp::ShareAll { reply } => {
                let result = share(&mut channel, &shared, None).await;
                let failed = result.is_err();
                let _ = reply.send(result.map(|outcome| outcome.sent));
                failed
            }
            PeerOp::ShareSelected { ids, reply } => {
                let result = share(&mut channel, &shared, Some(ids)).await;
                let failed = result.is_err();
                let _ = reply.send(result);
                failed
            }
            PeerOp::TwoWaySync { reply } => {
                let result = two_way_sync(&mut channel, &shared).await;
                let failed = result.is_err();
                let _ = reply.send(result);
                failed
            }
        };
        shared.guard.touch_session(&channel.token()).await;
        shared.registry.set_status(&peer_id, ConnectionStatus::Idle).await;
        if failed {
            break;
        }
    }

    channel.close().await;
    shared.guard.close_session(&channel.token()).await;
    shared
        .registry
        .set_status(&peer_id, ConnectionStatus::Discovered)
        .await;
    let _ = shared
        .internal
        .send(Internal::OutboundClosed { peer_id })
        .await;
    let _ = shared
        .events
        .send(EngineEvent::PeerDisconnected { peer_id })
        .await;
    debug!(peer = %peer_id.short(), "Outbound session closed");
}

/// Push the local collection (or a subset) and await the receipt.
async fn share(
    channel: &mut SecureChannel<TcpStream>,
    shared: &Shared,
    ids: Option<Vec<BookmarkId>>,
) -> Result<ShareOutcome, SyncError> {
    let (source, host, bookmarks, missing) = {
        let collection = shared.collection.read().await;
        match ids {
            None => (
                collection.source,
                collection.host.clone(),
                collection.all_bookmarks().into_iter().cloned().collect::<Vec<_>>(),
                Vec::new(),
            ),
            Some(ids) => {
                let mut found = Vec::new();
                let mut missing = Vec::new();
                for id in ids {
                    match collection.get(id) {
                        Some(b) => found.push(b.clone()),
                        None => missing.push(id),
                    }
                }
                (collection.source, collection.host.clone(), found, missing)
            }
        }
    };

    if !missing.is_empty() {
        warn!(count = missing.len(), "Share skipping unknown bookmark ids");
    }

    let sent = bookmarks.len();
    channel
        .send(&WireMessage::Share { source, host, bookmarks })
        .await?;

    let reply = timeout(shared.config.sync_timeout, channel.recv())
        .await
        .map_err(|_| SyncError::Timeout("share receipt"))??;

    match reply {
        WireMessage::Ack { received } => {
            debug!(sent, received, "Share acknowledged");
            Ok(ShareOutcome { sent, missing })
        }
        WireMessage::Error { code, detail } => {
            Err(SyncError::PeerError(format!("{code:?}: {detail}")))
        }
        other => Err(SyncError::Unexpected(other.name())),
    }
}

/// Request the peer's full collection and merge it into ours.
async fn two_way_sync(
    channel: &mut SecureChannel<TcpStream>,
    shared: &Shared,
) -> Result<MergeResult, SyncError> {
    let peer_id = channel.peer_id();
    let local_version = shared.collection.read().await.version;

    let _ = shared
        .events
        .send(EngineEvent::SyncProgress {
            peer_id,
            stage: SyncStage::Requesting,
        })
        .await;
    channel
        .send(&WireMessage::SyncRequest {
            collection_version: local_version,
        })
        .await?;

    let reply = timeout(shared.config.sync_timeout, channel.recv())
        .await
        .map_err(|_| SyncError::Timeout("collection transfer"))??;
    let incoming = match reply {
        WireMessage::SyncData { collection } => collection,
        WireMessage::Error { code, detail } => {
            return Err(SyncError::PeerError(format!("{code:?}: {detail}")))
        }
        other => return Err(SyncError::Unexpected(other.name())),
    };

    let _ = shared
        .events
        .send(EngineEvent::SyncProgress {
            peer_id,
            stage: SyncStage::Merging,
        })
        .await;

    // merge and apply under one write guard so concurrent syncs cannot
    // interleave between classification and application
    let result = {
        let mut local = shared.collection.write().await;
        let result = merge_collections(&local, &incoming, &shared.config.merge);
        apply_merge(&mut local, &result);
        result
    };

    if !result.candidates.is_empty() {
        let _ = shared
            .events
            .send(EngineEvent::DuplicateCandidates {
                peer_id,
                candidates: result.candidates.clone(),
            })
            .await;
    }
    let _ = shared
        .events
        .send(EngineEvent::SyncCompleted {
            peer_id,
            summary: result.summary(),
        })
        .await;

    info!(peer = %peer_id.short(), summary = %result.summary(), "Two-way sync complete");
    Ok(result)
}

/// Handler for one accepted connection: admission, handshake, then the
/// serve loop answering the remote peer's requests. Failures here are
/// isolated to this connection.
async fn serve_connection(stream: TcpStream, addr: SocketAddr, shared: Arc<Shared>) {
    // admission control happens before any handshake work
    if let Err(e) = shared.guard.admit(addr.ip()).await {
        debug!(addr = %addr, error = %e, "Inbound connection rejected");
        return;
    }

    let mut channel = match accept_peer(stream, &shared.identity, &shared.config.handshake).await {
        Ok(channel) => channel,
        Err(e) => {
            warn!(addr = %addr, error = %e, "Inbound handshake failed");
            shared.guard.record_strike(addr.ip(), "handshake failure").await;
            return;
        }
    };
    let peer_id = channel.peer_id();

    if let Err(e) = shared
        .guard
        .register_session(channel.token(), peer_id, addr.ip())
        .await
    {
        warn!(peer = %peer_id.short(), error = %e, "Session rejected");
        let code = match e {
            GuardError::RateLimited => ErrorCode::RateLimited,
            GuardError::Blacklisted => ErrorCode::Blacklisted,
            GuardError::AtCapacity => ErrorCode::AtCapacity,
            GuardError::TokenInUse => ErrorCode::Internal,
        };
        let _ = channel
            .send(&WireMessage::Error { code, detail: e.to_string() })
            .await;
        channel.close().await;
        return;
    }

    shared.registry.note_inbound(peer_id, addr).await;
    shared
        .registry
        .set_status(&peer_id, ConnectionStatus::Authenticated)
        .await;
    let _ = shared
        .events
        .send(EngineEvent::PeerConnected { peer_id, addr })
        .await;

    loop {
        let message = match channel.recv().await {
            Ok(message) => message,
            Err(NetError::ConnectionClosed) => break,
            Err(NetError::Protocol(ProtocolError::Replay { got, last })) => {
                warn!(
                    peer = %peer_id.short(),
                    got, last,
                    "Replay detected, dropping message"
                );
                shared.guard.record_strike(addr.ip(), "replay").await;
                if shared.guard.is_blacklisted(addr.ip()).await {
                    shared
                        .registry
                        .set_status(&peer_id, ConnectionStatus::Blacklisted)
                        .await;
                    break;
                }
                continue;
            }
            Err(NetError::Protocol(ProtocolError::SessionExpired)) => {
                debug!(peer = %peer_id.short(), "Session expired, peer must re-handshake");
                break;
            }
            Err(NetError::Protocol(e)) => {
                warn!(peer = %peer_id.short(), error = %e, "Dropping malformed message");
                shared.guard.record_strike(addr.ip(), "malformed message").await;
                if shared.guard.is_blacklisted(addr.ip()).await {
                    shared
                        .registry
                        .set_status(&peer_id, ConnectionStatus::Blacklisted)
                        .await;
                    break;
                }
                continue;
            }
            Err(e) => {
                debug!(peer = %peer_id.short(), error = %e, "Connection error");
                break;
            }
        };

        shared.guard.touch_session(&channel.token()).await;
        shared.registry.set_status(&peer_id, ConnectionStatus::Syncing).await;
        let served = handle_request(&mut channel, message, addr, &shared).await;
        shared.registry.set_status(&peer_id, ConnectionStatus::Idle).await;
        if served.is_err() {
            break;
        }
    }

    channel.close().await;
    shared.guard.close_session(&channel.token()).await;
    shared
        .registry
        .set_status(&peer_id, ConnectionStatus::Discovered)
        .await;
    let _ = shared
        .events
        .send(EngineEvent::PeerDisconnected { peer_id })
        .await;
    debug!(peer = %peer_id.short(), "Inbound session closed");
}

async fn handle_request(
    channel: &mut SecureChannel<TcpStream>,
    message: WireMessage,
    addr: SocketAddr,
    shared: &Shared,
) -> Result<(), NetError> {
    let peer_id = channel.peer_id();
    match message {
        WireMessage::SyncRequest { collection_version } => {
            debug!(
                peer = %peer_id.short(),
                peer_version = collection_version,
                "Serving collection"
            );
            let collection = shared.collection.read().await.clone();
            channel.send(&WireMessage::SyncData { collection }).await
        }

        WireMessage::Share { source, host, bookmarks } => {
            let received = bookmarks.len() as u32;
            debug!(
                peer = %peer_id.short(),
                source = %source,
                host = %host,
                count = received,
                "Received shared bookmarks"
            );
            let result = {
                let mut local = shared.collection.write().await;
                let result = merge_bookmarks(&local, &bookmarks, &shared.config.merge);
                apply_merge(&mut local, &result);
                result
            };
            if !result.candidates.is_empty() {
                let _ = shared
                    .events
                    .send(EngineEvent::DuplicateCandidates {
                        peer_id,
                        candidates: result.candidates.clone(),
                    })
                    .await;
            }
            let _ = shared
                .events
                .send(EngineEvent::ShareReceived { peer_id, result })
                .await;
            channel.send(&WireMessage::Ack { received }).await
        }

        WireMessage::Error { code, detail } => {
            warn!(peer = %peer_id.short(), ?code, detail, "Peer reported error");
            Ok(())
        }

        other => {
            shared.guard.record_strike(addr.ip(), "unexpected message").await;
            channel
                .send(&WireMessage::Error {
                    code: ErrorCode::BadMessage,
                    detail: format!("unexpected {}", other.name()),
                })
                .await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use signet_model::{Bookmark, BrowserTag};
    use signet_net::GuardConfig;

    fn bookmark(url: &str, path: &[&str]) -> Bookmark {
        Bookmark::new(
            url,
            url,
            path.iter().map(|s| s.to_string()).collect(),
            BrowserTag::Firefox,
        )
        .unwrap()
    }

    fn collection(bookmarks: Vec<Bookmark>) -> BookmarkCollection {
        let mut coll = BookmarkCollection::new(BrowserTag::Firefox, "test-host");
        for b in bookmarks {
            coll.insert(b).unwrap();
        }
        coll
    }

    async fn test_engine(collection: BookmarkCollection) -> EngineHandle {
        let config = SyncConfig {
            listen_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            listen_port: 0,
            sync_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        // discovery is not under test; the closed channel is tolerated
        let (_discovery_tx, discovery_rx) = mpsc::channel(8);

        spawn_engine(
            Identity::generate(),
            config,
            collection,
            SecurityGuard::new(GuardConfig::default()),
            PeerRegistry::new(),
            discovery_rx,
        )
        .await
        .unwrap()
    }

    async fn connect(a: &EngineHandle, b: &EngineHandle) -> PeerId {
        let (reply_tx, reply_rx) = oneshot::channel();
        a.commands
            .send(EngineCommand::Connect {
                addr: b.local_addr,
                reply: reply_tx,
            })
            .await
            .unwrap();
        let peer_id = reply_rx.await.unwrap().unwrap();
        assert_eq!(peer_id, b.peer_id);
        peer_id
    }

    async fn next_event_matching<F: Fn(&EngineEvent) -> bool>(
        handle: &mut EngineHandle,
        predicate: F,
    ) -> EngineEvent {
        timeout(Duration::from_secs(5), async {
            loop {
                let event = handle.events.recv().await.expect("event channel closed");
                if predicate(&event) {
                    return event;
                }
            }
        })
        .await
        .expect("expected event not observed")
    }

    #[tokio::test]
    async fn test_share_all_merges_on_receiver() {
        let a = test_engine(collection(vec![
            bookmark("https://example.com/a", &[]),
            bookmark("https://example.com/b", &["News"]),
        ]))
        .await;
        let mut b = test_engine(collection(vec![])).await;

        let peer = connect(&a, &b).await;

        let (reply_tx, reply_rx) = oneshot::channel();
        a.commands
            .send(EngineCommand::ShareAll {
                peer_id: peer,
                reply: reply_tx,
            })
            .await
            .unwrap();
        assert_eq!(reply_rx.await.unwrap().unwrap(), 2);

        let event = next_event_matching(&mut b, |e| {
            matches!(e, EngineEvent::ShareReceived { .. })
        })
        .await;
        match event {
            EngineEvent::ShareReceived { result, .. } => {
                assert_eq!(result.added.len(), 2);
                assert!(result.updated.is_empty());
            }
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_share_selected_reports_missing_ids() {
        let known = bookmark("https://example.com/known", &[]);
        let known_id = known.id;
        let a = test_engine(collection(vec![known])).await;
        let b = test_engine(collection(vec![])).await;

        let peer = connect(&a, &b).await;

        let missing_id = signet_model::BookmarkId::new();
        let (reply_tx, reply_rx) = oneshot::channel();
        a.commands
            .send(EngineCommand::ShareSelected {
                peer_id: peer,
                ids: vec![known_id, missing_id],
                reply: reply_tx,
            })
            .await
            .unwrap();

        let outcome = reply_rx.await.unwrap().unwrap();
        assert_eq!(outcome.sent, 1);
        assert_eq!(outcome.missing, vec![missing_id]);
    }

    #[tokio::test]
    async fn test_two_way_sync_adds_and_converges() {
        let a = test_engine(collection(vec![bookmark("https://example.com/a", &[])])).await;
        let b = test_engine(collection(vec![
            bookmark("https://example.com/a", &[]),
            bookmark("https://other.org/x", &["Work", "Projects"]),
        ]))
        .await;

        let peer = connect(&a, &b).await;

        let (reply_tx, reply_rx) = oneshot::channel();
        a.commands
            .send(EngineCommand::TwoWaySync {
                peer_id: peer,
                reply: reply_tx,
            })
            .await
            .unwrap();
        let first = reply_rx.await.unwrap().unwrap();
        assert_eq!(first.added.len(), 1);
        assert_eq!(
            first.folders_created,
            vec![vec!["Work".to_string(), "Projects".to_string()]]
        );

        // idempotence: no intervening changes, so the second run is a noop
        let (reply_tx, reply_rx) = oneshot::channel();
        a.commands
            .send(EngineCommand::TwoWaySync {
                peer_id: peer,
                reply: reply_tx,
            })
            .await
            .unwrap();
        let second = reply_rx.await.unwrap().unwrap();
        assert!(second.is_noop(), "second sync was {}", second.summary());
    }

    #[tokio::test]
    async fn test_connect_failure_surfaced_after_retries() {
        let config = SyncConfig {
            listen_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            listen_port: 0,
            connect_retries: 1,
            retry_base_delay: Duration::from_millis(10),
            ..Default::default()
        };
        let (_discovery_tx, discovery_rx) = mpsc::channel(8);
        let a = spawn_engine(
            Identity::generate(),
            config,
            collection(vec![]),
            SecurityGuard::new(GuardConfig::default()),
            PeerRegistry::new(),
            discovery_rx,
        )
        .await
        .unwrap();

        // nobody is listening on this ephemeral port
        let dead = {
            let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            probe.local_addr().unwrap()
        };

        let (reply_tx, reply_rx) = oneshot::channel();
        a.commands
            .send(EngineCommand::Connect {
                addr: dead,
                reply: reply_tx,
            })
            .await
            .unwrap();
        assert!(reply_rx.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_operations_require_connection() {
        let a = test_engine(collection(vec![])).await;
        let stranger = PeerId([5u8; 32]);

        let (reply_tx, reply_rx) = oneshot::channel();
        a.commands
            .send(EngineCommand::ShareAll {
                peer_id: stranger,
                reply: reply_tx,
            })
            .await
            .unwrap();
        assert!(matches!(
            reply_rx.await.unwrap(),
            Err(SyncError::NotConnected(p)) if p == stranger
        ));
    }

    #[tokio::test]
    async fn test_disconnect_releases_session() {
        let mut a = test_engine(collection(vec![])).await;
        let b = test_engine(collection(vec![])).await;

        let peer = connect(&a, &b).await;

        a.commands
            .send(EngineCommand::Disconnect { peer_id: peer })
            .await
            .unwrap();

        next_event_matching(&mut a, |e| {
            matches!(e, EngineEvent::PeerDisconnected { peer_id } if *peer_id == peer)
        })
        .await;

        // the session slot is gone: further ops are NotConnected
        let (reply_tx, reply_rx) = oneshot::channel();
        a.commands
            .send(EngineCommand::ShareAll {
                peer_id: peer,
                reply: reply_tx,
            })
            .await
            .unwrap();
        assert!(matches!(
            reply_rx.await.unwrap(),
            Err(SyncError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_get_peers_snapshot() {
        let a = test_engine(collection(vec![])).await;
        let b = test_engine(collection(vec![])).await;

        connect(&a, &b).await;

        let (reply_tx, reply_rx) = oneshot::channel();
        a.commands
            .send(EngineCommand::GetPeers { reply: reply_tx })
            .await
            .unwrap();
        let peers = reply_rx.await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].peer_id, b.peer_id);
    }
}

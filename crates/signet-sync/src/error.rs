use thiserror::Error;

use signet_net::NetError;
use signet_shared::PeerId;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No active session with peer {0}")]
    NotConnected(PeerId),

    #[error("Network error: {0}")]
    Net(#[from] NetError),

    #[error("Operation timed out: {0}")]
    Timeout(&'static str),

    #[error("Peer sent unexpected message: {0}")]
    Unexpected(&'static str),

    #[error("Peer reported error: {0}")]
    PeerError(String),

    #[error("Engine is shut down")]
    EngineClosed,
}

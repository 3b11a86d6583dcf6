use serde::{Deserialize, Serialize};

use signet_model::{Bookmark, BookmarkCollection, BrowserTag};

use crate::constants::{NONCE_SIZE, TAG_SIZE};
use crate::crypto::{open_detached, seal_detached, SymmetricKey};
use crate::error::ProtocolError;
use crate::types::{Capabilities, PeerId, SessionToken};

/// All wire messages exchanged between peers over an established
/// connection. Handshake-interior messages travel inside the Noise
/// transport; everything else is wrapped in an [`Envelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum WireMessage {
    /// Binds an Ed25519 identity to the Noise handshake (signature over
    /// the handshake hash).
    HandshakeAuth {
        peer_id: PeerId,
        signature: Vec<u8>,
    },

    /// Issued by the acceptor after both identities verified.
    SessionGrant {
        token: SessionToken,
        ttl_secs: u64,
    },

    /// Push bookmarks to the peer (share-all or share-selected).
    Share {
        source: BrowserTag,
        host: String,
        bookmarks: Vec<Bookmark>,
    },

    /// Ask the peer for its full collection.
    SyncRequest {
        collection_version: u64,
    },

    /// Full collection transfer answering a `SyncRequest`.
    SyncData {
        collection: BookmarkCollection,
    },

    /// Receipt for a `Share`.
    Ack {
        received: u32,
    },

    /// Typed protocol-level failure.
    Error {
        code: ErrorCode,
        detail: String,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    RateLimited,
    Blacklisted,
    AtCapacity,
    BadMessage,
    SessionExpired,
    Internal,
}

impl WireMessage {
    /// Serialize to binary (bincode)
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        bincode::deserialize(data).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    /// Message name for logs and `Unexpected` errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::HandshakeAuth { .. } => "HandshakeAuth",
            Self::SessionGrant { .. } => "SessionGrant",
            Self::Share { .. } => "Share",
            Self::SyncRequest { .. } => "SyncRequest",
            Self::SyncData { .. } => "SyncData",
            Self::Ack { .. } => "Ack",
            Self::Error { .. } => "Error",
        }
    }
}

/// Post-handshake message envelope: the sequence number is bound into
/// the authentication tag as associated data, so a tampered or replayed
/// sequence cannot slip past verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub sequence: u64,
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
    pub tag: [u8; TAG_SIZE],
}

impl Envelope {
    /// Encrypt a message under the session key with the given sequence.
    pub fn seal(
        key: &SymmetricKey,
        sequence: u64,
        message: &WireMessage,
    ) -> Result<Self, ProtocolError> {
        let plaintext = message.to_bytes()?;
        let (nonce, ciphertext, tag) =
            seal_detached(key, &sequence.to_le_bytes(), &plaintext)
                .map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        Ok(Self {
            sequence,
            nonce,
            ciphertext,
            tag,
        })
    }

    /// Verify the tag and decrypt. Sequence monotonicity is enforced by
    /// the session, after this verification succeeds.
    pub fn open(&self, key: &SymmetricKey) -> Result<WireMessage, ProtocolError> {
        let plaintext = open_detached(
            key,
            &self.sequence.to_le_bytes(),
            &self.nonce,
            &self.ciphertext,
            &self.tag,
        )
        .map_err(|_| ProtocolError::Malformed("envelope verification failed".into()))?;
        WireMessage::from_bytes(&plaintext)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        bincode::serialize(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, ProtocolError> {
        bincode::deserialize(data).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

/// Discovery announcement broadcast on the well-known UDP port.
/// JSON-encoded so foreign instances stay debuggable on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Announcement {
    pub peer_id: PeerId,
    pub instance_name: String,
    pub port: u16,
    pub fingerprint: String,
    pub capabilities: Capabilities,
    pub version: String,
}

impl Announcement {
    pub fn to_json(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn from_json(data: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(data).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

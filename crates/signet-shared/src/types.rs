use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::constants::SESSION_TOKEN_SIZE;

// Peer identity = Ed25519 public key (32 bytes)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PeerId(pub [u8; 32]);

impl PeerId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl std::fmt::Display for PeerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Random, time-bound token identifying one live session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SessionToken(pub [u8; SESSION_TOKEN_SIZE]);

impl SessionToken {
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_TOKEN_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Lifecycle of a peer as tracked by the registry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionStatus {
    Discovered,
    Connecting,
    Handshaking,
    Authenticated,
    Syncing,
    Idle,
    Blacklisted,
}

/// Capability flags advertised in discovery announcements.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    /// Accepts full-collection share pushes.
    pub share: bool,
    /// Serves its collection for two-way sync requests.
    pub sync: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self { share: true, sync: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_id_hex_roundtrip() {
        let id = PeerId([7u8; 32]);
        let hex = id.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(PeerId::from_hex(&hex).unwrap(), id);
        assert_eq!(id.short().len(), 8);
    }

    #[test]
    fn test_peer_id_from_bad_hex() {
        assert!(PeerId::from_hex("abcd").is_err());
        assert!(PeerId::from_hex("zz").is_err());
    }

    #[test]
    fn test_session_tokens_unique() {
        let a = SessionToken::generate();
        let b = SessionToken::generate();
        assert_ne!(a, b);
    }
}

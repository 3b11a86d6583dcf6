use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignetError {
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Noise handshake error: {0}")]
    Noise(#[from] NoiseError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Decryption failed: invalid ciphertext or wrong key")]
    DecryptionFailed,

    #[error("Invalid key length")]
    InvalidKeyLength,
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("Invalid key bytes")]
    InvalidKeyBytes,

    #[error("Signature verification failed")]
    InvalidSignature,

    #[error("Key file error: {0}")]
    KeyFile(String),
}

#[derive(Error, Debug)]
pub enum NoiseError {
    #[error("Noise handshake error: {0}")]
    Handshake(String),

    #[error("Noise transport error: {0}")]
    Transport(String),
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    Malformed(String),

    #[error("Replayed sequence number {got}, last accepted {last}")]
    Replay { got: u64, last: u64 },

    #[error("Session expired")]
    SessionExpired,

    #[error("Unexpected message type: {0}")]
    Unexpected(&'static str),
}

use thiserror::Error;

use signet_shared::{NoiseError, ProtocolError};

/// Admission-control rejections. All of them are recorded before any
/// handshake work happens.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardError {
    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Source address is blacklisted")]
    Blacklisted,

    #[error("Connection capacity reached")]
    AtCapacity,

    #[error("Session token already in use")]
    TokenInUse,
}

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Admission rejected: {0}")]
    Guard(#[from] GuardError),

    #[error("Handshake failed: {0}")]
    Noise(#[from] NoiseError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Peer identity rejected: {0}")]
    Identity(String),

    #[error("Operation timed out: {0}")]
    Timeout(&'static str),

    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

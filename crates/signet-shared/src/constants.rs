/// Protocol version string exchanged in announcements
pub const PROTOCOL_VERSION: &str = "/signet/1.0.0";

/// Application name
pub const APP_NAME: &str = "Signet";

/// XChaCha20-Poly1305 nonce size in bytes
pub const NONCE_SIZE: usize = 24;

/// Poly1305 authentication tag size in bytes
pub const TAG_SIZE: usize = 16;

/// Ed25519 public key size in bytes
pub const PUBKEY_SIZE: usize = 32;

/// Symmetric session key size in bytes
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Session token size in bytes
pub const SESSION_TOKEN_SIZE: usize = 16;

/// Maximum framed message size in bytes (1 MiB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Default TCP port for sync sessions and UDP port for discovery
pub const DEFAULT_PORT: u16 = 8765;

/// Discovery announcement interval in seconds
pub const DEFAULT_ANNOUNCE_INTERVAL_SECS: u64 = 5;

/// Peers with no announcement within this window are evicted
pub const DEFAULT_LIVENESS_WINDOW_SECS: u64 = 300;

/// Session time-to-live in seconds
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

/// Handshake must complete within this many seconds
pub const HANDSHAKE_TIMEOUT_SECS: u64 = 10;

/// A full collection transfer must complete within this many seconds
pub const SYNC_TIMEOUT_SECS: u64 = 30;

/// Key derivation contexts (BLAKE3)
pub const KDF_CONTEXT_SESSION_KEY: &str = "signet-session-key-v1";
pub const KDF_CONTEXT_NOISE_STATIC: &str = "signet-noise-static-v1";

/// Default fuzzy similarity threshold for duplicate candidates
pub const DEFAULT_FUZZY_THRESHOLD: f64 = 0.8;

// Networking layer: length-prefixed framing, admission control,
// UDP discovery, and the authenticated encrypted session channel.

pub mod channel;
pub mod discovery;
pub mod error;
pub mod framing;
pub mod guard;

pub use channel::{accept_peer, connect_peer, HandshakeConfig, SecureChannel, SecureSession};
pub use discovery::{spawn_discovery, DiscoveryConfig, DiscoveryUpdate, PeerInstance, PeerRegistry};
pub use error::{GuardError, NetError};
pub use framing::FramedStream;
pub use guard::{GuardConfig, SecurityGuard};

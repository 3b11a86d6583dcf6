// Identity, cryptography, and the wire protocol shared by every peer.

pub mod constants;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod noise;
pub mod protocol;
pub mod types;

pub use crypto::SymmetricKey;
pub use error::{CryptoError, IdentityError, NoiseError, ProtocolError, SignetError};
pub use identity::Identity;
pub use protocol::{Announcement, Envelope, WireMessage};
pub use types::{Capabilities, ConnectionStatus, PeerId, SessionToken};

//! Authenticated encrypted sessions.
//!
//! A connection moves through Connecting -> Handshaking -> Authenticated
//! -> Active -> Closed. The handshake runs Noise XX over length-prefixed
//! frames, binds each side's Ed25519 identity by signing the handshake
//! hash, and ends with the acceptor issuing a session token. After that,
//! every message travels in a sequence-numbered AEAD envelope; anything
//! at or below the last accepted sequence is a replay and is dropped.

use std::time::{Duration, Instant};

use ed25519_dalek::Signature;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::timeout;
use tracing::debug;

use signet_shared::constants::{DEFAULT_SESSION_TTL_SECS, HANDSHAKE_TIMEOUT_SECS};
use signet_shared::crypto::derive_session_key;
use signet_shared::identity::verify_signature;
use signet_shared::noise::{
    build_initiator, build_responder, into_transport, transport_decrypt, transport_encrypt,
};
use signet_shared::{
    Envelope, Identity, PeerId, ProtocolError, SessionToken, SymmetricKey, WireMessage,
};

use crate::error::NetError;
use crate::framing::FramedStream;

#[derive(Debug, Clone)]
pub struct HandshakeConfig {
    pub session_ttl: Duration,
    pub timeout: Duration,
}

impl Default for HandshakeConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            timeout: Duration::from_secs(HANDSHAKE_TIMEOUT_SECS),
        }
    }
}

/// Session-scoped state, exclusively owned by its connection handler.
pub struct SecureSession {
    pub peer_id: PeerId,
    pub token: SessionToken,
    key: SymmetricKey,
    send_seq: u64,
    last_recv_seq: u64,
    expires_at: Instant,
}

impl SecureSession {
    fn new(peer_id: PeerId, token: SessionToken, key: SymmetricKey, ttl: Duration) -> Self {
        Self {
            peer_id,
            token,
            key,
            send_seq: 0,
            last_recv_seq: 0,
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Wrap a message in the next-sequence envelope.
    pub fn seal(&mut self, message: &WireMessage) -> Result<Envelope, ProtocolError> {
        if self.is_expired() {
            return Err(ProtocolError::SessionExpired);
        }
        self.send_seq += 1;
        Envelope::seal(&self.key, self.send_seq, message)
    }

    /// Verify and unwrap an envelope. The tag is checked first (AEAD
    /// open); only then is the sequence compared, so a forged sequence
    /// never reaches the replay check.
    pub fn open(&mut self, envelope: &Envelope) -> Result<WireMessage, ProtocolError> {
        if self.is_expired() {
            return Err(ProtocolError::SessionExpired);
        }
        let message = envelope.open(&self.key)?;
        if envelope.sequence <= self.last_recv_seq {
            return Err(ProtocolError::Replay {
                got: envelope.sequence,
                last: self.last_recv_seq,
            });
        }
        self.last_recv_seq = envelope.sequence;
        Ok(message)
    }
}

/// An established encrypted channel: framed stream plus session state.
pub struct SecureChannel<S> {
    stream: FramedStream<S>,
    pub session: SecureSession,
}

impl<S: AsyncRead + AsyncWrite + Unpin> SecureChannel<S> {
    pub fn peer_id(&self) -> PeerId {
        self.session.peer_id
    }

    pub fn token(&self) -> SessionToken {
        self.session.token
    }

    pub async fn send(&mut self, message: &WireMessage) -> Result<(), NetError> {
        let envelope = self.session.seal(message)?;
        self.stream.send_frame(&envelope.to_bytes()?).await
    }

    pub async fn recv(&mut self) -> Result<WireMessage, NetError> {
        let frame = self.stream.recv_frame().await?;
        let envelope = Envelope::from_bytes(&frame)?;
        Ok(self.session.open(&envelope)?)
    }

    /// Close the underlying stream promptly.
    pub async fn close(&mut self) {
        let _ = self.stream.shutdown().await;
    }
}

/// Dial-side handshake. The caller has already passed guard admission.
pub async fn connect_peer<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    identity: &Identity,
    config: &HandshakeConfig,
) -> Result<SecureChannel<S>, NetError> {
    timeout(config.timeout, initiate(stream, identity))
        .await
        .map_err(|_| NetError::Timeout("handshake"))?
}

/// Accept-side handshake, issuing the session token.
pub async fn accept_peer<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    identity: &Identity,
    config: &HandshakeConfig,
) -> Result<SecureChannel<S>, NetError> {
    timeout(config.timeout, respond(stream, identity, config.session_ttl))
        .await
        .map_err(|_| NetError::Timeout("handshake"))?
}

async fn initiate<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    identity: &Identity,
) -> Result<SecureChannel<S>, NetError> {
    let mut framed = FramedStream::new(stream);
    let mut hs = build_initiator(&identity.noise_static_secret())?;
    let mut buf = vec![0u8; 1024];

    // XX msg1: e
    let len = hs
        .write_message(&[], &mut buf)
        .map_err(|e| NetError::Identity(format!("handshake init: {e}")))?;
    framed.send_frame(&buf[..len]).await?;

    // XX msg2: e, ee, s, es
    let msg2 = framed.recv_frame().await?;
    hs.read_message(&msg2, &mut buf)
        .map_err(|e| NetError::Identity(format!("handshake response: {e}")))?;

    // XX msg3: s, se
    let len = hs
        .write_message(&[], &mut buf)
        .map_err(|e| NetError::Identity(format!("handshake finish: {e}")))?;
    framed.send_frame(&buf[..len]).await?;

    let (mut transport, hash) = into_transport(hs)?;
    let key = derive_session_key(&hash);

    // identity binding: we prove first, then verify the acceptor
    let auth = WireMessage::HandshakeAuth {
        peer_id: identity.peer_id(),
        signature: identity.sign(&hash).to_bytes().to_vec(),
    };
    let sealed = transport_encrypt(&mut transport, &auth.to_bytes()?)?;
    framed.send_frame(&sealed).await?;

    let frame = framed.recv_frame().await?;
    let plain = transport_decrypt(&mut transport, &frame)?;
    let peer_id = verify_auth(&WireMessage::from_bytes(&plain)?, &hash)?;

    // the acceptor issues the session token
    let frame = framed.recv_frame().await?;
    let plain = transport_decrypt(&mut transport, &frame)?;
    let (token, ttl_secs) = match WireMessage::from_bytes(&plain)? {
        WireMessage::SessionGrant { token, ttl_secs } => (token, ttl_secs),
        other => return Err(ProtocolError::Unexpected(other.name()).into()),
    };

    debug!(peer = %peer_id.short(), token = %token, "Session established (initiator)");
    Ok(SecureChannel {
        stream: framed,
        session: SecureSession::new(peer_id, token, key, Duration::from_secs(ttl_secs)),
    })
}

async fn respond<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    identity: &Identity,
    session_ttl: Duration,
) -> Result<SecureChannel<S>, NetError> {
    let mut framed = FramedStream::new(stream);
    let mut hs = build_responder(&identity.noise_static_secret())?;
    let mut buf = vec![0u8; 1024];

    let msg1 = framed.recv_frame().await?;
    hs.read_message(&msg1, &mut buf)
        .map_err(|e| NetError::Identity(format!("handshake init: {e}")))?;

    let len = hs
        .write_message(&[], &mut buf)
        .map_err(|e| NetError::Identity(format!("handshake response: {e}")))?;
    framed.send_frame(&buf[..len]).await?;

    let msg3 = framed.recv_frame().await?;
    hs.read_message(&msg3, &mut buf)
        .map_err(|e| NetError::Identity(format!("handshake finish: {e}")))?;

    let (mut transport, hash) = into_transport(hs)?;
    let key = derive_session_key(&hash);

    // verify the initiator's identity before revealing ours
    let frame = framed.recv_frame().await?;
    let plain = transport_decrypt(&mut transport, &frame)?;
    let peer_id = verify_auth(&WireMessage::from_bytes(&plain)?, &hash)?;

    let auth = WireMessage::HandshakeAuth {
        peer_id: identity.peer_id(),
        signature: identity.sign(&hash).to_bytes().to_vec(),
    };
    let sealed = transport_encrypt(&mut transport, &auth.to_bytes()?)?;
    framed.send_frame(&sealed).await?;

    let token = SessionToken::generate();
    let grant = WireMessage::SessionGrant {
        token,
        ttl_secs: session_ttl.as_secs(),
    };
    let sealed = transport_encrypt(&mut transport, &grant.to_bytes()?)?;
    framed.send_frame(&sealed).await?;

    debug!(peer = %peer_id.short(), token = %token, "Session established (acceptor)");
    Ok(SecureChannel {
        stream: framed,
        session: SecureSession::new(peer_id, token, key, session_ttl),
    })
}

fn verify_auth(message: &WireMessage, hash: &[u8; 32]) -> Result<PeerId, NetError> {
    let (peer_id, signature) = match message {
        WireMessage::HandshakeAuth { peer_id, signature } => (peer_id, signature),
        other => return Err(ProtocolError::Unexpected(other.name()).into()),
    };
    let signature = Signature::from_slice(signature)
        .map_err(|_| NetError::Identity("malformed signature".into()))?;
    verify_signature(&peer_id.0, hash, &signature)
        .map_err(|e| NetError::Identity(e.to_string()))?;
    Ok(*peer_id)
}

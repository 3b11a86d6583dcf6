//! Length-prefixed frames over any ordered byte stream.
//!
//! Every handshake and envelope message travels as one frame: a u32
//! big-endian length followed by the payload. Frames above
//! `MAX_MESSAGE_SIZE` are rejected before allocation.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use signet_shared::constants::MAX_MESSAGE_SIZE;

use crate::error::NetError;

/// A framed wrapper owning the underlying stream.
pub struct FramedStream<S> {
    inner: S,
}

impl<S: AsyncRead + AsyncWrite + Unpin> FramedStream<S> {
    pub fn new(inner: S) -> Self {
        Self { inner }
    }

    pub async fn send_frame(&mut self, payload: &[u8]) -> Result<(), NetError> {
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(NetError::FrameTooLarge(payload.len()));
        }
        self.inner.write_u32(payload.len() as u32).await?;
        self.inner.write_all(payload).await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn recv_frame(&mut self) -> Result<Vec<u8>, NetError> {
        let len = match self.inner.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(NetError::ConnectionClosed)
            }
            Err(e) => return Err(e.into()),
        };
        if len > MAX_MESSAGE_SIZE {
            return Err(NetError::FrameTooLarge(len));
        }
        let mut payload = vec![0u8; len];
        self.inner.read_exact(&mut payload).await?;
        Ok(payload)
    }

    /// Shut down the write half, signalling EOF to the peer.
    pub async fn shutdown(&mut self) -> Result<(), NetError> {
        self.inner.shutdown().await?;
        Ok(())
    }
}

//! Framed connection I/O.
//!
//! The reader owns one half of the socket plus a scan buffer shared by both
//! framings: control frames are consumed up to their terminating newline,
//! and any bytes left behind (a client may pipeline a frame and raw data in
//! one write) are drained by subsequent chunk reads before the socket is
//! touched again. Every read applies a caller-supplied deadline.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::ProtocolError;
use crate::message::Message;
use crate::state::State;

/// Buffer size for socket reads and storage streaming.
pub const DEFAULT_BUFFER_SIZE: usize = 1024;

/// Upper bound on a single control frame.
const MAX_FRAME_LEN: usize = 64 * 1024;

/// Decodes control frames and raw chunks from one half of the socket.
#[derive(Debug)]
pub struct MessageReader<R> {
    inner: R,
    buf: BytesMut,
}

impl<R> MessageReader<R>
where
    R: AsyncRead + Unpin,
{
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(2 * DEFAULT_BUFFER_SIZE),
        }
    }

    /// Reads one newline-delimited control frame under `deadline`.
    ///
    /// Blank lines are skipped. A peer close at a frame boundary surfaces as
    /// [`ProtocolError::Closed`].
    pub async fn read_message(&mut self, deadline: Duration) -> Result<Message, ProtocolError> {
        loop {
            while let Some(pos) = memchr::memchr(b'\n', &self.buf) {
                let line = self.buf.split_to(pos + 1);
                let line = line[..pos].trim_ascii();
                if line.is_empty() {
                    continue;
                }
                return Ok(serde_json::from_slice(line)?);
            }
            if self.buf.len() > MAX_FRAME_LEN {
                return Err(ProtocolError::Oversized(MAX_FRAME_LEN));
            }
            let n = timeout(deadline, self.inner.read_buf(&mut self.buf))
                .await
                .map_err(|_| ProtocolError::Timeout(deadline))??;
            if n == 0 {
                return Err(ProtocolError::Closed);
            }
        }
    }

    /// Reads up to `max_len` raw bytes under `deadline`.
    ///
    /// Bytes already buffered by a previous frame read are returned first.
    /// A clean EOF yields an empty chunk and no error; the caller
    /// distinguishes by state.
    pub async fn read_chunk(
        &mut self,
        deadline: Duration,
        max_len: usize,
    ) -> Result<Bytes, ProtocolError> {
        if self.buf.is_empty() {
            self.buf.reserve(max_len);
            let n = timeout(deadline, self.inner.read_buf(&mut self.buf))
                .await
                .map_err(|_| ProtocolError::Timeout(deadline))??;
            if n == 0 {
                return Ok(Bytes::new());
            }
        }
        let n = self.buf.len().min(max_len);
        Ok(self.buf.split_to(n).freeze())
    }
}

/// Encodes control frames and raw chunks onto one half of the socket.
#[derive(Debug)]
pub struct MessageWriter<W> {
    inner: W,
}

impl<W> MessageWriter<W>
where
    W: AsyncWrite + Unpin,
{
    #[must_use]
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    /// Writes one control frame followed by its terminating newline.
    pub async fn write_message(&mut self, message: &Message) -> Result<(), ProtocolError> {
        let mut frame = serde_json::to_vec(message)?;
        frame.push(b'\n');
        self.inner.write_all(&frame).await?;
        self.inner.flush().await?;
        Ok(())
    }

    /// Writes a frame carrying only `state`.
    pub async fn write_state(&mut self, state: State) -> Result<(), ProtocolError> {
        self.write_message(&Message::with_state(state)).await
    }

    /// Writes an `ERROR` state frame with a descriptive payload.
    pub async fn write_error_state(&mut self, message: &str) -> Result<(), ProtocolError> {
        self.write_message(&Message::error_state(message)?).await
    }

    /// The raw byte sink, for streaming a file straight onto the socket.
    pub fn sink(&mut self) -> &mut W {
        &mut self.inner
    }
}

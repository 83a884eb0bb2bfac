//! Buffered frame endpoints over the two halves of a connection.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::buffer::PooledBuffer;
use crate::frame::{Frame, FrameCodec, FrameError};

/// Read side of a connection. Only one task may own it.
#[derive(Debug)]
pub struct FrameReader<R> {
    io: R,
    buf: PooledBuffer,
    codec: FrameCodec,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(io: R, buf: PooledBuffer, codec: FrameCodec) -> Self {
        Self { io, buf, codec }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` when the peer closed the connection on a frame
    /// boundary. Cancel safe: bytes already read stay buffered.
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.buf)? {
                return Ok(Some(frame));
            }

            if self.io.read_buf(&mut *self.buf).await? == 0 {
                if self.buf.is_empty() {
                    return Ok(None);
                }
                return Err(FrameError::Truncated {
                    buffered: self.buf.len(),
                });
            }
        }
    }
}

/// Write side of a connection. Only one task may own it.
#[derive(Debug)]
pub struct FrameWriter<W> {
    io: W,
    buf: PooledBuffer,
    codec: FrameCodec,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(io: W, buf: PooledBuffer, codec: FrameCodec) -> Self {
        Self { io, buf, codec }
    }

    /// Encode `frame`, write it out and flush.
    pub async fn write_frame(&mut self, frame: Frame) -> Result<(), FrameError> {
        self.buf.clear();
        self.codec.encode(frame, &mut self.buf)?;
        self.io.write_all(&self.buf).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Close the write direction of the connection.
    pub async fn shutdown(&mut self) -> Result<(), FrameError> {
        self.io.shutdown().await?;
        Ok(())
    }
}

//! Incremental frame reassembly.
//!
//! A [`FrameReader`] accumulates bytes from one connection and yields every
//! complete frame body, however the transport happened to split the
//! stream: a length prefix spread over several reads, a payload spread over
//! several reads, or several frames in a single read.

use {
    crate::{
        codec::LENGTH_PREFIX_LEN,
        error::{ConsensusNetError, Result},
    },
    bytes::{Buf, Bytes, BytesMut},
    tokio::io::{AsyncRead, AsyncReadExt},
};

const READ_CHUNK: usize = 8 * 1024;

/// Per-connection reassembly buffer.
#[derive(Debug)]
pub struct FrameReader {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameReader {
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(READ_CHUNK),
            max_frame_size,
        }
    }

    /// Append `bytes` and return every frame body completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(bytes);
        self.drain_frames()
    }

    /// Split the next complete frame body off the buffer, if there is one.
    ///
    /// An announced length above `max_frame_size` is an error: the stream
    /// can no longer be trusted to be in sync.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>> {
        if self.buffer.len() < LENGTH_PREFIX_LEN {
            return Ok(None);
        }
        let len = u32::from_be_bytes([
            self.buffer[0],
            self.buffer[1],
            self.buffer[2],
            self.buffer[3],
        ]) as usize;
        if len > self.max_frame_size {
            return Err(ConsensusNetError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }
        if self.buffer.len() < LENGTH_PREFIX_LEN.saturating_add(len) {
            self.buffer.reserve(LENGTH_PREFIX_LEN.saturating_add(len));
            return Ok(None);
        }
        self.buffer.advance(LENGTH_PREFIX_LEN);
        Ok(Some(self.buffer.split_to(len).freeze()))
    }

    /// Read exactly one frame, leaving anything after it buffered.
    pub async fn read_frame<R>(&mut self, reader: &mut R) -> Result<Bytes>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            if let Some(frame) = self.next_frame()? {
                return Ok(frame);
            }
            if reader.read_buf(&mut self.buffer).await? == 0 {
                return Err(ConsensusNetError::TransportClosed);
            }
        }
    }

    /// Read from `reader` until at least one frame completes.
    ///
    /// Returns [`ConsensusNetError::TransportClosed`] on an orderly close and
    /// [`ConsensusNetError::Transport`] when the read fails.
    pub async fn read_frames<R>(&mut self, reader: &mut R) -> Result<Vec<Bytes>>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let frames = self.drain_frames()?;
            if !frames.is_empty() {
                return Ok(frames);
            }
            if reader.read_buf(&mut self.buffer).await? == 0 {
                return Err(ConsensusNetError::TransportClosed);
            }
        }
    }

    /// Bytes received but not yet part of a complete frame.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn drain_frames(&mut self) -> Result<Vec<Bytes>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

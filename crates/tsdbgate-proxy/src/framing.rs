//! Short-read message framing.
//!
//! The wire protocol has no length prefix. A message is whatever arrives
//! until one read returns fewer bytes than the chunk size; chunks that
//! fill the buffer exactly are concatenated with the next read. Both the
//! client side and the upstream side frame this way.
//!
//! This is a heuristic. A message whose length is an exact multiple of
//! the chunk size waits for more bytes, and a message that the network
//! splits into short segments is delivered as several messages.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Outcome of one framing cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A short read completed the message.
    Complete(Vec<u8>),
    /// No bytes arrived within the idle timeout; holds what was gathered.
    Idle(Vec<u8>),
    /// The peer closed the stream; holds what was gathered before EOF.
    Eof(Vec<u8>),
}

/// Reads frames using a reusable chunk buffer.
#[derive(Debug)]
pub struct FrameReader {
    chunk: Vec<u8>,
    idle_timeout: Option<Duration>,
}

impl FrameReader {
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk: vec![0u8; chunk_size.max(1)],
            idle_timeout: None,
        }
    }

    /// Bound how long a single chunk read may wait.
    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk.len()
    }

    pub async fn read_frame<R>(&mut self, reader: &mut R) -> io::Result<Frame>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let chunk_size = self.chunk.len();
        let mut message = Vec::new();

        loop {
            let n = match self.idle_timeout {
                Some(limit) => {
                    match tokio::time::timeout(limit, reader.read(&mut self.chunk)).await {
                        Ok(read) => read?,
                        Err(_) => return Ok(Frame::Idle(message)),
                    }
                }
                None => reader.read(&mut self.chunk).await?,
            };

            if n == 0 {
                return Ok(Frame::Eof(message));
            }
            message.extend_from_slice(&self.chunk[..n]);
            if n < chunk_size {
                return Ok(Frame::Complete(message));
            }
        }
    }
}

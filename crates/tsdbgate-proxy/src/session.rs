//! Per-connection session loop.
//!
//! A session reads one framed message, hands it to the backend, writes
//! the response (if any) and repeats. Messages within a session are
//! strictly sequential: the next read starts only after the previous
//! response has been written.
//!
//! The loop ends when the client closes, when a read or write fails, or
//! when the backend answers `None`. The stream is shut down once on
//! every exit path.

use std::fmt;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::backend::Backend;
use crate::framing::{Frame, FrameReader};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Client closed its side (zero-byte read).
    PeerClosed,
    /// Backend answered `None`.
    NoResponse,
    ReadError,
    WriteError,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionEnd::PeerClosed => "peer closed",
            SessionEnd::NoResponse => "no response",
            SessionEnd::ReadError => "read error",
            SessionEnd::WriteError => "write error",
        };
        f.write_str(s)
    }
}

/// Counters for one finished session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub messages: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub end: SessionEnd,
}

/// Drive one client connection to completion.
pub async fn run_session<S>(mut stream: S, backend: &dyn Backend, chunk_size: usize) -> SessionSummary
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = FrameReader::new(chunk_size);
    let mut messages = 0u64;
    let mut bytes_in = 0u64;
    let mut bytes_out = 0u64;

    let end = loop {
        let message = match reader.read_frame(&mut stream).await {
            Ok(Frame::Complete(message)) | Ok(Frame::Idle(message)) => message,
            Ok(Frame::Eof(partial)) => {
                if !partial.is_empty() {
                    debug!(bytes = partial.len(), "discarding partial message at close");
                }
                break SessionEnd::PeerClosed;
            }
            Err(e) => {
                debug!(error = %e, "client read failed");
                break SessionEnd::ReadError;
            }
        };

        messages += 1;
        bytes_in += message.len() as u64;
        trace!(bytes = message.len(), backend = backend.kind(), "message received");

        let response = match backend.handle(&message).await {
            Some(response) => response,
            None => break SessionEnd::NoResponse,
        };
        if response.is_empty() {
            continue;
        }

        if let Err(e) = stream.write_all(&response).await {
            debug!(error = %e, "client write failed");
            break SessionEnd::WriteError;
        }
        if let Err(e) = stream.flush().await {
            debug!(error = %e, "client flush failed");
            break SessionEnd::WriteError;
        }
        bytes_out += response.len() as u64;
    };

    if let Err(e) = stream.shutdown().await {
        trace!(error = %e, "client shutdown failed");
    }

    SessionSummary {
        messages,
        bytes_in,
        bytes_out,
        end,
    }
}

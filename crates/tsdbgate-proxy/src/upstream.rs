//! Upstream connector — the single shared connection to the database.
//!
//! The connector owns at most one TCP stream. It is opened lazily by the
//! first `send`, reused by every later `send`, and thrown away when any
//! transport error occurs so that the following `send` dials again.
//! A response read that hits the response timeout also discards the
//! stream: a late reply must never be read back by the next `send`,
//! which may belong to another session.
//! All access goes through one async mutex: concurrent sessions queue
//! behind each other instead of interleaving bytes on the shared socket.
//!
//! # Architecture
//!
//! ```text
//! send(message)
//!   → lock slot
//!     → slot empty → resolve host, try each address with connect timeout
//!     → write message
//!     → read frames until a short read (or idle timeout)
//!   → short read: stream goes back into the slot
//!   → timeout / EOF: stream dropped, gathered bytes returned
//!   → failure: stream dropped, error returned
//! ```

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use tsdbgate_core::UpstreamSettings;

use crate::error::{UpstreamError, UpstreamResult};
use crate::framing::{Frame, FrameReader};

struct Connection {
    stream: TcpStream,
    reader: FrameReader,
    peer: SocketAddr,
}

/// Lazily-connected, mutex-guarded connection to a fixed upstream address.
pub struct UpstreamConnector {
    target: String,
    chunk_size: usize,
    connect_timeout: Duration,
    response_timeout: Option<Duration>,
    slot: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for UpstreamConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConnector")
            .field("target", &self.target)
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl UpstreamConnector {
    pub fn new(settings: &UpstreamSettings, chunk_size: usize) -> Self {
        Self {
            target: settings.endpoint(),
            chunk_size: chunk_size.max(1),
            connect_timeout: settings.connect_timeout,
            response_timeout: settings.response_timeout,
            slot: Mutex::new(None),
        }
    }

    /// `host:port` this connector dials.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Whether a connection is currently held.
    pub async fn is_connected(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Send one message and read back the response.
    ///
    /// The returned bytes may be empty when a response timeout is
    /// configured and the upstream stayed silent. In that case the
    /// connection is not kept, so the next call dials again.
    pub async fn send(&self, message: &[u8]) -> UpstreamResult<Vec<u8>> {
        let mut slot = self.slot.lock().await;

        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => self.connect().await?,
        };

        match self.exchange(&mut conn, message).await {
            Ok((response, open)) => {
                if open {
                    *slot = Some(conn);
                } else {
                    debug!(peer = %conn.peer, "releasing upstream connection after partial response");
                }
                Ok(response)
            }
            Err(e) => {
                warn!(peer = %conn.peer, error = %e, "dropping upstream connection");
                Err(e)
            }
        }
    }

    /// Establish a new connection, trying every resolved address in order.
    async fn connect(&self) -> UpstreamResult<Connection> {
        let target = self.target.clone();
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(target.as_str())
            .await
            .map_err(|source| UpstreamError::Resolve {
                target: target.clone(),
                source,
            })?
            .collect();

        if addrs.is_empty() {
            return Err(UpstreamError::NoAddresses(target));
        }

        let mut last_err = None;
        for addr in addrs {
            match tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => {
                    // Disable Nagle's algorithm; messages are small and latency-bound.
                    let _ = stream.set_nodelay(true);
                    info!(upstream = %target, peer = %addr, "connected to upstream");
                    return Ok(Connection {
                        stream,
                        reader: FrameReader::new(self.chunk_size)
                            .with_idle_timeout(self.response_timeout),
                        peer: addr,
                    });
                }
                Ok(Err(e)) => {
                    debug!(peer = %addr, error = %e, "upstream candidate refused");
                    last_err = Some(e);
                }
                Err(_) => {
                    debug!(peer = %addr, timeout = ?self.connect_timeout, "upstream candidate timed out");
                    last_err = Some(io::Error::new(
                        io::ErrorKind::TimedOut,
                        format!("connect timed out after {:?}", self.connect_timeout),
                    ));
                }
            }
        }

        Err(UpstreamError::Connect {
            target,
            source: last_err
                .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no candidates")),
        })
    }

    /// Write `message` and read one framed response.
    ///
    /// Returns the response and whether the connection is still usable.
    async fn exchange(
        &self,
        conn: &mut Connection,
        message: &[u8],
    ) -> UpstreamResult<(Vec<u8>, bool)> {
        conn.stream
            .write_all(message)
            .await
            .map_err(UpstreamError::Send)?;
        conn.stream.flush().await.map_err(UpstreamError::Send)?;

        let frame = conn
            .reader
            .read_frame(&mut conn.stream)
            .await
            .map_err(UpstreamError::Receive)?;

        match frame {
            Frame::Complete(response) => Ok((response, true)),
            // The reply may still be in flight.
            Frame::Idle(response) => Ok((response, false)),
            Frame::Eof(response) if response.is_empty() => Err(UpstreamError::Closed),
            Frame::Eof(response) => Ok((response, false)),
        }
    }
}

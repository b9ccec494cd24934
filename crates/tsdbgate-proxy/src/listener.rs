//! Connection listener.
//!
//! Accepts TCP connections, terminates TLS, and runs one session task
//! per connection. A semaphore bounds the number of live sessions: the
//! listener takes a permit *before* accepting, so once the limit is
//! reached new connections wait in the kernel backlog until a session
//! finishes.
//!
//! A client must finish the TLS handshake within the handshake timeout,
//! otherwise its connection is dropped and the permit returned.
//!
//! On shutdown the listener stops accepting and waits for in-flight
//! sessions to finish on their own.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, watch};
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use tsdbgate_core::ProxySettings;

use crate::backend::Backend;
use crate::error::{ProxyError, ProxyResult};
use crate::session::run_session;
use crate::tls;

/// Handshake limit used by [`Listener::bind_with`].
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause after a failed `accept` (usually fd exhaustion) before retrying.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Bound listener, ready to serve.
pub struct Listener {
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    backend: Arc<dyn Backend>,
    sessions: Arc<Semaphore>,
    max_sessions: usize,
    chunk_size: usize,
    handshake_timeout: Duration,
}

impl Listener {
    /// Bind according to validated settings, loading TLS material if configured.
    pub async fn bind(settings: &ProxySettings, backend: Arc<dyn Backend>) -> ProxyResult<Self> {
        let acceptor = match &settings.tls {
            Some(paths) => Some(tls::load_acceptor(&paths.cert, &paths.key)?),
            None => {
                warn!("TLS disabled; accepting plaintext connections");
                None
            }
        };

        Self::bind_with(
            &settings.listen_addr,
            acceptor,
            backend,
            settings.max_sessions,
            settings.chunk_size,
        )
        .await
        .map(|listener| listener.with_handshake_timeout(settings.handshake_timeout))
    }

    /// Bind with an explicit acceptor (`None` for plaintext).
    pub async fn bind_with(
        addr: &str,
        acceptor: Option<TlsAcceptor>,
        backend: Arc<dyn Backend>,
        max_sessions: usize,
        chunk_size: usize,
    ) -> ProxyResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ProxyError::Bind {
                addr: addr.to_string(),
                source,
            })?;

        let max_sessions = max_sessions.max(1);
        Ok(Self {
            listener,
            acceptor,
            backend,
            sessions: Arc::new(Semaphore::new(max_sessions)),
            max_sessions,
            chunk_size,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
        })
    }

    pub fn with_handshake_timeout(mut self, handshake_timeout: Duration) -> Self {
        self.handshake_timeout = handshake_timeout;
        self
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` flips (or its sender is dropped),
    /// then wait for every running session to end.
    pub async fn serve(self, mut shutdown: watch::Receiver<bool>) {
        let addr = self.local_addr().ok();
        info!(
            addr = ?addr,
            tls = self.acceptor.is_some(),
            backend = self.backend.kind(),
            max_sessions = self.max_sessions,
            "listening"
        );

        let mut tasks = JoinSet::new();

        loop {
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = self.sessions.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            let (tcp, peer) = tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        // Usually fd exhaustion; keep serving existing sessions.
                        warn!(error = %e, "accept failed");
                        drop(permit);
                        tokio::select! {
                            _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => continue,
                            _ = shutdown.changed() => break,
                        }
                    }
                },
                _ = shutdown.changed() => break,
            };

            while tasks.try_join_next().is_some() {}

            tasks.spawn(handle_connection(
                tcp,
                peer,
                self.acceptor.clone(),
                self.backend.clone(),
                self.chunk_size,
                self.handshake_timeout,
                permit,
            ));
        }

        info!(active = tasks.len(), "stopped accepting; draining sessions");
        while tasks.join_next().await.is_some() {}
        info!("listener stopped");
    }
}

async fn handle_connection(
    tcp: TcpStream,
    peer: SocketAddr,
    acceptor: Option<TlsAcceptor>,
    backend: Arc<dyn Backend>,
    chunk_size: usize,
    handshake_timeout: Duration,
    _permit: OwnedSemaphorePermit,
) {
    let _ = tcp.set_nodelay(true);
    debug!(%peer, "connection accepted");

    let summary = match acceptor {
        Some(acceptor) => {
            match tokio::time::timeout(handshake_timeout, acceptor.accept(tcp)).await {
                Ok(Ok(stream)) => run_session(stream, backend.as_ref(), chunk_size).await,
                Ok(Err(e)) => {
                    debug!(%peer, error = %e, "TLS handshake failed");
                    return;
                }
                Err(_) => {
                    debug!(%peer, timeout = ?handshake_timeout, "TLS handshake timed out");
                    return;
                }
            }
        }
        None => run_session(tcp, backend.as_ref(), chunk_size).await,
    };

    debug!(
        %peer,
        messages = summary.messages,
        bytes_in = summary.bytes_in,
        bytes_out = summary.bytes_out,
        reason = %summary.end,
        "session closed"
    );
}

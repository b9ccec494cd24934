//! Error types for the relay.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type UpstreamResult<T> = Result<T, UpstreamError>;
pub type TlsResult<T> = Result<T, TlsError>;
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Failures talking to the upstream database.
///
/// Every variant except the resolution/connect ones is raised after the
/// connector has discarded its stream, so the next send reconnects.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("failed to resolve upstream {target}: {source}")]
    Resolve { target: String, source: io::Error },

    #[error("upstream {0} resolved to no addresses")]
    NoAddresses(String),

    #[error("failed to connect to upstream {target}: {source}")]
    Connect { target: String, source: io::Error },

    #[error("upstream send failed: {0}")]
    Send(io::Error),

    #[error("upstream receive failed: {0}")]
    Receive(io::Error),

    #[error("upstream closed the connection")]
    Closed,
}

/// Failures loading the listener's certificate material.
#[derive(Debug, Error)]
pub enum TlsError {
    #[error("failed to read {path}: {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("malformed PEM: {0}")]
    Pem(io::Error),

    #[error("no certificates found in PEM input")]
    NoCertificates,

    #[error("no private key found in PEM input")]
    NoPrivateKey,

    #[error("tls configuration rejected: {0}")]
    Rustls(#[from] rustls::Error),
}

/// Startup failures of the listener.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: String, source: io::Error },

    #[error("tls setup failed: {0}")]
    Tls(#[from] TlsError),
}

//! TLS termination for incoming client connections.
//!
//! Loads a PEM certificate chain and private key and builds the
//! `tokio-rustls` acceptor the listener wraps every accepted socket with.

use std::path::Path;
use std::sync::Arc;

use rustls::ServerConfig;
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;
use tracing::debug;

use crate::error::{TlsError, TlsResult};

/// Build an acceptor from certificate and key files.
pub fn load_acceptor(cert_path: &Path, key_path: &Path) -> TlsResult<TlsAcceptor> {
    let cert_pem = read(cert_path)?;
    let key_pem = read(key_path)?;
    let acceptor = acceptor_from_pem(&cert_pem, &key_pem)?;
    debug!(cert = %cert_path.display(), key = %key_path.display(), "loaded TLS material");
    Ok(acceptor)
}

/// Build an acceptor from in-memory PEM data.
pub fn acceptor_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> TlsResult<TlsAcceptor> {
    let certs = parse_certs(cert_pem)?;
    let key = parse_key(key_pem)?;

    let config = ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()?
    .with_no_client_auth()
    .with_single_cert(certs, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn read(path: &Path) -> TlsResult<Vec<u8>> {
    std::fs::read(path).map_err(|source| TlsError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn parse_certs(pem: &[u8]) -> TlsResult<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(TlsError::Pem)?;
    if certs.is_empty() {
        return Err(TlsError::NoCertificates);
    }
    Ok(certs)
}

fn parse_key(pem: &[u8]) -> TlsResult<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(TlsError::Pem)?
        .ok_or(TlsError::NoPrivateKey)
}

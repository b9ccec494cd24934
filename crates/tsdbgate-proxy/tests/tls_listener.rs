//! End-to-end TLS tests: a real listener, a self-signed certificate, and a
//! rustls client.

use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_rustls::TlsConnector;

use tsdbgate_core::ProxyConfig;
use tsdbgate_proxy::{Backend, Listener, MockBackend, build_backend, tls};

struct TestCert {
    _dir: tempfile::TempDir,
    cert_path: std::path::PathBuf,
    key_path: std::path::PathBuf,
    der: rustls::pki_types::CertificateDer<'static>,
}

fn write_test_cert() -> TestCert {
    let ck = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let cert_path = dir.path().join("cert.pem");
    let key_path = dir.path().join("key.pem");
    std::fs::write(&cert_path, ck.cert.pem()).unwrap();
    std::fs::write(&key_path, ck.key_pair.serialize_pem()).unwrap();

    TestCert {
        _dir: dir,
        cert_path,
        key_path,
        der: ck.cert.der().clone(),
    }
}

fn connector(cert: &TestCert) -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.add(cert.der.clone()).unwrap();

    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

async fn tls_client(
    addr: std::net::SocketAddr,
    cert: &TestCert,
) -> tokio_rustls::client::TlsStream<TcpStream> {
    let tcp = TcpStream::connect(addr).await.unwrap();
    let name = ServerName::try_from("localhost").unwrap();
    connector(cert).connect(name, tcp).await.unwrap()
}

#[tokio::test]
async fn mock_backend_answers_version_over_tls() {
    let cert = write_test_cert();
    let acceptor = tls::load_acceptor(&cert.cert_path, &cert.key_path).unwrap();
    let backend = Arc::new(MockBackend::new("0.1\n"));

    let listener = Listener::bind_with("127.0.0.1:0", Some(acceptor), backend.clone(), 16, 4096)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(listener.serve(shutdown_rx));

    let mut client = tls_client(addr, &cert).await;
    client.write_all(b"version\n").await.unwrap();
    let mut buf = [0u8; 4];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"0.1\n");

    // Any other message is recorded and the server hangs up.
    let put = b"put test.my.value 1366155625 42 host=h password=pencil user=joshua\n";
    client.write_all(put).await.unwrap();
    let mut rest = Vec::new();
    let _ = client.read_to_end(&mut rest).await;
    assert!(rest.is_empty());

    shutdown_tx.send(true).unwrap();
    server.await.unwrap();

    assert_eq!(backend.messages(), vec![b"version\n".to_vec(), put.to_vec()]);
}

#[tokio::test]
async fn plaintext_client_does_not_reach_backend() {
    let cert = write_test_cert();
    let acceptor = tls::load_acceptor(&cert.cert_path, &cert.key_path).unwrap();
    let backend = Arc::new(MockBackend::default());

    let listener = Listener::bind_with("127.0.0.1:0", Some(acceptor), backend.clone(), 16, 4096)
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(listener.serve(shutdown_rx));

    let mut tcp = TcpStream::connect(addr).await.unwrap();
    tcp.write_all(b"version\n").await.unwrap();
    let mut rest = Vec::new();
    let _ = tcp.read_to_end(&mut rest).await;

    shutdown_tx.send(true).unwrap();
    server.await.unwrap();
    assert!(backend.messages().is_empty());
}

#[tokio::test]
async fn listener_binds_from_validated_config() {
    let cert = write_test_cert();
    let toml_str = format!(
        r#"
[listen]
host = "127.0.0.1"
port = 0
max_sessions = 8

[tls]
cert = "{}"
key = "{}"

[backend]
kind = "mock"
version = "tsdbgate test\n"
"#,
        cert.cert_path.display(),
        cert.key_path.display()
    );
    let settings = ProxyConfig::from_toml_str(&toml_str)
        .unwrap()
        .validate()
        .unwrap();

    let backend: Arc<dyn Backend> = build_backend(&settings.backend, settings.chunk_size);
    let listener = Listener::bind(&settings, backend).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(listener.serve(shutdown_rx));

    let mut client = tls_client(addr, &cert).await;
    client.write_all(b"version\n").await.unwrap();
    let mut buf = vec![0u8; "tsdbgate test\n".len()];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(buf, b"tsdbgate test\n");
    drop(client);

    shutdown_tx.send(true).unwrap();
    server.await.unwrap();
}

#[tokio::test]
async fn stalled_handshake_releases_its_session_slot() {
    let cert = write_test_cert();
    let acceptor = tls::load_acceptor(&cert.cert_path, &cert.key_path).unwrap();
    let backend = Arc::new(MockBackend::new("0.1\n"));

    let listener = Listener::bind_with("127.0.0.1:0", Some(acceptor), backend.clone(), 1, 4096)
        .await
        .unwrap()
        .with_handshake_timeout(Duration::from_millis(100));
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(listener.serve(shutdown_rx));

    // Takes the only slot and never starts a handshake.
    let mut idle = TcpStream::connect(addr).await.unwrap();

    let served = tokio::time::timeout(Duration::from_secs(5), async {
        let mut client = tls_client(addr, &cert).await;
        client.write_all(b"version\n").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        buf
    })
    .await
    .expect("second client was never served");
    assert_eq!(&served, b"0.1\n");

    // The stalled connection was closed by the server.
    let mut rest = Vec::new();
    let _ = idle.read_to_end(&mut rest).await;
    assert!(rest.is_empty());

    shutdown_tx.send(true).unwrap();
    server.await.unwrap();
}

//! Certificate validation against a TLS server with a self-signed certificate

#![allow(clippy::unwrap_used, clippy::expect_used)]

use rcgen::{CertificateParams, KeyPair};
use resolver_transport::config::{FALLBACK_HOSTS, HTTPS_SECURITY_MODE};
use resolver_transport::{
    ChecksumChain, ErrorKind, PeekTask, RepositoryDescriptor, RepositorySession, TransportError,
    TransportSession,
};
use rustls::ServerConfig;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

const EMPTY_OK: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// HTTP/1.1 over TLS, answering every request with an empty 200.
struct SelfSignedServer {
    addr: SocketAddr,
    requests: Arc<AtomicUsize>,
}

impl SelfSignedServer {
    async fn start() -> Self {
        // Install ring crypto provider for rustls (idempotent)
        let _ = rustls::crypto::ring::default_provider().install_default();

        let key_pair = KeyPair::generate().unwrap();
        let params =
            CertificateParams::new(vec!["localhost".to_string(), "127.0.0.1".to_string()]).unwrap();
        let cert = params.self_signed(&key_pair).unwrap();
        let key = PrivatePkcs8KeyDer::from(key_pair.serialize_der());

        let mut config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert.der().clone()], key.into())
            .unwrap();
        config.alpn_protocols = vec![b"http/1.1".to_vec()];
        let acceptor = TlsAcceptor::from(Arc::new(config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                let counter = Arc::clone(&counter);
                tokio::spawn(async move {
                    let Ok(mut tls) = acceptor.accept(stream).await else {
                        return;
                    };
                    let mut request = Vec::new();
                    let mut buf = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match tls.read(&mut buf).await {
                            Ok(n) if n > 0 => request.extend_from_slice(&buf[..n]),
                            _ => return,
                        }
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                    let _ = tls.write_all(EMPTY_OK).await;
                    let _ = tls.shutdown().await;
                });
            }
        });

        Self { addr, requests }
    }

    fn url(&self) -> String {
        format!("https://{}/repo/", self.addr)
    }

    fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

fn transport(session: &RepositorySession, server: &SelfSignedServer) -> TransportSession {
    TransportSession::new(
        session,
        RepositoryDescriptor::new("tls", server.url()),
        ChecksumChain::new(),
    )
    .expect("Operation should succeed")
}

#[tokio::test]
async fn test_default_mode_rejects_self_signed_certificate() {
    let server = SelfSignedServer::start().await;
    let transport = transport(&RepositorySession::new(), &server);

    let err = transport
        .peek(&PeekTask::new("a.pom"))
        .await
        .expect_err("Test operation should fail");

    assert!(matches!(err, TransportError::Connect { .. }), "{err:?}");
    assert_eq!(transport.classify(&err), ErrorKind::Other);
    assert_eq!(server.requests(), 0);
}

#[tokio::test]
async fn test_insecure_mode_accepts_self_signed_certificate() {
    let server = SelfSignedServer::start().await;
    let session = RepositorySession::new().with_config(HTTPS_SECURITY_MODE, "insecure");
    let transport = transport(&session, &server);

    transport
        .peek(&PeekTask::new("a.pom"))
        .await
        .expect("Operation should succeed");
    assert_eq!(server.requests(), 1);
}

#[tokio::test]
async fn test_insecure_mode_applies_to_fallback_client() {
    let server = SelfSignedServer::start().await;
    let session = RepositorySession::new()
        .with_config(HTTPS_SECURITY_MODE, "insecure")
        .with_config(FALLBACK_HOSTS, "127.0.0.1");
    let transport = transport(&session, &server);

    transport
        .peek(&PeekTask::new("a.pom"))
        .await
        .expect("Operation should succeed");
    assert_eq!(server.requests(), 1);
}

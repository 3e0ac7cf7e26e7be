#![cfg(feature = "transport_tls")]
//! TLS layer against a self-signed in-process server

use outpost_tls::{build_client_config, ClientTlsOptions, SessionCache};
use outpost_transport::{Dialer, StreamLayer, TcpDialer, TlsLayer};
use rustls::client::ClientSessionStore;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

fn acceptor() -> TlsAcceptor {
    let certified = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(
        certified.key_pair.serialize_der(),
    ));
    let config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_no_client_auth()
    .with_single_cert(vec![cert], key)
    .unwrap();
    TlsAcceptor::from(Arc::new(config))
}

async fn spawn_tls_echo(acceptor: TlsAcceptor) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((tcp, _)) = listener.accept().await else {
                return;
            };
            let acceptor = acceptor.clone();
            tokio::spawn(async move {
                let Ok(mut tls) = acceptor.accept(tcp).await else {
                    return;
                };
                let mut buf = [0u8; 4];
                if tls.read_exact(&mut buf).await.is_ok() {
                    let _ = tls.write_all(&buf).await;
                    let _ = tls.flush().await;
                }
            });
        }
    });
    port
}

#[tokio::test]
async fn skip_verify_handshake_populates_session_cache() {
    let port = spawn_tls_echo(acceptor()).await;
    let cache = SessionCache::new(16);
    let config = build_client_config(
        &ClientTlsOptions::default()
            .with_skip_cert_verify(true)
            .with_session_cache(cache.clone()),
    )
    .unwrap();
    let layer = TlsLayer::new(config, "127.0.0.1").unwrap();

    for _ in 0..2 {
        let raw = TcpDialer::default().connect("127.0.0.1", port).await.unwrap();
        let mut stream = layer.wrap(raw).await.unwrap();
        stream.write_all(b"ping").await.unwrap();
        stream.flush().await.unwrap();
        let mut back = [0u8; 4];
        stream.read_exact(&mut back).await.unwrap();
        assert_eq!(&back, b"ping");
    }

    let name = ServerName::try_from("127.0.0.1").unwrap();
    assert!(cache.store().take_tls13_ticket(&name).is_some());
}

#[tokio::test]
async fn verifying_client_rejects_self_signed() {
    let port = spawn_tls_echo(acceptor()).await;
    let config = build_client_config(&ClientTlsOptions::default()).unwrap();
    let layer = TlsLayer::new(config, "localhost").unwrap();

    let raw = TcpDialer::default().connect("127.0.0.1", port).await.unwrap();
    let err = layer.wrap(raw).await.err().unwrap();
    assert!(err.to_string().starts_with("tls:"), "got {err}");
}

//! In-process VMess echo server for integration tests.
//!
//! The server authenticates the client against the primary and alter ids,
//! decrypts and validates the request header (checksum included), reports the
//! decoded request on a channel, answers with the response header and echoes
//! every body chunk back until the client sends its end-of-stream chunk.

use crate::addr::AddrType;
use crate::chunk::{ChunkOpener, ChunkSealer};
use crate::header::{RequestHeader, AUTH_LEN, FIXED_LEN};
use crate::kdf;
use crate::user::User;
use crate::{Destination, Security};
use anyhow::{anyhow, bail, Context, Result};
use bytes::BytesMut;
use outpost_transport::websocket::{accept_websocket, WebSocketServerConfig};
use outpost_transport::IoStream;
use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};

/// UUID used across the test suites.
pub const TEST_UUID: &str = "b831381d-6324-4d53-ad4f-8cda48b30811";

/// Accepted clock skew between client and server, in seconds.
const TIMESTAMP_WINDOW: u64 = 120;

#[derive(Debug, Clone, Default)]
pub struct EchoServerOptions {
    /// Terminate TLS (self-signed certificate for `localhost` / `127.0.0.1`).
    pub tls: bool,
    /// Expect a WebSocket upgrade on this path.
    pub ws_path: Option<String>,
    /// Answer with a response header whose token does not match the request.
    pub corrupt_response: bool,
}

/// What the server decoded from one client request.
#[derive(Debug, Clone)]
pub struct AcceptedRequest {
    pub destination: Destination,
    pub security: Security,
    /// Index of the id the client authenticated with (0 = primary).
    pub id_index: usize,
    /// WebSocket upgrade headers (lower-cased names), when WebSocket is on.
    pub ws_headers: Option<Vec<(String, String)>>,
}

pub struct EchoServer {
    addr: SocketAddr,
    requests: mpsc::UnboundedReceiver<AcceptedRequest>,
    task: JoinHandle<()>,
}

impl EchoServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Next decoded request, in accept order.
    pub async fn next_request(&mut self) -> Option<AcceptedRequest> {
        self.requests.recv().await
    }
}

impl Drop for EchoServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct ServerCtx {
    user: User,
    tls: Option<TlsAcceptor>,
    ws: Option<WebSocketServerConfig>,
    corrupt_response: bool,
    requests: mpsc::UnboundedSender<AcceptedRequest>,
}

/// Plain TCP echo server for `uuid` with `alter_id` derived ids.
pub async fn spawn_echo_server(uuid: &str, alter_id: u16) -> Result<EchoServer> {
    spawn_echo_server_with(uuid, alter_id, EchoServerOptions::default()).await
}

pub async fn spawn_echo_server_with(
    uuid: &str,
    alter_id: u16,
    options: EchoServerOptions,
) -> Result<EchoServer> {
    let user = User::parse(uuid, alter_id)?;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (tx, rx) = mpsc::unbounded_channel();

    let ctx = Arc::new(ServerCtx {
        user,
        tls: if options.tls {
            Some(self_signed_acceptor()?)
        } else {
            None
        },
        ws: options.ws_path.map(|path| WebSocketServerConfig {
            path,
            require_path_match: true,
            ..Default::default()
        }),
        corrupt_response: options.corrupt_response,
        requests: tx,
    });

    let task = tokio::spawn(async move {
        loop {
            let (tcp, peer) = match listener.accept().await {
                Ok(v) => v,
                Err(e) => {
                    warn!(error = %e, "vmess test server: accept failed");
                    return;
                }
            };
            let ctx = ctx.clone();
            tokio::spawn(async move {
                if let Err(e) = serve_conn(tcp, ctx).await {
                    debug!(%peer, error = %e, "vmess test server: session ended with error");
                }
            });
        }
    });

    Ok(EchoServer {
        addr,
        requests: rx,
        task,
    })
}

fn self_signed_acceptor() -> Result<TlsAcceptor> {
    let certified =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string(), "127.0.0.1".to_string()])?;
    let cert = certified.cert.der().clone();
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(certified.key_pair.serialize_der()));
    let config =
        rustls::ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(vec![cert], key)?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

async fn serve_conn(tcp: TcpStream, ctx: Arc<ServerCtx>) -> Result<()> {
    let stream: IoStream = match &ctx.tls {
        Some(acceptor) => Box::new(acceptor.accept(tcp).await.context("tls accept")?),
        None => Box::new(tcp),
    };
    let (stream, ws_headers) = match &ctx.ws {
        Some(cfg) => {
            let accepted = accept_websocket(stream, cfg).await?;
            let headers = accepted
                .headers
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_string(),
                        v.to_str().unwrap_or_default().to_string(),
                    )
                })
                .collect();
            (accepted.stream, Some(headers))
        }
        None => (stream, None),
    };
    serve_vmess(stream, &ctx, ws_headers).await
}

async fn read_decrypt<R: AsyncRead + Unpin>(
    stream: &mut R,
    dec: &mut cfb_mode::BufDecryptor<aes::Aes128>,
    len: usize,
) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    dec.decrypt(&mut buf);
    Ok(buf)
}

async fn serve_vmess(
    mut stream: IoStream,
    ctx: &ServerCtx,
    ws_headers: Option<Vec<(String, String)>>,
) -> Result<()> {
    let mut auth = [0u8; AUTH_LEN];
    stream.read_exact(&mut auth).await.context("read auth")?;

    let now = kdf::unix_now();
    let mut matched = None;
    'search: for ts in now.saturating_sub(TIMESTAMP_WINDOW)..=now + TIMESTAMP_WINDOW {
        for (idx, id) in ctx.user.ids().iter().enumerate() {
            if kdf::auth(id.uuid(), ts)? == auth {
                matched = Some((idx, ts));
                break 'search;
            }
        }
    }
    let (id_index, ts) = matched.ok_or_else(|| anyhow!("authentication failed"))?;
    let id = &ctx.user.ids()[id_index];

    let mut dec = kdf::cfb_decryptor(id.cmd_key(), &kdf::hash_timestamp(ts));
    let mut plain = read_decrypt(&mut stream, &mut dec, FIXED_LEN).await?;
    let addr_len = match AddrType::from_byte(plain[FIXED_LEN - 1]) {
        Some(AddrType::Ipv4) => 4,
        Some(AddrType::Ipv6) => 16,
        Some(AddrType::Domain) => {
            let len = read_decrypt(&mut stream, &mut dec, 1).await?;
            plain.extend_from_slice(&len);
            usize::from(len[0])
        }
        None => bail!("unknown address type {}", plain[FIXED_LEN - 1]),
    };
    let padding_len = usize::from(plain[35] >> 4);
    let rest = read_decrypt(&mut stream, &mut dec, addr_len + padding_len + 4).await?;
    plain.extend_from_slice(&rest);
    let request = RequestHeader::parse(&plain)?;

    // The receiver may be gone when the test no longer cares.
    let _ = ctx.requests.send(AcceptedRequest {
        destination: request.destination.clone(),
        security: request.security,
        id_index,
        ws_headers,
    });

    let resp_v = if ctx.corrupt_response {
        request.resp_v.wrapping_add(1)
    } else {
        request.resp_v
    };
    let mut head = [resp_v, 0, 0, 0];
    kdf::cfb_encryptor(&request.response_key(), &request.response_iv()).encrypt(&mut head);
    stream.write_all(&head).await?;
    stream.flush().await?;

    let mut opener = ChunkOpener::new(request.security, &request.body_key, &request.body_iv)?;
    let mut sealer = ChunkSealer::new(
        request.security,
        &request.response_key(),
        &request.response_iv(),
    )?;
    let mut raw = BytesMut::new();
    let mut out = BytesMut::new();
    let mut scratch = vec![0u8; 32 * 1024];

    'relay: loop {
        while let Some(payload) = opener.open(&mut raw)? {
            if payload.is_empty() {
                break 'relay;
            }
            out.clear();
            sealer.seal(&payload, &mut out)?;
            stream.write_all(&out).await?;
            stream.flush().await?;
        }
        let n = stream.read(&mut scratch).await?;
        if n == 0 {
            break;
        }
        raw.extend_from_slice(&scratch[..n]);
    }

    out.clear();
    sealer.seal(&[], &mut out)?;
    stream.write_all(&out).await?;
    stream.shutdown().await?;
    Ok(())
}

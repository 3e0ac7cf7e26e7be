//! # WebSocket Transport Layer
//!
//! - `WebSocketLayer`: client-side upgrade over an existing stream (raw TCP or TLS)
//! - `WebSocketListener` / [`accept_websocket`]: server-side accept, used by
//!   in-process test servers
//! - `WebSocketStreamAdapter`: exposes a tungstenite stream as `AsyncRead + AsyncWrite`
//!
//! Payload bytes travel as binary frames. Text frames are accepted on read and
//! treated as bytes; a close frame reads as EOF.
//!
//! ## Client Usage
//! ```rust,no_run
//! use outpost_transport::websocket::{WebSocketConfig, WebSocketLayer};
//! use outpost_transport::{Dialer, StreamLayer, TcpDialer};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = WebSocketConfig {
//!         path: "/ws".to_string(),
//!         headers: vec![("User-Agent".to_string(), "outpost".to_string())],
//!         ..Default::default()
//!     };
//!     let layer = WebSocketLayer::new(config, "example.com", 80)?;
//!     let raw = TcpDialer::default().connect("example.com", 80).await?;
//!     let _stream = layer.wrap(raw).await?;
//!     Ok(())
//! }
//! ```

use crate::builder::StreamLayer;
use crate::dialer::{DialError, IoStream};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use http::header::{HeaderMap, HeaderName, HeaderValue};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_tungstenite::tungstenite::handshake::client::{generate_key, Request};
use tokio_tungstenite::tungstenite::handshake::server::{
    ErrorResponse, Request as ServerRequest, Response as ServerResponse,
};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig as TungsteniteConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream as TungsteniteStream;
use tracing::{debug, warn};

/// WebSocket configuration
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    /// WebSocket path (default: "/")
    pub path: String,
    /// Custom headers (key-value pairs); these override generated ones, `Host` included
    pub headers: Vec<(String, String)>,
    /// Maximum message size in bytes (default: 64MB)
    pub max_message_size: Option<usize>,
    /// Maximum frame size in bytes (default: 16MB)
    pub max_frame_size: Option<usize>,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            headers: Vec::new(),
            max_message_size: Some(64 * 1024 * 1024),
            max_frame_size: Some(16 * 1024 * 1024),
        }
    }
}

fn tungstenite_config(
    max_message_size: Option<usize>,
    max_frame_size: Option<usize>,
) -> TungsteniteConfig {
    let mut cfg = TungsteniteConfig::default();
    if let Some(m) = max_message_size {
        cfg.max_message_size = Some(m);
    }
    if let Some(f) = max_frame_size {
        cfg.max_frame_size = Some(f);
    }
    cfg
}

fn authority(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

/// WebSocket client layer.
///
/// Header names and values are validated once at construction; each `wrap`
/// only adds a fresh `Sec-WebSocket-Key`.
#[derive(Debug, Clone)]
pub struct WebSocketLayer {
    uri: String,
    headers: HeaderMap,
    ws_config: TungsteniteConfig,
}

impl WebSocketLayer {
    /// `host`/`port` name the server the request is addressed to. They form the
    /// request URI and the default `Host` header.
    pub fn new(config: WebSocketConfig, host: &str, port: u16) -> Result<Self, DialError> {
        let path = if config.path.starts_with('/') {
            config.path.clone()
        } else {
            format!("/{}", config.path)
        };
        let authority = authority(host, port);
        let uri = format!("ws://{authority}{path}");
        uri.parse::<http::Uri>()
            .map_err(|e| DialError::WebSocket(format!("invalid uri {uri:?}: {e}")))?;

        let mut headers = HeaderMap::new();
        for (key, value) in &config.headers {
            let name = HeaderName::from_bytes(key.as_bytes())
                .map_err(|e| DialError::WebSocket(format!("invalid header name {key:?}: {e}")))?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                DialError::WebSocket(format!("invalid value for header {key:?}: {e}"))
            })?;
            headers.insert(name, value);
        }
        if !headers.contains_key(http::header::HOST) {
            let value = HeaderValue::from_str(&authority)
                .map_err(|e| DialError::WebSocket(format!("invalid host header: {e}")))?;
            headers.insert(http::header::HOST, value);
        }

        Ok(Self {
            uri,
            headers,
            ws_config: tungstenite_config(config.max_message_size, config.max_frame_size),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Headers sent with every upgrade request, excluding the per-request key.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn request(&self) -> Result<Request, DialError> {
        let mut request = Request::get(self.uri.as_str())
            .body(())
            .map_err(|e| DialError::WebSocket(format!("failed to build request: {e}")))?;

        let headers = request.headers_mut();
        headers.insert(http::header::UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(http::header::CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(
            http::header::SEC_WEBSOCKET_VERSION,
            HeaderValue::from_static("13"),
        );
        let key = HeaderValue::from_str(&generate_key())
            .map_err(|e| DialError::WebSocket(format!("invalid key: {e}")))?;
        headers.insert(http::header::SEC_WEBSOCKET_KEY, key);
        for (name, value) in &self.headers {
            headers.insert(name.clone(), value.clone());
        }
        Ok(request)
    }
}

#[async_trait]
impl StreamLayer for WebSocketLayer {
    fn name(&self) -> &'static str {
        "ws"
    }

    async fn wrap(&self, stream: IoStream) -> Result<IoStream, DialError> {
        let request = self.request()?;
        let (ws_stream, response) =
            tokio_tungstenite::client_async_with_config(request, stream, Some(self.ws_config))
                .await
                .map_err(|e| DialError::WebSocket(format!("handshake failed: {e}")))?;
        debug!(uri = %self.uri, status = %response.status(), "websocket upgraded");
        Ok(Box::new(WebSocketStreamAdapter::new(ws_stream)))
    }
}

/// Presents a tungstenite stream as a byte stream.
pub struct WebSocketStreamAdapter<S> {
    inner: TungsteniteStream<S>,
    read_buffer: Vec<u8>,
    read_offset: usize,
}

impl<S> WebSocketStreamAdapter<S> {
    fn new(inner: TungsteniteStream<S>) -> Self {
        Self {
            inner,
            read_buffer: Vec::new(),
            read_offset: 0,
        }
    }

    fn drain_into(&mut self, buf: &mut ReadBuf<'_>) {
        let remaining = &self.read_buffer[self.read_offset..];
        let n = remaining.len().min(buf.remaining());
        buf.put_slice(&remaining[..n]);
        self.read_offset += n;
        if self.read_offset >= self.read_buffer.len() {
            self.read_buffer.clear();
            self.read_offset = 0;
        }
    }
}

impl<S> AsyncRead for WebSocketStreamAdapter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        loop {
            if self.read_offset < self.read_buffer.len() {
                self.drain_into(buf);
                return Poll::Ready(Ok(()));
            }

            let data = match std::task::ready!(self.inner.poll_next_unpin(cx)) {
                Some(Ok(Message::Binary(data))) => data,
                Some(Ok(Message::Text(text))) => {
                    warn!("websocket: unexpected text frame, treating as bytes");
                    text.into_bytes()
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!("websocket closed");
                    return Poll::Ready(Ok(()));
                }
                // Control frames are answered by tungstenite itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Frame(_))) => {
                    return Poll::Ready(Err(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        "unexpected raw frame",
                    )))
                }
                Some(Err(e)) => {
                    return Poll::Ready(Err(std::io::Error::other(format!(
                        "websocket error: {e}"
                    ))))
                }
            };

            if data.is_empty() {
                continue;
            }
            self.read_buffer = data;
            self.read_offset = 0;
        }
    }
}

impl<S> AsyncWrite for WebSocketStreamAdapter<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        std::task::ready!(self.inner.poll_ready_unpin(cx))
            .map_err(|e| std::io::Error::other(format!("websocket error: {e}")))?;
        self.inner
            .start_send_unpin(Message::Binary(buf.to_vec()))
            .map_err(|e| std::io::Error::other(format!("websocket send error: {e}")))?;
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.inner
            .poll_flush_unpin(cx)
            .map_err(|e| std::io::Error::other(format!("websocket flush error: {e}")))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.inner
            .poll_close_unpin(cx)
            .map_err(|e| std::io::Error::other(format!("websocket close error: {e}")))
    }
}

/// WebSocket server configuration
#[derive(Debug, Clone)]
pub struct WebSocketServerConfig {
    /// Expected WebSocket path
    pub path: String,
    /// Maximum message size in bytes (default: 64MB)
    pub max_message_size: Option<usize>,
    /// Maximum frame size in bytes (default: 16MB)
    pub max_frame_size: Option<usize>,
    /// Reject upgrades whose path differs from `path` (default: false)
    pub require_path_match: bool,
}

impl Default for WebSocketServerConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            max_message_size: Some(64 * 1024 * 1024),
            max_frame_size: Some(16 * 1024 * 1024),
            require_path_match: false,
        }
    }
}

/// An accepted upgrade together with what the client asked for.
pub struct AcceptedWebSocket {
    pub stream: IoStream,
    pub path: String,
    pub headers: HeaderMap,
}

impl std::fmt::Debug for AcceptedWebSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceptedWebSocket")
            .field("path", &self.path)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Perform the server side of the upgrade over an existing stream.
pub async fn accept_websocket<S>(
    stream: S,
    config: &WebSocketServerConfig,
) -> Result<AcceptedWebSocket, DialError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut seen: Option<(String, HeaderMap)> = None;
    let expected = config.require_path_match.then(|| config.path.clone());
    let callback = |req: &ServerRequest, resp: ServerResponse| {
        let path = req.uri().path().to_string();
        seen = Some((path.clone(), req.headers().clone()));
        match expected {
            Some(want) if want != path => {
                let mut err = ErrorResponse::new(Some(format!("unexpected path {path}")));
                *err.status_mut() = http::StatusCode::NOT_FOUND;
                Err(err)
            }
            _ => Ok(resp),
        }
    };

    let ws_stream = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        callback,
        Some(tungstenite_config(
            config.max_message_size,
            config.max_frame_size,
        )),
    )
    .await
    .map_err(|e| DialError::WebSocket(format!("handshake failed: {e}")))?;

    let (path, headers) = seen.unwrap_or_default();
    Ok(AcceptedWebSocket {
        stream: Box::new(WebSocketStreamAdapter::new(ws_stream)),
        path,
        headers,
    })
}

/// WebSocket server listener
///
/// Accepts TCP connections and performs the HTTP upgrade on each.
pub struct WebSocketListener {
    tcp_listener: tokio::net::TcpListener,
    config: WebSocketServerConfig,
}

impl WebSocketListener {
    pub fn new(tcp_listener: tokio::net::TcpListener, config: WebSocketServerConfig) -> Self {
        Self {
            tcp_listener,
            config,
        }
    }

    pub fn with_default_config(tcp_listener: tokio::net::TcpListener) -> Self {
        Self::new(tcp_listener, WebSocketServerConfig::default())
    }

    /// Accept one TCP connection and upgrade it.
    pub async fn accept(&self) -> Result<AcceptedWebSocket, DialError> {
        let (stream, peer_addr) = self.tcp_listener.accept().await?;
        debug!(%peer_addr, "websocket listener accepted tcp connection");
        accept_websocket(stream, &self.config).await
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.tcp_listener.local_addr()
    }
}

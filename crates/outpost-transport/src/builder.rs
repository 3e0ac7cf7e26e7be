//! # Transport Chain / 传输链
//!
//! Composes stream layers in order over an already-connected raw stream, e.g.
//! TCP -> TLS -> WebSocket.
//!
//! 在已建立的原始连接上按顺序组合各传输层，例如 TCP -> TLS -> WebSocket。
//!
//! ## Example / 示例
//! ```rust,no_run
//! use outpost_transport::{Dialer, TcpDialer, TransportChain};
//! # #[cfg(all(feature = "transport_tls", feature = "transport_ws"))]
//! # async fn demo(tls: outpost_transport::TlsLayer, ws: outpost_transport::WebSocketLayer)
//! #     -> Result<(), outpost_transport::DialError> {
//! let raw = TcpDialer::default().connect("example.com", 443).await?;
//! let chain = TransportChain::new().tls(tls).websocket(ws);
//! let _stream = chain.wrap(raw).await?;
//! # Ok(())
//! # }
//! ```

use crate::dialer::{DialError, IoStream};
use async_trait::async_trait;
use std::sync::Arc;

/// One transport layer applied on top of an existing stream.
/// 叠加在现有流之上的一层传输。
#[async_trait]
pub trait StreamLayer: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Perform this layer's handshake over `stream` and return the wrapped stream.
    async fn wrap(&self, stream: IoStream) -> Result<IoStream, DialError>;
}

/// Ordered list of layers. Cloning is cheap; layers are shared.
/// 有序的层列表，克隆开销很低（各层共享）。
#[derive(Clone, Default)]
pub struct TransportChain {
    layers: Vec<Arc<dyn StreamLayer>>,
}

impl TransportChain {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an arbitrary layer.
    #[must_use]
    pub fn layer(mut self, layer: impl StreamLayer + 'static) -> Self {
        self.layers.push(Arc::new(layer));
        self
    }

    /// Append a TLS layer (requires `transport_tls` feature)
    /// 追加 TLS 层（需要 `transport_tls` 特性）
    #[cfg(feature = "transport_tls")]
    #[must_use]
    pub fn tls(self, layer: crate::tls::TlsLayer) -> Self {
        self.layer(layer)
    }

    /// Append a WebSocket layer (requires `transport_ws` feature)
    /// 追加 WebSocket 层（需要 `transport_ws` 特性）
    #[cfg(feature = "transport_ws")]
    #[must_use]
    pub fn websocket(self, layer: crate::websocket::WebSocketLayer) -> Self {
        self.layer(layer)
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Names of the layers, outermost last.
    pub fn names(&self) -> Vec<&'static str> {
        self.layers.iter().map(|l| l.name()).collect()
    }

    /// Apply every layer in order. The first failing layer aborts the chain.
    pub async fn wrap(&self, mut stream: IoStream) -> Result<IoStream, DialError> {
        for layer in &self.layers {
            tracing::debug!(layer = layer.name(), "applying transport layer");
            stream = layer.wrap(stream).await?;
        }
        Ok(stream)
    }
}

impl std::fmt::Debug for TransportChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportChain")
            .field("layers", &self.names())
            .finish()
    }
}

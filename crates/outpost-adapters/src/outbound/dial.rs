//! Dial orchestration: raw connect, then protocol handshake.

use crate::outbound::prelude::*;
use crate::outbound::server_label;
use outpost_transport::{DialError, Dialer};
use std::future::Future;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Run `fut` unless `token` fires first.
async fn cancellable<F: Future>(token: Option<&CancellationToken>, fut: F) -> Option<F::Output> {
    match token {
        Some(token) => tokio::select! {
            biased;
            _ = token.cancelled() => None,
            out = fut => Some(out),
        },
        None => Some(fut.await),
    }
}

/// Connect to `host:port` through `dialer`, then let `client` negotiate the
/// protocol for `destination` over the raw connection.
///
/// Connect failures and connect timeouts are [`AdapterError::Dial`]; a client
/// failure is [`AdapterError::Handshake`] carrying the client's error. Nothing
/// is retried and no partial adapter is ever returned.
pub async fn dial_with<D, C>(
    dialer: &D,
    host: &str,
    port: u16,
    client: &C,
    destination: &C::Destination,
    opts: &DialOpts,
) -> Result<StreamAdapter>
where
    D: Dialer + ?Sized,
    C: ProtocolClient + ?Sized,
{
    let server = server_label(host, port);
    let cancel = opts.cancel.as_ref();
    if cancel.is_some_and(CancellationToken::is_cancelled) {
        return Err(AdapterError::Cancelled);
    }

    let connect = tokio::time::timeout(opts.connect_timeout, dialer.connect(host, port));
    let raw = match cancellable(cancel, connect).await {
        None => return Err(AdapterError::Cancelled),
        Some(Err(_elapsed)) => {
            return Err(AdapterError::Dial {
                server,
                source: DialError::Timeout(opts.connect_timeout),
            })
        }
        Some(Ok(Err(source))) => return Err(AdapterError::Dial { server, source }),
        Some(Ok(Ok(raw))) => raw,
    };
    debug!(%server, "raw connection established");

    let handshake = client.handshake(raw, destination);
    let negotiated = match opts.handshake_timeout {
        Some(limit) => match cancellable(cancel, tokio::time::timeout(limit, handshake)).await {
            None => return Err(AdapterError::Cancelled),
            Some(Err(_elapsed)) => return Err(AdapterError::Timeout(limit)),
            Some(Ok(res)) => res,
        },
        None => match cancellable(cancel, handshake).await {
            None => return Err(AdapterError::Cancelled),
            Some(res) => res,
        },
    };
    let stream = negotiated.map_err(|e| AdapterError::Handshake {
        server: server.clone(),
        source: Box::new(e),
    })?;
    debug!(%server, dest = %destination, "handshake complete");

    Ok(StreamAdapter::new(stream, server))
}

/// Owns the negotiated stream of one flow.
pub struct StreamAdapter {
    stream: Option<BoxedStream>,
    server: String,
}

impl StreamAdapter {
    pub fn new(stream: BoxedStream, server: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            server: server.into(),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn is_closed(&self) -> bool {
        self.stream.is_none()
    }

    /// Hand the stream to the caller.
    ///
    /// # Errors
    ///
    /// [`AdapterError::Closed`] if the adapter was already closed.
    pub fn into_stream(self) -> Result<BoxedStream> {
        self.stream.ok_or(AdapterError::Closed)
    }
}

impl Debug for StreamAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamAdapter")
            .field("server", &self.server)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[async_trait]
impl ProxyConnection for StreamAdapter {
    fn conn(&mut self) -> Result<&mut BoxedStream> {
        self.stream.as_mut().ok_or(AdapterError::Closed)
    }

    async fn close(&mut self) -> Result<()> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        debug!(server = %self.server, "closing proxy connection");
        stream.shutdown().await?;
        Ok(())
    }
}

//! Unified traits and interfaces for outbound adapters.
//!
//! - [`FlowDescriptor`]: framework-generic description of a flow's destination
//! - [`DialOpts`]: per-dial options (timeouts, cancellation)
//! - [`OutboundConnector`]: an adapter that turns a flow into a [`ProxyConnection`]
//! - [`ProxyConnection`]: the negotiated stream plus a close operation
//! - [`ProtocolClient`]: the seam a protocol client plugs into the dial orchestrator

use crate::error::Result;
use async_trait::async_trait;
use outpost_transport::IoStream;
use serde::Serialize;
use std::fmt::{self, Debug, Display};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Destination address of a flow, as the framework hands it over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowAddr {
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Domain(String),
}

impl From<IpAddr> for FlowAddr {
    fn from(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => Self::Ipv4(v4),
            IpAddr::V6(v6) => Self::Ipv6(v6),
        }
    }
}

/// Per-flow destination with the port still in textual form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowDescriptor {
    pub addr: FlowAddr,
    pub port: String,
}

impl FlowDescriptor {
    #[must_use]
    pub fn new(addr: FlowAddr, port: impl Into<String>) -> Self {
        Self {
            addr,
            port: port.into(),
        }
    }

    #[must_use]
    pub fn domain(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self::new(FlowAddr::Domain(host.into()), port)
    }

    #[must_use]
    pub fn ip(ip: IpAddr, port: impl Into<String>) -> Self {
        Self::new(ip.into(), port)
    }
}

impl Display for FlowDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.addr {
            FlowAddr::Ipv4(ip) => write!(f, "{ip}:{}", self.port),
            FlowAddr::Ipv6(ip) => write!(f, "[{ip}]:{}", self.port),
            FlowAddr::Domain(host) => write!(f, "{host}:{}", self.port),
        }
    }
}

/// Environment knob overriding [`DialOpts::connect_timeout`] (milliseconds).
pub const ENV_CONNECT_TIMEOUT_MS: &str = "OUTPOST_CONNECT_TIMEOUT_MS";
/// Environment knob setting [`DialOpts::handshake_timeout`] (milliseconds).
pub const ENV_HANDSHAKE_TIMEOUT_MS: &str = "OUTPOST_HANDSHAKE_TIMEOUT_MS";

/// Dial options for connection requests.
#[derive(Debug, Clone)]
pub struct DialOpts {
    /// Bound on the raw connect to the proxy server.
    pub connect_timeout: Duration,

    /// Bound on the protocol handshake; `None` waits as long as the client does.
    pub handshake_timeout: Option<Duration>,

    /// Observed during both connect and handshake.
    pub cancel: Option<CancellationToken>,
}

impl Default for DialOpts {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            handshake_timeout: None,
            cancel: None,
        }
    }
}

impl DialOpts {
    /// Creates new dial options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overlaid with `OUTPOST_CONNECT_TIMEOUT_MS` and
    /// `OUTPOST_HANDSHAKE_TIMEOUT_MS`. Unparsable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let millis = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };
        if let Some(t) = millis(ENV_CONNECT_TIMEOUT_MS) {
            self.connect_timeout = t;
        }
        if let Some(t) = millis(ENV_HANDSHAKE_TIMEOUT_MS) {
            self.handshake_timeout = Some(t);
        }
        self
    }

    /// Sets the connection timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the handshake timeout.
    #[must_use]
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Boxed async stream for connections.
pub type BoxedStream = IoStream;

/// A negotiated proxy connection owned by one flow.
#[async_trait]
pub trait ProxyConnection: Send {
    /// Borrow the negotiated stream.
    ///
    /// # Errors
    ///
    /// [`AdapterError::Closed`](crate::AdapterError::Closed) after [`close`](Self::close).
    fn conn(&mut self) -> Result<&mut BoxedStream>;

    /// Shut the stream down and release it. Calling it again is a no-op.
    async fn close(&mut self) -> Result<()>;
}

/// Adapter kinds known to the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AdapterType {
    Vmess,
}

/// Public, credential-free description of an adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdapterDescriptor {
    #[serde(rename = "type")]
    pub adapter_type: AdapterType,
}

/// Unified outbound connector trait.
#[async_trait]
pub trait OutboundConnector: Send + Sync + Debug {
    /// Configured name of this proxy entry.
    fn name(&self) -> &str;

    fn adapter_type(&self) -> AdapterType;

    /// Establishes a proxied connection for `flow`.
    ///
    /// # Errors
    ///
    /// Returns an error if the destination cannot be encoded, the server cannot
    /// be reached, or the protocol handshake fails.
    async fn dial(&self, flow: &FlowDescriptor, opts: &DialOpts)
        -> Result<Box<dyn ProxyConnection>>;

    fn describe(&self) -> AdapterDescriptor {
        AdapterDescriptor {
            adapter_type: self.adapter_type(),
        }
    }
}

/// Protocol client driven by the dial orchestrator: takes the raw connection
/// and returns the negotiated stream.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    type Destination: Send + Sync + Display;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn handshake(
        &self,
        conn: IoStream,
        destination: &Self::Destination,
    ) -> std::result::Result<IoStream, Self::Error>;
}

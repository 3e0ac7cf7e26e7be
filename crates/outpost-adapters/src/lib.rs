//! Outbound adapters for outpost.
//!
//! An adapter turns a framework-generic flow ([`FlowDescriptor`]) into a
//! negotiated proxy stream ([`ProxyConnection`]). The VMess adapter is the one
//! shipped here.
//!
//! # Architecture
//!
//! - [`OutboundConnector`]: capability every outbound adapter exposes
//! - [`ProtocolClient`]: seam between the dial orchestrator and a protocol client
//! - [`outbound::dial_with`]: raw connect (timeout + keep-alive) followed by the
//!   client handshake
//! - [`outbound::VmessOutbound`]: VMess over TCP / TLS / WebSocket
//!
//! # Module Structure
//!
//! - [`error`]: Unified error types for all adapters
//! - [`traits`]: Core traits and per-dial options
//! - [`outbound`]: Client-side protocol implementations
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use outpost_adapters::outbound::{VmessOption, VmessOutbound};
//! use outpost_adapters::{DialOpts, FlowDescriptor, OutboundConnector};
//! use tokio::io::AsyncWriteExt;
//!
//! # async fn run(option: VmessOption) -> outpost_adapters::Result<()> {
//! let outbound = VmessOutbound::new(option)?;
//! let mut conn = outbound
//!     .dial(&FlowDescriptor::domain("example.com", "80"), &DialOpts::from_env())
//!     .await?;
//! conn.conn()?.write_all(b"GET / HTTP/1.0\r\n\r\n").await?;
//! conn.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod outbound;
pub mod traits;

pub use error::{AdapterError, Result};
pub use traits::{
    AdapterDescriptor, AdapterType, BoxedStream, DialOpts, FlowAddr, FlowDescriptor,
    OutboundConnector, ProtocolClient, ProxyConnection,
};

//! outpost-adapters 的"出站适配器"模块
//!
//! - `dial`: 拨号编排（原始连接 + 协议握手）与 `StreamAdapter`
//! - `vmess`: VMess 出站连接器

pub mod prelude {
    //! Common imports for all adapter implementations
    pub use crate::error::{AdapterError, Result};
    pub use crate::traits::{
        AdapterType, BoxedStream, DialOpts, FlowAddr, FlowDescriptor, OutboundConnector,
        ProtocolClient, ProxyConnection,
    };
    pub use async_trait::async_trait;
    pub use std::fmt::Debug;
    pub use std::time::Duration;
}

pub mod dial;
pub mod vmess;

pub use dial::{dial_with, StreamAdapter};
pub use vmess::{build_destination, VmessOption, VmessOutbound};

// Helper functions for tracing
pub(crate) fn span_dial(
    adapter: &'static str,
    flow: &crate::traits::FlowDescriptor,
    server: &str,
) -> tracing::Span {
    tracing::info_span!("dial",
        adapter = adapter,
        dest = %flow,
        server = %server
    )
}

/// `host:port`, with IPv6 literals bracketed.
pub(crate) fn server_label(host: &str, port: u16) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

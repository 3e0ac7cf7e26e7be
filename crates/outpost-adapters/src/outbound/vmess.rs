//! VMess outbound connector implementation
//!
//! Builds one immutable [`outpost_vmess::Client`] per configured proxy entry
//! and, for every flow, encodes the destination, dials the server and lets the
//! client negotiate TLS / WebSocket / VMess over the raw connection.

use crate::outbound::dial::dial_with;
use crate::outbound::prelude::*;
use crate::outbound::{server_label, span_dial};
use outpost_tls::SessionCache;
use outpost_transport::{Dialer, IoStream, TcpDialer};
use outpost_vmess::{Client, Config, Destination, DomainName, DstAddr, VmessError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::Instrument;

/// VMess proxy entry, keyed the way proxy configuration files spell it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmessOption {
    pub name: String,
    pub server: String,
    pub port: u16,
    pub uuid: String,
    #[serde(rename = "alterId")]
    pub alter_id: u16,
    pub cipher: String,
    #[serde(default)]
    pub tls: bool,
    /// `tcp` (or empty) for raw TCP, `ws` for WebSocket.
    #[serde(default)]
    pub network: String,
    #[serde(default, rename = "ws-path")]
    pub ws_path: String,
    #[serde(default, rename = "ws-headers")]
    pub ws_headers: BTreeMap<String, String>,
    #[serde(default, rename = "skip-cert-verify")]
    pub skip_cert_verify: bool,
}

impl VmessOption {
    fn client_config(&self, session_cache: SessionCache) -> Config {
        Config {
            uuid: self.uuid.clone(),
            alter_id: self.alter_id,
            security: self.cipher.to_lowercase(),
            tls: self.tls,
            host_name: self.server.clone(),
            port: self.port,
            network: self.network.clone(),
            websocket_path: self.ws_path.clone(),
            websocket_headers: self.ws_headers.clone(),
            skip_cert_verify: self.skip_cert_verify,
            session_cache,
        }
    }
}

/// Encode a flow's destination for the VMess request header.
///
/// # Errors
///
/// [`AdapterError::InvalidDestination`] when the port is not a decimal `u16`
/// or a domain is empty or longer than 255 bytes.
pub fn build_destination(flow: &FlowDescriptor) -> Result<Destination> {
    let port = flow
        .port
        .parse::<u16>()
        .map_err(|e| AdapterError::InvalidDestination(format!("port {:?}: {e}", flow.port)))?;
    let addr = match &flow.addr {
        FlowAddr::Ipv4(ip) => DstAddr::from(*ip),
        FlowAddr::Ipv6(ip) => DstAddr::from(*ip),
        FlowAddr::Domain(host) => DstAddr::Domain(
            DomainName::new(host.as_str())
                .map_err(|e| AdapterError::InvalidDestination(e.to_string()))?,
        ),
    };
    Ok(Destination::new(addr, port))
}

#[async_trait]
impl ProtocolClient for Client {
    type Destination = Destination;
    type Error = VmessError;

    async fn handshake(
        &self,
        conn: IoStream,
        destination: &Destination,
    ) -> std::result::Result<IoStream, VmessError> {
        let stream = self.connect(conn, destination).await?;
        Ok(Box::new(stream))
    }
}

/// VMess outbound connector
#[derive(Clone)]
pub struct VmessOutbound {
    name: String,
    host: String,
    port: u16,
    client: Arc<Client>,
    dialer: Arc<dyn Dialer>,
}

impl VmessOutbound {
    /// Build the connector with the process-wide TLS session cache.
    ///
    /// # Errors
    ///
    /// [`AdapterError::Config`] with the client's message when the options are
    /// rejected (unknown cipher, bad uuid, unsupported network, ...).
    pub fn new(option: VmessOption) -> Result<Self> {
        Self::with_session_cache(option, SessionCache::shared())
    }

    pub fn with_session_cache(option: VmessOption, session_cache: SessionCache) -> Result<Self> {
        let client = Client::new(option.client_config(session_cache)).map_err(AdapterError::config)?;
        tracing::debug!(
            name = %option.name,
            server = %server_label(&option.server, option.port),
            "vmess outbound ready"
        );
        Ok(Self {
            name: option.name,
            host: option.server,
            port: option.port,
            client: Arc::new(client),
            dialer: Arc::new(TcpDialer::default()),
        })
    }

    /// Replace the raw dialer (keep-alive TCP by default).
    #[must_use]
    pub fn with_dialer(mut self, dialer: Arc<dyn Dialer>) -> Self {
        self.dialer = dialer;
        self
    }

    pub fn client(&self) -> &Arc<Client> {
        &self.client
    }

    pub fn server(&self) -> String {
        server_label(&self.host, self.port)
    }
}

impl Debug for VmessOutbound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmessOutbound")
            .field("name", &self.name)
            .field("server", &self.server())
            .field("security", &self.client.security())
            .field("network", &self.client.network())
            .field("tls", &self.client.tls())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl OutboundConnector for VmessOutbound {
    fn name(&self) -> &str {
        &self.name
    }

    fn adapter_type(&self) -> AdapterType {
        AdapterType::Vmess
    }

    async fn dial(
        &self,
        flow: &FlowDescriptor,
        opts: &DialOpts,
    ) -> Result<Box<dyn ProxyConnection>> {
        let destination = build_destination(flow)?;
        let span = span_dial("vmess", flow, &self.server());
        async {
            let adapter = dial_with(
                self.dialer.as_ref(),
                &self.host,
                self.port,
                self.client.as_ref(),
                &destination,
                opts,
            )
            .await?;
            Ok(Box::new(adapter) as Box<dyn ProxyConnection>)
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_vmess::{AddrType, Security};
    use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

    fn option() -> VmessOption {
        VmessOption {
            name: "vmess-test".into(),
            server: "proxy.example".into(),
            port: 443,
            uuid: "b831381d-6324-4d53-ad4f-8cda48b30811".into(),
            alter_id: 0,
            cipher: "auto".into(),
            tls: false,
            network: String::new(),
            ws_path: String::new(),
            ws_headers: BTreeMap::new(),
            skip_cert_verify: false,
        }
    }

    #[test]
    fn ipv4_destination() {
        let flow = FlowDescriptor::ip(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), "443");
        let dest = build_destination(&flow).unwrap();
        assert_eq!(dest.addr_type(), AddrType::Ipv4);
        assert_eq!(dest.addr, DstAddr::Ipv4([10, 0, 0, 1]));
        assert_eq!(dest.port, 443);
    }

    #[test]
    fn ipv6_destination() {
        let ip: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let dest = build_destination(&FlowDescriptor::ip(IpAddr::V6(ip), "8443")).unwrap();
        assert_eq!(dest.addr_type(), AddrType::Ipv6);
        assert_eq!(dest.addr, DstAddr::Ipv6(ip.octets()));
        assert_eq!(dest.port, 8443);
    }

    #[test]
    fn domain_destination_is_length_prefixed() {
        let dest = build_destination(&FlowDescriptor::domain("example.com", "80")).unwrap();
        assert_eq!(dest.addr_type(), AddrType::Domain);
        let bytes = dest.addr.to_bytes();
        assert_eq!(bytes[0], 11);
        assert_eq!(&bytes[1..], b"example.com");
        assert_eq!(dest.port, 80);
    }

    #[test]
    fn longest_domain_is_accepted() {
        let host = "a".repeat(255);
        let dest = build_destination(&FlowDescriptor::domain(host, "1")).unwrap();
        assert_eq!(dest.addr.to_bytes()[0], 255);
    }

    #[test]
    fn oversized_or_empty_domain_is_rejected() {
        for host in ["a".repeat(256), String::new()] {
            let err = build_destination(&FlowDescriptor::domain(host, "80")).unwrap_err();
            assert!(matches!(err, AdapterError::InvalidDestination(_)));
        }
    }

    #[test]
    fn bad_ports_are_rejected() {
        for port in ["http", "70000", "-1", ""] {
            let err = build_destination(&FlowDescriptor::domain("example.com", port)).unwrap_err();
            assert!(matches!(err, AdapterError::InvalidDestination(_)), "port {port:?}");
        }
    }

    #[test]
    fn cipher_is_lower_cased() {
        let mut opt = option();
        opt.cipher = "AES-128-GCM".into();
        let outbound = VmessOutbound::new(opt).unwrap();
        assert_eq!(outbound.client().security(), Security::Aes128Gcm);
    }

    #[test]
    fn unsupported_cipher_is_a_config_error() {
        let mut opt = option();
        opt.cipher = "unsupported-cipher".into();
        let err = VmessOutbound::new(opt).unwrap_err();
        match err {
            AdapterError::Config { reason } => {
                assert_eq!(reason, "unknown security type: unsupported-cipher");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn bad_uuid_is_a_config_error() {
        let mut opt = option();
        opt.uuid = "not-a-uuid".into();
        assert!(VmessOutbound::new(opt).unwrap_err().is_config());
    }

    #[test]
    fn unsupported_network_is_a_config_error() {
        let mut opt = option();
        opt.network = "h2".into();
        assert!(VmessOutbound::new(opt).unwrap_err().is_config());
    }

    #[test]
    fn describe_hides_credentials() {
        let outbound = VmessOutbound::new(option()).unwrap();
        assert_eq!(outbound.name(), "vmess-test");
        assert_eq!(outbound.describe().adapter_type, AdapterType::Vmess);
        let debug = format!("{outbound:?}");
        assert!(!debug.contains("b831381d"));
    }

    #[tokio::test]
    async fn invalid_destination_fails_before_dialing() {
        let outbound = VmessOutbound::new(option()).unwrap();
        let err = outbound
            .dial(&FlowDescriptor::domain("example.com", "http"), &DialOpts::default())
            .await
            .map(|_| ())
            .unwrap_err();
        assert!(matches!(err, AdapterError::InvalidDestination(_)));
    }
}

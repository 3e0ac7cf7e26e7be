//! Client factory: static options in, reusable client out.

use crate::addr::Destination;
use crate::header::RequestHeader;
use crate::security::Security;
use crate::stream::VmessStream;
use crate::user::User;
use crate::VmessError;
use outpost_tls::{build_client_config, ClientTlsOptions, SessionCache};
use outpost_transport::websocket::{WebSocketConfig, WebSocketLayer};
use outpost_transport::{DialError, IoStream, TlsLayer, TransportChain};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Tcp,
    WebSocket,
}

impl Network {
    /// `""` and `"tcp"` mean raw TCP, `"ws"` means WebSocket.
    pub fn parse(name: &str) -> Result<Self, VmessError> {
        match name {
            "" | "tcp" => Ok(Self::Tcp),
            "ws" => Ok(Self::WebSocket),
            other => Err(VmessError::UnsupportedNetwork(other.to_string())),
        }
    }
}

/// Everything the client needs, fixed for its lifetime.
#[derive(Debug, Clone)]
pub struct Config {
    pub uuid: String,
    pub alter_id: u16,
    /// Cipher name: `auto`, `none`, `aes-128-gcm` or `chacha20-poly1305`.
    pub security: String,
    pub tls: bool,
    /// Server host; used for SNI and the default WebSocket `Host`.
    pub host_name: String,
    pub port: u16,
    pub network: String,
    pub websocket_path: String,
    pub websocket_headers: BTreeMap<String, String>,
    pub skip_cert_verify: bool,
    /// Resumption store bound into the TLS config when `tls` is set.
    pub session_cache: SessionCache,
}

impl Config {
    pub fn new(uuid: impl Into<String>, host_name: impl Into<String>, port: u16) -> Self {
        Self {
            uuid: uuid.into(),
            alter_id: 0,
            security: "auto".to_string(),
            tls: false,
            host_name: host_name.into(),
            port,
            network: String::new(),
            websocket_path: String::new(),
            websocket_headers: BTreeMap::new(),
            skip_cert_verify: false,
            session_cache: SessionCache::shared(),
        }
    }
}

/// Immutable VMess client. Share it behind an `Arc`; every connection only
/// borrows it.
#[derive(Debug)]
pub struct Client {
    user: User,
    security: Security,
    network: Network,
    tls: bool,
    chain: TransportChain,
}

impl Client {
    pub fn new(config: Config) -> Result<Self, VmessError> {
        let security = Security::parse(&config.security)?;
        let user = User::parse(&config.uuid, config.alter_id)?;
        let network = Network::parse(&config.network)?;

        let mut chain = TransportChain::new();
        if config.tls {
            let tls_config = build_client_config(
                &ClientTlsOptions::default()
                    .with_skip_cert_verify(config.skip_cert_verify)
                    .with_session_cache(config.session_cache.clone()),
            )?;
            let layer = TlsLayer::new(tls_config, &config.host_name).map_err(|e| match e {
                DialError::Tls(msg) => VmessError::InvalidServerName(msg),
                other => VmessError::Transport(other),
            })?;
            chain = chain.tls(layer);
        }
        if network == Network::WebSocket {
            let ws = WebSocketConfig {
                path: config.websocket_path.clone(),
                headers: config
                    .websocket_headers
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
                ..Default::default()
            };
            let layer = WebSocketLayer::new(ws, &config.host_name, config.port).map_err(|e| match e {
                DialError::WebSocket(msg) => VmessError::InvalidHeader(msg),
                other => VmessError::Transport(other),
            })?;
            chain = chain.websocket(layer);
        }

        tracing::debug!(
            server = %format!("{}:{}", config.host_name, config.port),
            security = %security,
            ?network,
            tls = config.tls,
            ids = user.ids().len(),
            "vmess client ready"
        );

        Ok(Self {
            user,
            security,
            network,
            tls: config.tls,
            chain,
        })
    }

    pub fn security(&self) -> Security {
        self.security
    }

    pub fn network(&self) -> Network {
        self.network
    }

    pub fn tls(&self) -> bool {
        self.tls
    }

    /// Layer TLS / WebSocket over `conn` as configured, then send the request
    /// header for `destination`.
    pub async fn connect(
        &self,
        conn: IoStream,
        destination: &Destination,
    ) -> Result<VmessStream<IoStream>, VmessError> {
        let stream = self.chain.wrap(conn).await?;
        let id = self.user.pick().clone();
        let request = RequestHeader::random(self.security, destination.clone());
        VmessStream::handshake(stream, &id, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UUID: &str = "b831381d-6324-4d53-ad4f-8cda48b30811";

    fn config() -> Config {
        Config::new(UUID, "example.com", 443)
    }

    #[test]
    fn defaults_build_a_plain_tcp_client() {
        let client = Client::new(config()).unwrap();
        assert_eq!(client.network(), Network::Tcp);
        assert_eq!(client.security(), Security::auto());
        assert!(!client.tls());
    }

    #[test]
    fn unknown_cipher_is_rejected() {
        let mut cfg = config();
        cfg.security = "unsupported-cipher".into();
        let err = Client::new(cfg).unwrap_err();
        assert!(matches!(err, VmessError::UnsupportedSecurity(_)));
    }

    #[test]
    fn unknown_network_is_rejected() {
        let mut cfg = config();
        cfg.network = "grpc".into();
        let err = Client::new(cfg).unwrap_err();
        assert_eq!(err.to_string(), "unsupported network: grpc");
    }

    #[test]
    fn invalid_ws_header_is_rejected() {
        let mut cfg = config();
        cfg.network = "ws".into();
        cfg.websocket_headers
            .insert("bad header".into(), "value".into());
        let err = Client::new(cfg).unwrap_err();
        assert!(matches!(err, VmessError::InvalidHeader(_)));
    }

    #[test]
    fn tls_with_invalid_server_name_is_rejected() {
        let mut cfg = Config::new(UUID, "not a host", 443);
        cfg.tls = true;
        let err = Client::new(cfg).unwrap_err();
        assert!(matches!(err, VmessError::InvalidServerName(_)));
    }

    #[test]
    fn tls_over_ws_builds() {
        let mut cfg = config();
        cfg.tls = true;
        cfg.network = "ws".into();
        cfg.websocket_path = "/ray".into();
        cfg.session_cache = SessionCache::new(4);
        let client = Client::new(cfg).unwrap();
        assert!(client.tls());
        assert_eq!(client.network(), Network::WebSocket);
        assert_eq!(client.chain.names(), vec!["tls", "ws"]);
    }
}

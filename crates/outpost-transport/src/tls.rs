//! # TLS 传输层
//!
//! 在已建立的连接上执行 rustls 客户端握手。`ClientConfig`（含根证书、
//! 跳过校验、会话复用缓存）由调用者构建一次并在所有连接间共享。

use crate::builder::StreamLayer;
use crate::dialer::{DialError, IoStream};
use async_trait::async_trait;
use rustls_pki_types::ServerName;
use std::sync::Arc;
use tokio_rustls::TlsConnector;

/// TLS client layer.
///
/// 字段说明
/// - `config`: 共享的 rustls 客户端配置
/// - `server_name`: SNI 及证书校验使用的服务器名（IP 地址不会发送 SNI）
#[derive(Clone)]
pub struct TlsLayer {
    config: Arc<rustls::ClientConfig>,
    server_name: ServerName<'static>,
}

impl TlsLayer {
    /// 创建 TLS 层；服务器名无法解析为 DNS 名或 IP 地址时返回 `DialError::Tls`
    pub fn new(config: Arc<rustls::ClientConfig>, server_name: &str) -> Result<Self, DialError> {
        let server_name = ServerName::try_from(server_name.to_owned())
            .map_err(|e| DialError::Tls(format!("invalid server name {server_name:?}: {e}")))?;
        Ok(Self {
            config,
            server_name,
        })
    }

    pub fn server_name(&self) -> &ServerName<'static> {
        &self.server_name
    }

    pub fn config(&self) -> &Arc<rustls::ClientConfig> {
        &self.config
    }
}

impl std::fmt::Debug for TlsLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsLayer")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl StreamLayer for TlsLayer {
    fn name(&self) -> &'static str {
        "tls"
    }

    async fn wrap(&self, stream: IoStream) -> Result<IoStream, DialError> {
        let connector = TlsConnector::from(self.config.clone());
        let tls = connector
            .connect(self.server_name.clone(), stream)
            .await
            .map_err(|e| DialError::Tls(format!("handshake failed: {e}")))?;
        tracing::debug!(
            server_name = ?self.server_name,
            version = ?tls.get_ref().1.protocol_version(),
            "tls handshake complete"
        );
        Ok(Box::new(tls))
    }
}

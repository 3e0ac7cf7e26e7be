//! # outpost-tls: TLS client configuration / TLS 客户端配置
//!
//! This crate centralizes how outbound adapters talk TLS:
//! - [`build_client_config`]: one rustls `ClientConfig` per configured proxy entry
//! - [`SessionCache`]: a shared, concurrency-safe session ticket store so that
//!   repeated dials to the same server resume instead of doing a full handshake
//! - [`NoVerify`]: the verifier used when `skip-cert-verify` is set
//!
//! All configs are built against the `ring` provider explicitly, so callers never
//! depend on a process-wide default `CryptoProvider` being installed.

use rustls::client::Resumption;
use rustls::crypto::CryptoProvider;
use rustls::ClientConfig;
use std::sync::Arc;

/// Dangerous certificate verifiers (skip-verify)
pub mod danger;

/// Root certificate store shared by every client config
pub mod global;

/// TLS session resumption cache
pub mod session;

pub use danger::NoVerify;
pub use session::{SessionCache, DEFAULT_SESSION_CACHE_CAPACITY};

/// TLS error types
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type TlsResult<T> = Result<T, TlsError>;

/// Knobs that shape a client config.
#[derive(Debug, Clone, Default)]
pub struct ClientTlsOptions {
    /// Accept any server certificate.
    pub skip_cert_verify: bool,
    /// Resumption store. `None` disables resumption entirely.
    pub session_cache: Option<SessionCache>,
}

impl ClientTlsOptions {
    #[must_use]
    pub fn with_skip_cert_verify(mut self, skip: bool) -> Self {
        self.skip_cert_verify = skip;
        self
    }

    #[must_use]
    pub fn with_session_cache(mut self, cache: SessionCache) -> Self {
        self.session_cache = Some(cache);
        self
    }
}

fn provider() -> Arc<CryptoProvider> {
    Arc::new(rustls::crypto::ring::default_provider())
}

/// Build a client config from [`ClientTlsOptions`].
///
/// The returned config is immutable and meant to be shared by every dial of
/// one proxy entry. When a [`SessionCache`] is given it becomes the config's
/// resumption store; the config never allocates a cache of its own.
pub fn build_client_config(opts: &ClientTlsOptions) -> TlsResult<Arc<ClientConfig>> {
    let provider = provider();
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| TlsError::Config(format!("protocol versions: {e}")))?;

    let mut config = if opts.skip_cert_verify {
        tracing::debug!("tls: certificate verification disabled");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerify::new(&provider)))
            .with_no_client_auth()
    } else {
        builder
            .with_root_certificates(global::base_root_store())
            .with_no_client_auth()
    };

    config.resumption = match &opts.session_cache {
        Some(cache) => Resumption::store(cache.store()),
        None => Resumption::disabled(),
    };

    Ok(Arc::new(config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_verifying_and_skip_verify_configs() {
        let cfg = build_client_config(&ClientTlsOptions::default()).unwrap();
        assert!(cfg.alpn_protocols.is_empty());

        let opts = ClientTlsOptions::default().with_skip_cert_verify(true);
        assert!(build_client_config(&opts).is_ok());
    }

    #[test]
    fn session_cache_handle_outlives_config() {
        use rustls::client::ClientSessionStore;
        use rustls::NamedGroup;
        use rustls::pki_types::ServerName;

        let cache = SessionCache::new(8);
        let opts = ClientTlsOptions::default().with_session_cache(cache.clone());
        let _cfg = build_client_config(&opts).unwrap();

        let name = ServerName::try_from("bound.example").unwrap();
        cache.store().set_kx_hint(name.clone(), NamedGroup::X25519);
        assert_eq!(cache.store().kx_hint(&name), Some(NamedGroup::X25519));
    }
}

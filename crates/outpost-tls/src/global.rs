//! Root certificate store.
//!
//! Every verifying client config trusts the same webpki root set. The store is
//! built once and cloned into each config.

use once_cell::sync::Lazy;
use rustls::RootCertStore;

static BASE_ROOTS: Lazy<RootCertStore> = Lazy::new(|| {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    tracing::debug!(roots = roots.len(), "tls: loaded webpki roots");
    roots
});

/// Return the base `RootCertStore` (webpki roots).
pub fn base_root_store() -> RootCertStore {
    BASE_ROOTS.clone()
}

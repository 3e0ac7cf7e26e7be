//! TLS session resumption cache / TLS 会话复用缓存
//!
//! A [`SessionCache`] is a cheap handle around one rustls
//! `ClientSessionMemoryCache`. Clones share the same store, so every client
//! config built from the same handle resumes against the same tickets.
//!
//! The store is internally synchronized; concurrent handshakes may read and
//! write it without extra locking.

use once_cell::sync::Lazy;
use rustls::client::{ClientSessionMemoryCache, ClientSessionStore};
use std::fmt;
use std::sync::Arc;

/// Number of server names the default cache remembers.
pub const DEFAULT_SESSION_CACHE_CAPACITY: usize = 128;

static SHARED: Lazy<SessionCache> = Lazy::new(SessionCache::default);

#[derive(Clone)]
pub struct SessionCache {
    store: Arc<ClientSessionMemoryCache>,
    capacity: usize,
}

impl SessionCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            store: Arc::new(ClientSessionMemoryCache::new(capacity)),
            capacity,
        }
    }

    /// Process-wide cache used by outbounds that are not given one explicitly.
    pub fn shared() -> Self {
        SHARED.clone()
    }

    /// The store handed to `ClientConfig::resumption`.
    pub fn store(&self) -> Arc<dyn ClientSessionStore> {
        self.store.clone()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether two handles point at the same underlying store.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_CACHE_CAPACITY)
    }
}

impl fmt::Debug for SessionCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCache")
            .field("capacity", &self.capacity)
            .field("handles", &Arc::strong_count(&self.store))
            .finish()
    }
}

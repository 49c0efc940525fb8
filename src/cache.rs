use dashmap::DashMap;
use std::sync::Arc;

use crate::models::Link;

/// What the redirect path needs without a store round-trip: where to send
/// the client and which owner's dashboards to notify.
#[derive(Debug, Clone)]
pub struct CachedLink {
    pub target_url: String,
    pub owner_id: String,
}

impl From<&Link> for CachedLink {
    fn from(link: &Link) -> Self {
        Self {
            target_url: link.target_url.clone(),
            owner_id: link.owner_id.clone(),
        }
    }
}

/// Thread-safe in-memory cache mapping code -> CachedLink.
///
/// Backed by a DashMap so reads are concurrent and lock-free for most
/// cases. Warmed on startup by loading all links from the store, then
/// kept in sync via explicit insert/remove calls from the handlers after
/// every write operation. Soft-deleted links stay cached (they still
/// redirect); hard-deleted links are evicted.
#[derive(Clone, Debug, Default)]
pub struct LinkCache {
    inner: Arc<DashMap<String, CachedLink>>,
}

impl LinkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or update a mapping.
    pub fn set(&self, link: &Link) {
        self.inner.insert(link.code.clone(), CachedLink::from(link));
    }

    /// Look up a code. Returns a clone of the cached entry if present.
    pub fn get(&self, code: &str) -> Option<CachedLink> {
        self.inner.get(code).map(|v| v.clone())
    }

    /// Remove a mapping (hard delete only).
    pub fn remove(&self, code: &str) {
        self.inner.remove(code);
    }

    /// Number of entries currently cached.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

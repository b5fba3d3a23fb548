use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

use super::{RepoIdentity, RepoResolver};
use crate::error::Result;

struct CacheEntry {
    identity: RepoIdentity,
    expires_at: Instant,
}

/// Per-directory TTL cache in front of a [`RepoResolver`].
///
/// An entry is served while `now < expires_at`. Failed resolutions are not
/// cached.
pub struct RepoCache {
    resolver: Arc<dyn RepoResolver>,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl RepoCache {
    pub fn new(resolver: Arc<dyn RepoResolver>, ttl: Duration) -> Self {
        Self {
            resolver,
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached identity for `path` if still fresh. An expired entry hit here
    /// is removed.
    pub fn get(&self, path: &str) -> Option<RepoIdentity> {
        let mut entries = self.entries();
        match entries.get(path) {
            Some(entry) if Instant::now() < entry.expires_at => Some(entry.identity.clone()),
            Some(_) => {
                entries.remove(path);
                None
            }
            None => None,
        }
    }

    /// Return the cached identity or resolve and cache it with a fresh TTL.
    pub async fn get_or_resolve(&self, path: &str) -> Result<RepoIdentity> {
        if let Some(identity) = self.get(path) {
            tracing::trace!(path, repo = %identity.id, "repo cache hit");
            return Ok(identity);
        }

        let identity = self.resolver.resolve(Path::new(path)).await?;
        self.entries().insert(
            path.to_string(),
            CacheEntry {
                identity: identity.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(identity)
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn evict_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

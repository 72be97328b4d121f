//! Report cache abstraction.
//!
//! The orchestrator receives an `Arc<dyn ReportCache>` at construction, so
//! the cache's lifetime is whatever the owner decides (the server keeps one
//! per process). Entries expire passively: an expired entry is treated as
//! absent on read and dropped at that point. There is no invalidation API.
//!
//! [`InMemoryCache`] measures age with `tokio::time::Instant`, so tests can
//! move past a TTL with a paused clock.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use tokio::time::Instant;

use crate::models::{AnalysisMode, Report};

/// Cache key: one report per repository and mode.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub repository: String,
    pub mode: AnalysisMode,
}

impl CacheKey {
    pub fn new(repository: impl Into<String>, mode: AnalysisMode) -> Self {
        Self {
            repository: repository.into(),
            mode,
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "repo-{}:{}", self.repository, self.mode)
    }
}

/// Storage for finished reports.
pub trait ReportCache: Send + Sync {
    /// Returns the unexpired report for `key`, if any.
    fn get(&self, key: &CacheKey) -> Option<Report>;

    /// Store `value` under `key` for `ttl`, replacing any previous entry.
    fn set(&self, key: CacheKey, value: Report, ttl: Duration);
}

struct CacheEntry {
    value: Report,
    expires_at: Instant,
}

/// Process-local cache behind a `RwLock`.
pub struct InMemoryCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Number of entries held, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportCache for InMemoryCache {
    fn get(&self, key: &CacheKey) -> Option<Report> {
        let now = Instant::now();
        {
            let entries = self.entries.read().ok()?;
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: drop it so the map does not grow without bound.
        if let Ok(mut entries) = self.entries.write() {
            if entries.get(key).is_some_and(|e| e.expires_at <= now) {
                entries.remove(key);
            }
        }
        None
    }

    fn set(&self, key: CacheKey, value: Report, ttl: Duration) {
        let entry = CacheEntry {
            value,
            expires_at: Instant::now() + ttl,
        };
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key, entry);
        }
    }
}

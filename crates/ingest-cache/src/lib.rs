//! Bounded LRU cache over request fingerprints (spec.md §4.2).
//!
//! The teacher's `tower-resilience-cache` crate generalizes over several
//! eviction policies and an arbitrary `tower::Service`; this cache has a
//! single policy (LRU, per the spec) and a single concrete value type
//! (raw response bytes plus a content-type hint), so it is a plain mutex-
//! guarded store rather than a generic `Layer`. The internal shape —
//! `lru::LruCache` doing the O(1) get/put/evict bookkeeping under one lock
//! — is lifted directly from that crate's `store.rs`.

use ingest_core::ErrorCategory;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    #[error("cache store failure: {0}")]
    Store(String),
}

impl From<CacheError> for ErrorCategory {
    fn from(_: CacheError) -> Self {
        ErrorCategory::Operation
    }
}

/// A cached response: raw bytes plus the decoded content-type hint and the
/// moment it was inserted (spec.md §3, CacheEntry).
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub inserted_at: Instant,
}

impl CacheEntry {
    fn is_expired(&self, ttl: Duration) -> bool {
        self.inserted_at.elapsed() > ttl
    }
}

/// Read-only snapshot returned by [`ResponseCache::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

struct Inner {
    store: LruCache<String, CacheEntry>,
    ttl: Duration,
    stats: CacheStats,
}

/// Bounded, thread-safe LRU cache keyed by request fingerprint.
///
/// A single mutex guards every operation — the "simplest correct
/// implementation" the spec explicitly allows, since the cache is shared
/// by every concurrent worker in the Orchestrator's pool.
pub struct ResponseCache {
    inner: Mutex<Inner>,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::new(1000).unwrap());
        Self {
            inner: Mutex::new(Inner {
                store: LruCache::new(cap),
                ttl,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Returns the cached bytes for `fingerprint`, or `None` on a miss —
    /// including the lazy-expiry case where an entry is older than the
    /// configured TTL (spec: "treated as Miss and removed on access").
    pub fn get(&self, fingerprint: &str) -> Option<CacheEntry> {
        let mut guard = self.inner.lock();
        let ttl = guard.ttl;
        let expired = guard
            .store
            .peek(fingerprint)
            .map(|e| e.is_expired(ttl))
            .unwrap_or(false);

        if expired {
            guard.store.pop(fingerprint);
            guard.stats.misses += 1;
            guard.stats.size = guard.store.len();
            return None;
        }

        match guard.store.get(fingerprint).cloned() {
            Some(entry) => {
                guard.stats.hits += 1;
                Some(entry)
            }
            None => {
                guard.stats.misses += 1;
                None
            }
        }
    }

    /// Inserts `bytes` under `fingerprint`, evicting the least-recently-used
    /// entry if the cache is at capacity.
    pub fn put(&self, fingerprint: String, bytes: Vec<u8>, content_type: String) {
        let mut guard = self.inner.lock();
        let was_full = guard.store.len() >= guard.store.cap().get()
            && !guard.store.contains(&fingerprint);

        guard.store.put(
            fingerprint,
            CacheEntry {
                bytes,
                content_type,
                inserted_at: Instant::now(),
            },
        );

        if was_full {
            guard.stats.evictions += 1;
        }
        guard.stats.size = guard.store.len();
    }

    pub fn invalidate(&self) {
        let mut guard = self.inner.lock();
        guard.store.clear();
        guard.stats.size = 0;
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new(1000, Duration::from_secs(24 * 3600))
    }
}

/// Spawns a background sweep that periodically drops expired entries.
/// Proactive sweeping is permitted but never required (spec.md §4.2).
#[cfg(feature = "sweep")]
pub fn spawn_sweep(
    cache: std::sync::Arc<ResponseCache>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let mut guard = cache.inner.lock();
            let ttl = guard.ttl;
            let expired: Vec<String> = guard
                .store
                .iter()
                .filter(|(_, e)| e.is_expired(ttl))
                .map(|(k, _)| k.clone())
                .collect();
            for key in expired {
                guard.store.pop(&key);
            }
            guard.stats.size = guard.store.len();
        }
    })
}

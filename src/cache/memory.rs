//! In-memory decision cache (spec §4.7), backed by `moka`, plus a `NullCache`
//! for disabled caching.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use moka::Expiry;

use crate::constants::DEFAULT_MAX_CACHE_ENTRIES;
use crate::error::CacheError;

use super::entry::DecisionCacheEntry;
use super::traits::{Cache, CacheStats};

struct DecisionExpiry;

impl Expiry<String, DecisionCacheEntry> for DecisionExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &DecisionCacheEntry,
        _created_at: Instant,
    ) -> Option<Duration> {
        let remaining = value.expires_at.signed_duration_since(Utc::now());
        remaining.to_std().ok().or(Some(Duration::from_secs(0)))
    }
}

pub(crate) struct CacheStatsTracker {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStatsTracker {
    fn new() -> Self {
        CacheStatsTracker {
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

pub struct MemoryCache {
    cache: moka::future::Cache<String, DecisionCacheEntry>,
    stats: Arc<CacheStatsTracker>,
}

impl MemoryCache {
    pub fn new(max_entries: u64) -> Self {
        let cache = moka::future::Cache::builder()
            .max_capacity(max_entries)
            .expire_after(DecisionExpiry)
            .build();
        MemoryCache {
            cache,
            stats: Arc::new(CacheStatsTracker::new()),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        MemoryCache::new(DEFAULT_MAX_CACHE_ENTRIES)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn lookup(&self, key: &str) -> Result<Option<DecisionCacheEntry>, CacheError> {
        match self.cache.get(key).await {
            Some(entry) if !entry.is_expired(Utc::now()) => {
                self.stats.record_hit();
                Ok(Some(entry))
            }
            _ => {
                self.stats.record_miss();
                Ok(None)
            }
        }
    }

    async fn store(&self, key: String, entry: DecisionCacheEntry) -> Result<(), CacheError> {
        self.cache.insert(key, entry).await;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<(), CacheError> {
        let prefix = prefix.to_string();
        self.cache.invalidate_entries_if(move |k, _| k.starts_with(&prefix))
            .map_err(|e| CacheError::Unavailable(e.to_string()))?;
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn size(&self) -> u64 {
        self.cache.run_pending_tasks().await;
        self.cache.entry_count()
    }

    async fn close(&self) -> Result<(), CacheError> {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        Ok(())
    }

    async fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }
}

/// No-op cache used when decision caching is disabled entirely.
#[derive(Default)]
pub struct NullCache;

#[async_trait]
impl Cache for NullCache {
    async fn lookup(&self, _key: &str) -> Result<Option<DecisionCacheEntry>, CacheError> {
        Ok(None)
    }

    async fn store(&self, _key: String, _entry: DecisionCacheEntry) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete_prefix(&self, _prefix: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn size(&self) -> u64 {
        0
    }

    async fn close(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

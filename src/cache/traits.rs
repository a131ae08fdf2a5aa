//! The `Cache` trait (spec §4.7): four keyed operations plus `Close`.
//! Implementations may be in-memory or backed by a persistent engine;
//! replacement must preserve this API.

use async_trait::async_trait;

use crate::error::CacheError;

use super::entry::DecisionCacheEntry;

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

#[async_trait]
pub trait Cache: Send + Sync {
    async fn lookup(&self, key: &str) -> Result<Option<DecisionCacheEntry>, CacheError>;
    async fn store(&self, key: String, entry: DecisionCacheEntry) -> Result<(), CacheError>;
    async fn delete_prefix(&self, prefix: &str) -> Result<(), CacheError>;
    async fn size(&self) -> u64;
    async fn close(&self) -> Result<(), CacheError>;
    async fn stats(&self) -> CacheStats {
        CacheStats::default()
    }
}

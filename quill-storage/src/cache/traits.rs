//! Distributed lock / cache service trait.
//!
//! The service is an external collaborator (Redis in production). This core
//! only relies on the operations below; eviction and TTL of entries stay
//! with the service.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quill_core::{Acquired, CacheError, CacheKey, FamilyLease, LeaseData, Prompt};

use super::watermark::Watermark;

/// A prompt snapshot held by the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedPrompt {
    pub prompt: Prompt,
    pub cached_at: DateTime<Utc>,
    /// Family watermark under which the snapshot was read from the store.
    pub watermark: Watermark,
}

/// Lock and cache operations scoped by string keys.
///
/// Lock keys come from [`quill_core::FamilyKey::lock_key`], invalidation
/// prefixes from [`quill_core::FamilyKey::cache_prefix`].
#[async_trait]
pub trait FamilyCache: Send + Sync {
    /// Try once to take the lock on `key` with the given lease.
    ///
    /// Returns `Ok(None)` when another holder has an unexpired lease.
    async fn try_acquire_lock(
        &self,
        key: &str,
        lease: Duration,
    ) -> Result<Option<FamilyLease<Acquired>>, CacheError>;

    /// Release a lease. Fails with `LockNotHeld` when the lease expired and
    /// someone else took the lock meanwhile.
    async fn release_lock(&self, lease: LeaseData) -> Result<(), CacheError>;

    /// Whether an unexpired lease is held on `key`.
    async fn is_locked(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every entry whose key starts with `prefix` and advance the
    /// watermark of `prefix`. Returns the number of removed entries.
    async fn invalidate_keys_matching(&self, prefix: &str) -> Result<u64, CacheError>;

    /// Current watermark of `prefix`.
    async fn watermark(&self, prefix: &str) -> Result<Watermark, CacheError>;

    async fn get(&self, key: &CacheKey) -> Result<Option<CachedPrompt>, CacheError>;

    /// Populate `key`, unless the family is locked or its watermark moved
    /// past `observed`. Returns whether the entry was written.
    async fn put_if_unchanged(
        &self,
        key: &CacheKey,
        prompt: &Prompt,
        observed: Watermark,
    ) -> Result<bool, CacheError>;

    /// Whether `put_if_unchanged` honours family locks. Services that cannot
    /// hold back population need a second sweep after every write.
    fn blocks_population_while_locked(&self) -> bool {
        true
    }

    async fn stats(&self) -> Result<CacheStats, CacheError>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
    /// Populations refused because the family was locked or had moved on.
    pub rejected_puts: u64,
    pub invalidated: u64,
}

impl CacheStats {
    /// Hit rate between 0.0 and 1.0.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.8).abs() < 0.001);
        assert!((CacheStats::default().hit_rate() - 0.0).abs() < 0.001);
    }
}

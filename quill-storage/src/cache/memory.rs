//! In-memory lock / cache service.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use quill_core::{Acquired, CacheError, CacheKey, FamilyLease, LeaseData, Prompt};
use tokio::sync::Mutex;

use super::traits::{CacheStats, CachedPrompt, FamilyCache};
use super::watermark::Watermark;

#[derive(Debug, Default)]
struct CacheState {
    locks: HashMap<String, LeaseData>,
    entries: HashMap<String, CachedPrompt>,
    watermarks: HashMap<String, Watermark>,
    stats: CacheStats,
}

impl CacheState {
    /// Drop the lease on `key` if it has expired, returning whether one is
    /// still held.
    fn lock_held(&mut self, key: &str) -> bool {
        let now = Utc::now();
        match self.locks.get(key) {
            Some(lease) if lease.is_expired(now) => {
                tracing::debug!(key, "Reaping expired family lock");
                self.locks.remove(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    fn watermark(&self, prefix: &str) -> Watermark {
        self.watermarks.get(prefix).copied().unwrap_or_default()
    }
}

/// Lock and cache service held in process memory.
///
/// Behaves like the production service for a single process: leases expire,
/// invalidation advances watermarks, and population is refused while the
/// family is locked. [`InMemoryFamilyCache::plain`] builds a variant that
/// ignores locks and watermarks on population, like a bare key-value cache.
#[derive(Debug, Clone)]
pub struct InMemoryFamilyCache {
    state: Arc<Mutex<CacheState>>,
    guarded_population: bool,
}

impl Default for InMemoryFamilyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFamilyCache {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            guarded_population: true,
        }
    }

    /// Cache whose writes ignore family locks and watermarks.
    pub fn plain() -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            guarded_population: false,
        }
    }

    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Number of entries under `prefix`.
    pub async fn entries_matching(&self, prefix: &str) -> usize {
        self.state
            .lock()
            .await
            .entries
            .keys()
            .filter(|k| k.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl FamilyCache for InMemoryFamilyCache {
    async fn try_acquire_lock(
        &self,
        key: &str,
        lease: Duration,
    ) -> Result<Option<FamilyLease<Acquired>>, CacheError> {
        let mut state = self.state.lock().await;
        if state.lock_held(key) {
            return Ok(None);
        }
        let data = LeaseData::new(key, lease, Utc::now())?;
        state.locks.insert(key.to_string(), data.clone());
        Ok(Some(FamilyLease::new(data)))
    }

    async fn release_lock(&self, lease: LeaseData) -> Result<(), CacheError> {
        let mut state = self.state.lock().await;
        match state.locks.get(&lease.key) {
            Some(held) if held.token == lease.token => {
                state.locks.remove(&lease.key);
                Ok(())
            }
            _ => Err(CacheError::LockNotHeld { key: lease.key }),
        }
    }

    async fn is_locked(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.state.lock().await.lock_held(key))
    }

    async fn invalidate_keys_matching(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut state = self.state.lock().await;
        let before = state.entries.len();
        state.entries.retain(|k, _| !k.starts_with(prefix));
        let removed = (before - state.entries.len()) as u64;

        let next = state.watermark(prefix).next();
        state.watermarks.insert(prefix.to_string(), next);
        state.stats.invalidated += removed;
        state.stats.entry_count = state.entries.len() as u64;
        Ok(removed)
    }

    async fn watermark(&self, prefix: &str) -> Result<Watermark, CacheError> {
        Ok(self.state.lock().await.watermark(prefix))
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<CachedPrompt>, CacheError> {
        let mut state = self.state.lock().await;
        let entry = state.entries.get(&key.encode()).cloned();
        if entry.is_some() {
            state.stats.hits += 1;
        } else {
            state.stats.misses += 1;
        }
        Ok(entry)
    }

    async fn put_if_unchanged(
        &self,
        key: &CacheKey,
        prompt: &Prompt,
        observed: Watermark,
    ) -> Result<bool, CacheError> {
        let mut state = self.state.lock().await;
        let family = key.family();

        if self.guarded_population {
            let moved = !state.watermark(&family.cache_prefix()).same_sequence(&observed);
            if moved || state.lock_held(&family.lock_key()) {
                state.stats.rejected_puts += 1;
                return Ok(false);
            }
        }

        state.entries.insert(
            key.encode(),
            CachedPrompt {
                prompt: prompt.clone(),
                cached_at: Utc::now(),
                watermark: observed,
            },
        );
        state.stats.entry_count = state.entries.len() as u64;
        Ok(true)
    }

    fn blocks_population_while_locked(&self) -> bool {
        self.guarded_population
    }

    async fn stats(&self) -> Result<CacheStats, CacheError> {
        Ok(self.state.lock().await.stats.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::FamilyKey;

    fn greeting() -> FamilyKey {
        FamilyKey::new("proj", "greeting")
    }

    fn row() -> Prompt {
        Prompt::new("proj", "greeting", 1, serde_json::json!("Hello"))
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_released() {
        let cache = InMemoryFamilyCache::new();
        let key = greeting().lock_key();

        let lease = cache
            .try_acquire_lock(&key, Duration::from_secs(30))
            .await
            .unwrap()
            .expect("first acquire succeeds");
        assert!(cache.is_locked(&key).await.unwrap());
        assert!(cache
            .try_acquire_lock(&key, Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());

        cache.release_lock(lease.release()).await.unwrap();
        assert!(!cache.is_locked(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_can_be_taken_over() {
        let cache = InMemoryFamilyCache::new();
        let key = greeting().lock_key();

        let stale = cache
            .try_acquire_lock(&key, Duration::from_millis(10))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let fresh = cache
            .try_acquire_lock(&key, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(fresh.is_some());

        // The stale holder no longer owns the lock.
        let err = cache.release_lock(stale.release()).await.unwrap_err();
        assert!(matches!(err, CacheError::LockNotHeld { .. }));
    }

    #[tokio::test]
    async fn test_unrepresentable_lease_takes_no_lock() {
        let cache = InMemoryFamilyCache::new();
        let key = greeting().lock_key();

        let err = cache
            .try_acquire_lock(&key, Duration::from_millis(u64::MAX))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::InvalidLease { .. }));
        assert!(!cache.is_locked(&key).await.unwrap());

        let _held = cache
            .try_acquire_lock(&key, Duration::from_secs(30))
            .await
            .unwrap()
            .expect("lock is free");
        assert!(cache
            .try_acquire_lock(&key, Duration::from_secs(30))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_invalidation_sweeps_family_and_advances_watermark() {
        let cache = InMemoryFamilyCache::new();
        let family = greeting();
        let other = FamilyKey::new("proj", "farewell");
        let prefix = family.cache_prefix();

        let w0 = cache.watermark(&prefix).await.unwrap();
        assert!(cache.put_if_unchanged(&family.version_key(1), &row(), w0).await.unwrap());
        assert!(cache
            .put_if_unchanged(&family.label_key("latest"), &row(), w0)
            .await
            .unwrap());
        let other_w = cache.watermark(&other.cache_prefix()).await.unwrap();
        assert!(cache.put_if_unchanged(&other.version_key(1), &row(), other_w).await.unwrap());

        let removed = cache.invalidate_keys_matching(&prefix).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(cache.entry_count().await, 1);
        assert!(cache.watermark(&prefix).await.unwrap().is_newer_than(&w0));
    }

    #[tokio::test]
    async fn test_put_refused_while_locked_or_after_invalidation() {
        let cache = InMemoryFamilyCache::new();
        let family = greeting();
        let prefix = family.cache_prefix();
        let observed = cache.watermark(&prefix).await.unwrap();

        let lease = cache
            .try_acquire_lock(&family.lock_key(), Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert!(!cache.put_if_unchanged(&family.version_key(1), &row(), observed).await.unwrap());
        cache.release_lock(lease.release()).await.unwrap();

        cache.invalidate_keys_matching(&prefix).await.unwrap();
        assert!(!cache.put_if_unchanged(&family.version_key(1), &row(), observed).await.unwrap());
        assert_eq!(cache.stats().await.unwrap().rejected_puts, 2);
    }

    #[tokio::test]
    async fn test_plain_cache_ignores_locks() {
        let cache = InMemoryFamilyCache::plain();
        let family = greeting();
        assert!(!cache.blocks_population_while_locked());

        let _lease = cache
            .try_acquire_lock(&family.lock_key(), Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();
        assert!(cache
            .put_if_unchanged(&family.version_key(1), &row(), Watermark::zero())
            .await
            .unwrap());
    }
}

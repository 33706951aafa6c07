//! Cache coherence guard.
//!
//! Wraps a family write in lock / invalidate / write / unlock so that no
//! reader can re-populate the cache with a pre-write snapshot.
//!
//! Lock order is always family lock first, store transaction second. The
//! lock is released on every exit path: explicitly after the write, or from
//! [`HeldLease`]'s `Drop` when the surrounding future is cancelled. The lease
//! TTL is the last resort when neither runs.

use std::future::Future;
use std::sync::Arc;

use quill_core::{Acquired, CacheError, FamilyKey, FamilyLease, QuillConfig, QuillResult};
use quill_storage::FamilyCache;
use tokio::time::Instant;

/// An acquired family lock that releases itself when dropped.
pub struct HeldLease<C>
where
    C: FamilyCache + 'static,
{
    cache: Arc<C>,
    lease: Option<FamilyLease<Acquired>>,
}

impl<C> HeldLease<C>
where
    C: FamilyCache + 'static,
{
    fn new(cache: Arc<C>, lease: FamilyLease<Acquired>) -> Self {
        Self {
            cache,
            lease: Some(lease),
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.lease.as_ref().map(|l| l.key())
    }

    /// Release now. Failures are logged; the lease TTL covers them.
    async fn release(mut self) {
        if let Some(lease) = self.lease.take() {
            let data = lease.release();
            let key = data.key.clone();
            match self.cache.release_lock(data).await {
                Ok(()) => tracing::trace!(key = %key, "Released family lock"),
                Err(e) => tracing::warn!(error = %e, key = %key, "Failed to release family lock"),
            }
        }
    }
}

impl<C> Drop for HeldLease<C>
where
    C: FamilyCache + 'static,
{
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        let data = lease.release();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let cache = Arc::clone(&self.cache);
                handle.spawn(async move {
                    let key = data.key.clone();
                    if let Err(e) = cache.release_lock(data).await {
                        tracing::warn!(error = %e, key = %key, "Failed to release abandoned family lock");
                    } else {
                        tracing::debug!(key = %key, "Released abandoned family lock");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(
                    key = %data.key,
                    expires_at = %data.expires_at,
                    "No runtime to release family lock, leaving it to expire"
                );
            }
        }
    }
}

/// Serialises writers per prompt family and keeps the cache coherent.
pub struct CacheCoherenceGuard<C>
where
    C: FamilyCache + 'static,
{
    cache: Arc<C>,
    config: QuillConfig,
}

impl<C> CacheCoherenceGuard<C>
where
    C: FamilyCache + 'static,
{
    pub fn new(cache: Arc<C>, config: QuillConfig) -> Self {
        Self { cache, config }
    }

    pub fn config(&self) -> &QuillConfig {
        &self.config
    }

    /// Acquire the family lock, polling until `lock_wait` elapses.
    pub async fn lock(&self, family: &FamilyKey) -> QuillResult<HeldLease<C>> {
        let key = family.lock_key();
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            if let Some(lease) = self
                .cache
                .try_acquire_lock(&key, self.config.lock_lease)
                .await?
            {
                tracing::debug!(key = %key, attempts, "Acquired family lock");
                return Ok(HeldLease::new(Arc::clone(&self.cache), lease));
            }

            let waited = started.elapsed();
            if waited >= self.config.lock_wait {
                tracing::warn!(key = %key, attempts, waited = ?waited, "Timed out waiting for family lock");
                return Err(CacheError::LockTimeout { key, waited }.into());
            }
            let remaining = self.config.lock_wait - waited;
            tokio::time::sleep(self.config.lock_poll_interval.min(remaining)).await;
        }
    }

    /// Drop every cached entry of the family and advance its watermark.
    pub async fn invalidate(&self, family: &FamilyKey) -> QuillResult<u64> {
        let removed = self
            .cache
            .invalidate_keys_matching(&family.cache_prefix())
            .await?;
        tracing::debug!(family = %family, removed, "Invalidated family cache");
        Ok(removed)
    }

    /// Release the family lock. Never fails.
    pub async fn unlock(&self, lease: HeldLease<C>) {
        lease.release().await;
    }

    fn sweeps_after_write(&self) -> bool {
        self.config.post_write_invalidation || !self.cache.blocks_population_while_locked()
    }

    /// Run `write` while holding the family lock.
    ///
    /// The cache is swept before `write` starts; if the sweep fails, `write`
    /// is never polled. When the cache cannot hold back population during
    /// the lock, or when configured, a second sweep follows a successful
    /// write. The lock is released whatever `write` returns.
    pub async fn run_locked<T, F>(&self, family: &FamilyKey, write: F) -> QuillResult<T>
    where
        F: Future<Output = QuillResult<T>>,
    {
        let lease = self.lock(family).await?;

        if let Err(e) = self.invalidate(family).await {
            tracing::warn!(error = %e, family = %family, "Cache invalidation failed, aborting write");
            self.unlock(lease).await;
            return Err(e);
        }

        let result = write.await;

        if result.is_ok() && self.sweeps_after_write() {
            if let Err(e) = self.invalidate(family).await {
                tracing::warn!(error = %e, family = %family, "Post-write cache invalidation failed");
            }
        }

        self.unlock(lease).await;
        result
    }
}

impl<C> Clone for CacheCoherenceGuard<C>
where
    C: FamilyCache + 'static,
{
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            config: self.config.clone(),
        }
    }
}

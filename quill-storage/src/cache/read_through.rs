//! Read-through prompt resolution.
//!
//! Readers consult the cache first and fall back to the store. A store read
//! is written back only if, before fetching, the family was unlocked and its
//! watermark is still unchanged when the write lands. Any mutation racing the
//! read either holds the lock or has advanced the watermark, so a
//! pre-mutation snapshot never reaches the cache.

use std::sync::Arc;

use quill_core::{
    CacheKey, FamilyKey, Prompt, QuillResult, LATEST_LABEL, PRODUCTION_LABEL,
};

use super::freshness::{CacheRead, Freshness};
use super::traits::FamilyCache;
use super::watermark::Watermark;
use crate::store::{PromptReads, PromptStore};

/// How a reader names the version it wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSelector {
    Version(i32),
    Label(String),
    /// The version labelled `latest`.
    Latest,
    /// The version labelled `production`, used when neither version nor
    /// label is given.
    Production,
}

impl PromptSelector {
    pub fn label(label: impl Into<String>) -> Self {
        PromptSelector::Label(label.into())
    }

    fn cache_key(&self, family: &FamilyKey) -> CacheKey {
        match self {
            PromptSelector::Version(v) => family.version_key(*v),
            PromptSelector::Label(l) => family.label_key(l.clone()),
            PromptSelector::Latest => family.label_key(LATEST_LABEL),
            PromptSelector::Production => family.label_key(PRODUCTION_LABEL),
        }
    }

    fn label_name(&self) -> Option<&str> {
        match self {
            PromptSelector::Version(_) => None,
            PromptSelector::Label(l) => Some(l.as_str()),
            PromptSelector::Latest => Some(LATEST_LABEL),
            PromptSelector::Production => Some(PRODUCTION_LABEL),
        }
    }
}

/// Cache-aware prompt reader.
pub struct PromptReader<S, C>
where
    S: PromptStore,
    C: FamilyCache,
{
    store: Arc<S>,
    cache: Arc<C>,
}

impl<S, C> PromptReader<S, C>
where
    S: PromptStore,
    C: FamilyCache,
{
    pub fn new(store: Arc<S>, cache: Arc<C>) -> Self {
        Self { store, cache }
    }

    /// Resolve a prompt, returning `Ok(None)` when no row matches.
    ///
    /// Cache service failures degrade to a plain store read.
    pub async fn get(
        &self,
        project_id: &str,
        name: &str,
        selector: &PromptSelector,
        freshness: Freshness,
    ) -> QuillResult<Option<CacheRead<Prompt>>> {
        let family = FamilyKey::new(project_id, name);
        let key = selector.cache_key(&family);
        let prefix = family.cache_prefix();

        let current = match self.cache.watermark(&prefix).await {
            Ok(w) => Some(w),
            Err(e) => {
                tracing::warn!(error = %e, family = %family, "Cache unavailable, reading from store");
                None
            }
        };

        if let Some(current) = current {
            if let Some(hit) = self.cached(&key, current, &freshness).await {
                return Ok(Some(hit));
            }
        }

        // Locked means a mutation is in flight: serve from the store but
        // leave the cache empty.
        let may_populate = match current {
            Some(_) => !self.cache.is_locked(&family.lock_key()).await.unwrap_or(true),
            None => false,
        };

        let Some(prompt) = self.fetch(&family, selector).await? else {
            return Ok(None);
        };

        let observed = current.unwrap_or_default();
        let populated = if may_populate {
            match self.cache.put_if_unchanged(&key, &prompt, observed).await {
                Ok(written) => written,
                Err(e) => {
                    tracing::warn!(error = %e, family = %family, "Failed to populate prompt cache");
                    false
                }
            }
        } else {
            false
        };

        Ok(Some(CacheRead::from_storage(prompt, observed, populated)))
    }

    async fn cached(
        &self,
        key: &CacheKey,
        current: Watermark,
        freshness: &Freshness,
    ) -> Option<CacheRead<Prompt>> {
        let entry = match self.cache.get(key).await {
            Ok(entry) => entry?,
            Err(e) => {
                tracing::warn!(error = %e, "Cache read failed, falling back to store");
                return None;
            }
        };

        let usable = match freshness {
            Freshness::BestEffort { max_staleness } => {
                let age = chrono::Utc::now()
                    .signed_duration_since(entry.cached_at)
                    .to_std()
                    .unwrap_or_default();
                age <= *max_staleness
            }
            Freshness::Consistent => entry.watermark.same_sequence(&current),
        };

        usable.then(|| CacheRead::from_cache(entry.prompt, entry.cached_at, entry.watermark))
    }

    async fn fetch(&self, family: &FamilyKey, selector: &PromptSelector) -> QuillResult<Option<Prompt>> {
        let mut reader = self.store.reader().await?;
        match selector {
            PromptSelector::Version(v) => {
                reader.find_version(family.project_id(), family.name(), *v).await
            }
            other => {
                let label = other.label_name().unwrap_or(PRODUCTION_LABEL);
                reader
                    .find_by_label(family.project_id(), family.name(), label)
                    .await
            }
        }
    }
}

impl<S, C> Clone for PromptReader<S, C>
where
    S: PromptStore,
    C: FamilyCache,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::memory::InMemoryFamilyCache;
    use crate::memory::InMemoryPromptStore;
    use crate::store::PromptTransaction;
    use quill_core::LabelSet;
    use std::time::Duration;

    async fn seeded() -> (Arc<InMemoryPromptStore>, Arc<InMemoryFamilyCache>) {
        let store = Arc::new(InMemoryPromptStore::new());
        let mut tx = store.begin().await.unwrap();
        tx.insert_prompt(
            &Prompt::new("proj", "greeting", 1, serde_json::json!("Hello"))
                .with_labels(LabelSet::from_iter(["production"])),
        )
        .await
        .unwrap();
        tx.insert_prompt(
            &Prompt::new("proj", "greeting", 2, serde_json::json!("Hi"))
                .with_labels(LabelSet::latest()),
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();
        (store, Arc::new(InMemoryFamilyCache::new()))
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let (store, cache) = seeded().await;
        let reader = PromptReader::new(store, cache);

        let first = reader
            .get("proj", "greeting", &PromptSelector::Latest, Freshness::Consistent)
            .await
            .unwrap()
            .unwrap();
        assert!(first.was_cache_miss());
        assert!(first.populated_cache());
        assert_eq!(first.value().version, 2);

        let second = reader
            .get("proj", "greeting", &PromptSelector::Latest, Freshness::Consistent)
            .await
            .unwrap()
            .unwrap();
        assert!(second.was_cache_hit());
        assert_eq!(second.into_value().version, 2);
    }

    #[tokio::test]
    async fn test_production_is_default_label() {
        let (store, cache) = seeded().await;
        let reader = PromptReader::new(store, cache);
        let read = reader
            .get("proj", "greeting", &PromptSelector::Production, Freshness::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(read.value().version, 1);
    }

    #[tokio::test]
    async fn test_not_found_returns_none() {
        let (store, cache) = seeded().await;
        let reader = PromptReader::new(store, cache.clone());
        let read = reader
            .get("proj", "greeting", &PromptSelector::Version(9), Freshness::Consistent)
            .await
            .unwrap();
        assert!(read.is_none());
        assert_eq!(cache.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_locked_family_is_read_through_without_population() {
        let (store, cache) = seeded().await;
        let family = FamilyKey::new("proj", "greeting");
        let _lease = cache
            .try_acquire_lock(&family.lock_key(), Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        let reader = PromptReader::new(store, cache.clone());
        let read = reader
            .get("proj", "greeting", &PromptSelector::Version(1), Freshness::Consistent)
            .await
            .unwrap()
            .unwrap();
        assert!(read.was_cache_miss());
        assert!(!read.populated_cache());
        assert_eq!(cache.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_consistent_read_skips_entry_from_older_watermark() {
        let (store, cache) = seeded().await;
        let family = FamilyKey::new("proj", "greeting");
        let reader = PromptReader::new(store, cache.clone());

        reader
            .get("proj", "greeting", &PromptSelector::Version(1), Freshness::Consistent)
            .await
            .unwrap();
        cache.invalidate_keys_matching(&family.cache_prefix()).await.unwrap();

        let read = reader
            .get("proj", "greeting", &PromptSelector::Version(1), Freshness::Consistent)
            .await
            .unwrap()
            .unwrap();
        assert!(read.was_cache_miss());
    }

    #[tokio::test]
    async fn test_best_effort_serves_recent_entry() {
        let (store, cache) = seeded().await;
        let reader = PromptReader::new(store, cache);
        let freshness = Freshness::best_effort(Duration::from_secs(60));

        reader
            .get("proj", "greeting", &PromptSelector::Version(2), freshness.clone())
            .await
            .unwrap();
        let read = reader
            .get("proj", "greeting", &PromptSelector::Version(2), freshness)
            .await
            .unwrap()
            .unwrap();
        assert!(read.was_cache_hit());
    }
}

//! quill Test Utilities
//!
//! Centralized test infrastructure for the quill workspace:
//! - Instrumented collaborators (call-recording cache, fault-injecting store)
//! - Proptest generators for prompt families and label sets
//! - Test fixtures for common scenarios
//! - Custom assertions for quill-specific validation

// Re-export the in-memory collaborators from their source crate
pub use quill_storage::{InMemoryFamilyCache, InMemoryPromptStore};

// Re-export core types for convenience
pub use quill_core::{
    Actor, CacheError, ChildSelector, DependencySpec, FamilyKey, LabelSet, Prompt,
    PromptDependency, QuillConfig, QuillError, QuillResult, StorageError, ValidationError,
    LATEST_LABEL, PRODUCTION_LABEL,
};

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// INSTRUMENTED COLLABORATORS
// ============================================================================

pub mod wrappers {
    //! Wrappers around the in-memory collaborators that record calls and
    //! inject faults.

    use super::*;
    use async_trait::async_trait;
    use quill_core::{Acquired, CacheKey, FamilyLease, LeaseData, PromptId};
    use quill_storage::{
        CacheStats, CachedPrompt, DependencyRow, FamilyCache, InMemoryReader,
        InMemoryTransaction, PromptReads, PromptStore, PromptTransaction, Watermark,
    };
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    /// One call observed by [`RecordingFamilyCache`].
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum CacheEvent {
        Acquired { key: String },
        Busy { key: String },
        Released { key: String },
        ReleaseFailed { key: String },
        Invalidated { prefix: String },
        InvalidationFailed { prefix: String },
    }

    /// [`InMemoryFamilyCache`] that records lock and invalidation calls.
    #[derive(Debug, Default)]
    pub struct RecordingFamilyCache {
        inner: InMemoryFamilyCache,
        events: Mutex<Vec<CacheEvent>>,
        fail_invalidation: AtomicBool,
        fail_release: AtomicBool,
    }

    impl RecordingFamilyCache {
        pub fn new() -> Self {
            Self::wrapping(InMemoryFamilyCache::new())
        }

        pub fn wrapping(inner: InMemoryFamilyCache) -> Self {
            Self {
                inner,
                events: Mutex::new(Vec::new()),
                fail_invalidation: AtomicBool::new(false),
                fail_release: AtomicBool::new(false),
            }
        }

        pub fn inner(&self) -> &InMemoryFamilyCache {
            &self.inner
        }

        /// Make every invalidation fail until switched off.
        pub fn fail_invalidations(&self, fail: bool) {
            self.fail_invalidation.store(fail, Ordering::SeqCst);
        }

        /// Make every release fail, leaving the lease to expire.
        pub fn fail_releases(&self, fail: bool) {
            self.fail_release.store(fail, Ordering::SeqCst);
        }

        pub fn events(&self) -> Vec<CacheEvent> {
            self.events.lock().map(|e| e.clone()).unwrap_or_default()
        }

        pub fn acquired_count(&self) -> usize {
            self.count(|e| matches!(e, CacheEvent::Acquired { .. }))
        }

        /// Release calls, failed ones included.
        pub fn release_count(&self) -> usize {
            self.count(|e| {
                matches!(e, CacheEvent::Released { .. } | CacheEvent::ReleaseFailed { .. })
            })
        }

        pub fn invalidation_count(&self) -> usize {
            self.count(|e| matches!(e, CacheEvent::Invalidated { .. }))
        }

        pub fn count(&self, predicate: impl Fn(&CacheEvent) -> bool) -> usize {
            self.events().iter().filter(|e| predicate(e)).count()
        }

        /// Whether no two lock holders ever overlapped on the same key.
        pub fn locks_were_exclusive(&self) -> bool {
            let mut held = std::collections::HashSet::new();
            for event in self.events() {
                match event {
                    CacheEvent::Acquired { key } => {
                        if !held.insert(key) {
                            return false;
                        }
                    }
                    CacheEvent::Released { key } | CacheEvent::ReleaseFailed { key } => {
                        held.remove(&key);
                    }
                    _ => {}
                }
            }
            true
        }

        fn push(&self, event: CacheEvent) {
            if let Ok(mut events) = self.events.lock() {
                events.push(event);
            }
        }
    }

    #[async_trait]
    impl FamilyCache for RecordingFamilyCache {
        async fn try_acquire_lock(
            &self,
            key: &str,
            lease: Duration,
        ) -> Result<Option<FamilyLease<Acquired>>, CacheError> {
            let acquired = self.inner.try_acquire_lock(key, lease).await?;
            let key = key.to_string();
            self.push(match acquired {
                Some(_) => CacheEvent::Acquired { key },
                None => CacheEvent::Busy { key },
            });
            Ok(acquired)
        }

        async fn release_lock(&self, lease: LeaseData) -> Result<(), CacheError> {
            let key = lease.key.clone();
            // Recorded before the inner call so a waiter acquiring right
            // after the release is ordered after it.
            if self.fail_release.load(Ordering::SeqCst) {
                self.push(CacheEvent::ReleaseFailed { key: key.clone() });
                return Err(CacheError::Unavailable {
                    reason: format!("injected release failure on {}", key),
                });
            }
            self.push(CacheEvent::Released { key });
            self.inner.release_lock(lease).await
        }

        async fn is_locked(&self, key: &str) -> Result<bool, CacheError> {
            self.inner.is_locked(key).await
        }

        async fn invalidate_keys_matching(&self, prefix: &str) -> Result<u64, CacheError> {
            if self.fail_invalidation.load(Ordering::SeqCst) {
                self.push(CacheEvent::InvalidationFailed {
                    prefix: prefix.to_string(),
                });
                return Err(CacheError::Unavailable {
                    reason: "injected invalidation failure".to_string(),
                });
            }
            let removed = self.inner.invalidate_keys_matching(prefix).await?;
            self.push(CacheEvent::Invalidated {
                prefix: prefix.to_string(),
            });
            Ok(removed)
        }

        async fn watermark(&self, prefix: &str) -> Result<Watermark, CacheError> {
            self.inner.watermark(prefix).await
        }

        async fn get(&self, key: &CacheKey) -> Result<Option<CachedPrompt>, CacheError> {
            self.inner.get(key).await
        }

        async fn put_if_unchanged(
            &self,
            key: &CacheKey,
            prompt: &Prompt,
            observed: Watermark,
        ) -> Result<bool, CacheError> {
            self.inner.put_if_unchanged(key, prompt, observed).await
        }

        fn blocks_population_while_locked(&self) -> bool {
            self.inner.blocks_population_while_locked()
        }

        async fn stats(&self) -> Result<CacheStats, CacheError> {
            self.inner.stats().await
        }
    }

    #[derive(Debug, Default)]
    struct Faults {
        fail_commit: AtomicBool,
        begins: AtomicU64,
        writes: AtomicU64,
        commits: AtomicU64,
    }

    /// [`InMemoryPromptStore`] that counts writes and fails commits on demand.
    #[derive(Debug, Clone, Default)]
    pub struct FaultyStore {
        inner: InMemoryPromptStore,
        faults: Arc<Faults>,
    }

    impl FaultyStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn wrapping(inner: InMemoryPromptStore) -> Self {
            Self {
                inner,
                faults: Arc::default(),
            }
        }

        pub fn inner(&self) -> &InMemoryPromptStore {
            &self.inner
        }

        /// Make every commit fail with a retryable transaction error.
        pub fn fail_commits(&self, fail: bool) {
            self.faults.fail_commit.store(fail, Ordering::SeqCst);
        }

        pub fn begin_count(&self) -> u64 {
            self.faults.begins.load(Ordering::SeqCst)
        }

        /// Write statements issued inside any transaction, committed or not.
        pub fn write_count(&self) -> u64 {
            self.faults.writes.load(Ordering::SeqCst)
        }

        pub fn commit_count(&self) -> u64 {
            self.faults.commits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PromptStore for FaultyStore {
        type Tx = FaultyTransaction;
        type Reader = InMemoryReader;

        async fn begin(&self) -> QuillResult<FaultyTransaction> {
            self.faults.begins.fetch_add(1, Ordering::SeqCst);
            Ok(FaultyTransaction {
                inner: self.inner.begin().await?,
                faults: Arc::clone(&self.faults),
            })
        }

        async fn reader(&self) -> QuillResult<InMemoryReader> {
            self.inner.reader().await
        }
    }

    /// Transaction of a [`FaultyStore`].
    #[derive(Debug)]
    pub struct FaultyTransaction {
        inner: InMemoryTransaction,
        faults: Arc<Faults>,
    }

    impl FaultyTransaction {
        fn wrote(&self) {
            self.faults.writes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl PromptReads for FaultyTransaction {
        async fn find_version(
            &mut self,
            project_id: &str,
            name: &str,
            version: i32,
        ) -> QuillResult<Option<Prompt>> {
            self.inner.find_version(project_id, name, version).await
        }

        async fn find_by_label(
            &mut self,
            project_id: &str,
            name: &str,
            label: &str,
        ) -> QuillResult<Option<Prompt>> {
            self.inner.find_by_label(project_id, name, label).await
        }

        async fn list_family(&mut self, project_id: &str, name: &str) -> QuillResult<Vec<Prompt>> {
            self.inner.list_family(project_id, name).await
        }

        async fn find_dependents(
            &mut self,
            project_id: &str,
            child_name: &str,
            query: &quill_core::DependencyQuery,
        ) -> QuillResult<Vec<DependencyRow>> {
            self.inner.find_dependents(project_id, child_name, query).await
        }
    }

    #[async_trait]
    impl PromptTransaction for FaultyTransaction {
        async fn insert_prompt(&mut self, prompt: &Prompt) -> QuillResult<()> {
            self.wrote();
            self.inner.insert_prompt(prompt).await
        }

        async fn insert_dependency(&mut self, dependency: &PromptDependency) -> QuillResult<()> {
            self.wrote();
            self.inner.insert_dependency(dependency).await
        }

        async fn delete_prompts(&mut self, project_id: &str, ids: &[PromptId]) -> QuillResult<u64> {
            self.wrote();
            self.inner.delete_prompts(project_id, ids).await
        }

        async fn set_labels(
            &mut self,
            project_id: &str,
            id: PromptId,
            labels: &LabelSet,
        ) -> QuillResult<Prompt> {
            self.wrote();
            self.inner.set_labels(project_id, id, labels).await
        }

        async fn commit(self) -> QuillResult<()> {
            if self.faults.fail_commit.load(Ordering::SeqCst) {
                self.inner.rollback().await?;
                return Err(StorageError::TransactionFailed {
                    reason: "injected commit failure".to_string(),
                    retryable: true,
                }
                .into());
            }
            self.inner.commit().await?;
            self.faults.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rollback(self) -> QuillResult<()> {
            self.inner.rollback().await
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for prompt families and label sets.

    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    /// Generate a valid, non-reserved label.
    pub fn arb_label() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(PRODUCTION_LABEL.to_string()),
            Just("staging".to_string()),
            "[a-z][a-z0-9_-]{0,11}",
        ]
        .prop_filter("latest is reserved", |l| l != LATEST_LABEL)
    }

    /// Generate a set of up to `max` non-reserved labels.
    pub fn arb_label_set(max: usize) -> impl Strategy<Value = LabelSet> {
        prop::collection::vec(arb_label(), 0..=max).prop_map(LabelSet::from_iter)
    }

    /// Generate a well-formed family of `name` in `project_id`: versions
    /// `1..=n`, `latest` on the highest, every other label on at most one
    /// version.
    pub fn arb_family(project_id: &'static str, name: &'static str) -> impl Strategy<Value = Vec<Prompt>> {
        prop::collection::vec(arb_label_set(3), 1..6).prop_map(move |label_sets| {
            let n = label_sets.len() as i32;
            let mut taken: HashSet<String> = HashSet::new();
            label_sets
                .into_iter()
                .enumerate()
                .map(|(i, labels)| {
                    let version = i as i32 + 1;
                    let mut own: LabelSet = labels
                        .iter()
                        .filter(|l| taken.insert(l.to_string()))
                        .collect();
                    if version == n {
                        own.insert(LATEST_LABEL);
                    }
                    Prompt::new(project_id, name, version, serde_json::json!(format!("v{}", version)))
                        .with_labels(own)
                })
                .collect()
        })
    }

    /// One mutation applied to a family under test.
    #[derive(Debug, Clone)]
    pub enum FamilyOp {
        /// Delete the version at this position of the current family.
        Delete(usize),
        /// Replace labels of the version at this position.
        Relabel(usize, LabelSet),
        /// Strip `latest` from whichever version holds it.
        StripLatest,
        /// Append a version with these labels.
        Create(LabelSet),
    }

    pub fn arb_family_op() -> impl Strategy<Value = FamilyOp> {
        prop_oneof![
            (0usize..8).prop_map(FamilyOp::Delete),
            ((0usize..8), arb_label_set(2)).prop_map(|(i, l)| FamilyOp::Relabel(i, l)),
            Just(FamilyOp::StripLatest),
            arb_label_set(2).prop_map(FamilyOp::Create),
        ]
    }

    pub fn arb_family_ops(max: usize) -> impl Strategy<Value = Vec<FamilyOp>> {
        prop::collection::vec(arb_family_op(), 1..=max)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;
    use quill_storage::{PromptStore, PromptTransaction};
    use std::time::Duration;

    pub const PROJECT: &str = "proj";
    pub const ORG: &str = "org";

    /// Config with short lock waits so timeouts surface quickly.
    pub fn fast_config() -> QuillConfig {
        QuillConfig::default()
            .with_lock_lease(Duration::from_secs(5))
            .with_lock_wait(Duration::from_millis(200))
            .with_poll_interval(Duration::from_millis(5))
    }

    pub fn member() -> Actor {
        Actor::user(ORG, "member")
    }

    pub fn admin() -> Actor {
        Actor::user(ORG, "admin")
    }

    /// A row of `name` in [`PROJECT`].
    pub fn prompt(name: &str, version: i32, labels: &[&str]) -> Prompt {
        Prompt::new(
            PROJECT,
            name,
            version,
            serde_json::json!(format!("{} v{}", name, version)),
        )
        .with_labels(labels.iter().copied().collect())
    }

    /// Insert rows in one committed transaction.
    pub async fn seed_prompts<S: PromptStore>(store: &S, prompts: &[Prompt]) -> QuillResult<()> {
        let mut tx = store.begin().await?;
        for p in prompts {
            tx.insert_prompt(p).await?;
        }
        tx.commit().await
    }

    /// Insert an edge `parent -> child_name@selector`.
    pub async fn seed_dependency<S: PromptStore>(
        store: &S,
        parent: &Prompt,
        child_name: &str,
        selector: ChildSelector,
    ) -> QuillResult<PromptDependency> {
        let edge = PromptDependency::new(&parent.project_id, parent.id, child_name, selector);
        let mut tx = store.begin().await?;
        tx.insert_dependency(&edge).await?;
        tx.commit().await?;
        Ok(edge)
    }

    /// "greeting" v1 (no labels), v2 (latest).
    pub fn greeting_family() -> Vec<Prompt> {
        vec![prompt("greeting", 1, &[]), prompt("greeting", 2, &[LATEST_LABEL])]
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for quill-specific validation.

    use super::*;
    use quill_storage::{PromptReads, PromptStore};

    /// Assert that a QuillResult is a DependencyConflict.
    #[track_caller]
    pub fn assert_dependency_conflict<T: std::fmt::Debug>(result: &QuillResult<T>) {
        match result {
            Err(QuillError::DependencyConflict { .. }) => {}
            other => panic!("Expected DependencyConflict, got: {:?}", other),
        }
    }

    /// Assert that a QuillResult is a NotFound error.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &QuillResult<T>) {
        match result {
            Err(QuillError::NotFound { .. }) => {}
            other => panic!("Expected NotFound, got: {:?}", other),
        }
    }

    /// Assert that a QuillResult is an AuthorizationDenied error.
    #[track_caller]
    pub fn assert_authorization_denied<T: std::fmt::Debug>(result: &QuillResult<T>) {
        match result {
            Err(QuillError::AuthorizationDenied { .. }) => {}
            other => panic!("Expected AuthorizationDenied, got: {:?}", other),
        }
    }

    /// Assert that a QuillResult is a LockTimeout error.
    #[track_caller]
    pub fn assert_lock_timeout<T: std::fmt::Debug>(result: &QuillResult<T>) {
        match result {
            Err(QuillError::LockTimeout { .. }) => {}
            other => panic!("Expected LockTimeout, got: {:?}", other),
        }
    }

    /// Number of rows of the family holding `latest`.
    pub async fn latest_holders<S: PromptStore>(store: &S, project_id: &str, name: &str) -> usize {
        let mut reader = match store.reader().await {
            Ok(reader) => reader,
            Err(e) => panic!("reader failed: {:?}", e),
        };
        match reader.list_family(project_id, name).await {
            Ok(rows) => rows.iter().filter(|p| p.is_latest()).count(),
            Err(e) => panic!("list_family failed: {:?}", e),
        }
    }

    /// Assert exactly one `latest` holder in a non-empty family, none in an
    /// empty one.
    pub async fn assert_latest_invariant<S: PromptStore>(store: &S, project_id: &str, name: &str) {
        let mut reader = match store.reader().await {
            Ok(reader) => reader,
            Err(e) => panic!("reader failed: {:?}", e),
        };
        let rows = match reader.list_family(project_id, name).await {
            Ok(rows) => rows,
            Err(e) => panic!("list_family failed: {:?}", e),
        };
        let holders: Vec<i32> = rows.iter().filter(|p| p.is_latest()).map(|p| p.version).collect();
        if rows.is_empty() {
            assert!(holders.is_empty(), "empty family has latest holders: {:?}", holders);
        } else {
            assert_eq!(holders.len(), 1, "family {} has latest on {:?}", name, holders);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn test_arb_family_is_well_formed() {
        let mut runner = TestRunner::default();
        for _ in 0..50 {
            let family = generators::arb_family("proj", "greeting")
                .new_tree(&mut runner)
                .unwrap()
                .current();
            let latest: Vec<i32> = family.iter().filter(|p| p.is_latest()).map(|p| p.version).collect();
            assert_eq!(latest, vec![family.len() as i32]);

            let mut seen = std::collections::HashSet::new();
            for label in family.iter().flat_map(|p| p.labels.iter()) {
                assert!(seen.insert(label.to_string()), "label {} on two versions", label);
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_generated_labels_validate(labels in generators::arb_label_set(4)) {
            prop_assert!(labels.validate().is_ok());
            prop_assert!(!labels.has_latest());
        }
    }

    #[tokio::test]
    async fn test_faulty_store_counts_and_fails_commits() {
        use quill_storage::{PromptStore, PromptTransaction};

        let store = wrappers::FaultyStore::new();
        fixtures::seed_prompts(&store, &fixtures::greeting_family()).await.unwrap();
        assert_eq!(store.write_count(), 2);
        assert_eq!(store.commit_count(), 1);

        store.fail_commits(true);
        let mut tx = store.begin().await.unwrap();
        tx.insert_prompt(&fixtures::prompt("greeting", 3, &[])).await.unwrap();
        let err = tx.commit().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.inner().prompt_count().await, 2);
    }

    #[tokio::test]
    async fn test_recording_cache_tracks_lock_calls() {
        use quill_storage::FamilyCache;
        use std::time::Duration;

        let cache = wrappers::RecordingFamilyCache::new();
        let key = FamilyKey::new("proj", "greeting").lock_key();
        let lease = cache
            .try_acquire_lock(&key, Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert!(cache.try_acquire_lock(&key, Duration::from_secs(5)).await.unwrap().is_none());
        cache.release_lock(lease.release()).await.unwrap();

        assert_eq!(cache.acquired_count(), 1);
        assert_eq!(cache.release_count(), 1);
        assert!(cache.locks_were_exclusive());
    }
}

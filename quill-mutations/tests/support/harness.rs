//! Shared wiring for the integration tests: an orchestrator over the
//! instrumented store and cache.

#![allow(dead_code)]

use std::sync::Arc;

use quill_core::{Actor, LabelSet, Prompt, QuillResult};
use quill_mutations::{
    InMemoryAuditLog, LabelAuthorizer, MutationContext, MutationOrchestrator,
};
use quill_storage::{PromptReader, PromptReads, PromptStore};
use quill_test_utils::fixtures::{self, PROJECT};
use quill_test_utils::wrappers::{FaultyStore, RecordingFamilyCache};

pub type Orchestrator = MutationOrchestrator<FaultyStore, RecordingFamilyCache>;

pub struct Harness {
    pub store: Arc<FaultyStore>,
    pub cache: Arc<RecordingFamilyCache>,
    pub audit: Arc<InMemoryAuditLog>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn with_authorizer(authorizer: Arc<dyn LabelAuthorizer>) -> Self {
        Self::build(Some(authorizer))
    }

    fn build(authorizer: Option<Arc<dyn LabelAuthorizer>>) -> Self {
        quill_test_utils::init_tracing();
        let store = Arc::new(FaultyStore::new());
        let cache = Arc::new(RecordingFamilyCache::new());
        let audit = Arc::new(InMemoryAuditLog::new());
        let mut orchestrator = MutationOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&cache),
            fixtures::fast_config(),
        )
        .expect("valid config")
        .with_audit_sink(audit.clone());
        if let Some(authorizer) = authorizer {
            orchestrator = orchestrator.with_authorizer(authorizer);
        }
        Self {
            store,
            cache,
            audit,
            orchestrator: Arc::new(orchestrator),
        }
    }

    pub fn ctx(&self) -> MutationContext {
        MutationContext::new(PROJECT, fixtures::member())
    }

    pub fn ctx_as(&self, actor: Actor) -> MutationContext {
        MutationContext::new(PROJECT, actor)
    }

    pub fn reader(&self) -> PromptReader<FaultyStore, RecordingFamilyCache> {
        PromptReader::new(Arc::clone(&self.store), Arc::clone(&self.cache))
    }

    pub async fn seed(&self, prompts: &[Prompt]) {
        fixtures::seed_prompts(self.store.as_ref(), prompts)
            .await
            .expect("seed prompts");
    }

    pub async fn row(&self, name: &str, version: i32) -> QuillResult<Option<Prompt>> {
        let mut reader = self.store.reader().await?;
        reader.find_version(PROJECT, name, version).await
    }

    pub async fn labels(&self, name: &str, version: i32) -> Option<LabelSet> {
        self.row(name, version)
            .await
            .expect("store read")
            .map(|p| p.labels)
    }

    pub async fn family(&self, name: &str) -> Vec<Prompt> {
        let mut reader = self.store.reader().await.expect("reader");
        reader.list_family(PROJECT, name).await.expect("list family")
    }
}

//! In-memory transactional store.
//!
//! Transactions take the store mutex for their whole lifetime and stage
//! writes on a private copy, so they are serializable: a committed
//! transaction swaps its copy in, a dropped one leaves the store untouched.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use quill_core::{
    DependencyId, DependencyQuery, LabelSet, Prompt, PromptDependency, PromptId, QuillResult,
    StorageError,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::store::{DependencyRow, PromptReads, PromptStore, PromptTransaction};

/// Rows held by the in-memory store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreState {
    prompts: HashMap<PromptId, Prompt>,
    dependencies: HashMap<DependencyId, PromptDependency>,
}

impl StoreState {
    pub fn prompts(&self) -> impl Iterator<Item = &Prompt> {
        self.prompts.values()
    }

    pub fn dependencies(&self) -> impl Iterator<Item = &PromptDependency> {
        self.dependencies.values()
    }

    fn find_version(&self, project_id: &str, name: &str, version: i32) -> Option<Prompt> {
        self.prompts
            .values()
            .find(|p| p.project_id == project_id && p.name == name && p.version == version)
            .cloned()
    }

    fn find_by_label(&self, project_id: &str, name: &str, label: &str) -> Option<Prompt> {
        self.prompts
            .values()
            .filter(|p| p.project_id == project_id && p.name == name && p.labels.contains(label))
            .max_by_key(|p| p.version)
            .cloned()
    }

    fn list_family(&self, project_id: &str, name: &str) -> Vec<Prompt> {
        let mut rows: Vec<Prompt> = self
            .prompts
            .values()
            .filter(|p| p.project_id == project_id && p.name == name)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.version.cmp(&a.version));
        rows
    }

    fn find_dependents(
        &self,
        project_id: &str,
        child_name: &str,
        query: &DependencyQuery,
    ) -> Vec<DependencyRow> {
        let mut rows: Vec<DependencyRow> = self
            .dependencies
            .values()
            .filter(|d| d.project_id == project_id && d.child_name == child_name)
            .filter(|d| query.matches(&d.child))
            .filter_map(|d| {
                let parent = self.prompts.get(&d.parent_id)?;
                (parent.project_id == project_id).then(|| DependencyRow {
                    edge: d.clone(),
                    parent_name: parent.name.clone(),
                    parent_version: parent.version,
                })
            })
            .collect();
        rows.sort_by(|a, b| {
            (&a.parent_name, a.parent_version, &a.edge.child)
                .cmp(&(&b.parent_name, b.parent_version, &b.edge.child))
        });
        rows
    }

    fn insert_prompt(&mut self, prompt: &Prompt) -> QuillResult<()> {
        if self.prompts.contains_key(&prompt.id) {
            return Err(StorageError::ConstraintViolation {
                constraint: "prompts_pkey".to_string(),
                reason: format!("prompt {} already exists", prompt.id),
            }
            .into());
        }
        if self
            .find_version(&prompt.project_id, &prompt.name, prompt.version)
            .is_some()
        {
            return Err(StorageError::ConstraintViolation {
                constraint: "prompts_project_id_name_version_key".to_string(),
                reason: format!("{} v{} already exists", prompt.name, prompt.version),
            }
            .into());
        }
        self.prompts.insert(prompt.id, prompt.clone());
        Ok(())
    }

    fn insert_dependency(&mut self, dependency: &PromptDependency) -> QuillResult<()> {
        match self.prompts.get(&dependency.parent_id) {
            Some(parent) if parent.project_id == dependency.project_id => {}
            _ => {
                return Err(StorageError::ConstraintViolation {
                    constraint: "prompt_dependencies_parent_id_fkey".to_string(),
                    reason: format!("parent {} does not exist", dependency.parent_id),
                }
                .into())
            }
        }
        self.dependencies.insert(dependency.id, dependency.clone());
        Ok(())
    }

    fn delete_prompts(&mut self, project_id: &str, ids: &[PromptId]) -> u64 {
        let mut deleted = 0;
        for id in ids {
            let owned = self
                .prompts
                .get(id)
                .map(|p| p.project_id == project_id)
                .unwrap_or(false);
            if owned {
                self.prompts.remove(id);
                deleted += 1;
            }
        }
        self.dependencies
            .retain(|_, d| self.prompts.contains_key(&d.parent_id));
        deleted
    }

    fn set_labels(&mut self, project_id: &str, id: PromptId, labels: &LabelSet) -> QuillResult<Prompt> {
        let prompt = self
            .prompts
            .get_mut(&id)
            .filter(|p| p.project_id == project_id)
            .ok_or_else(|| StorageError::ConstraintViolation {
                constraint: "prompts_pkey".to_string(),
                reason: format!("prompt {} does not exist", id),
            })?;
        prompt.labels = labels.clone();
        prompt.updated_at = chrono::Utc::now();
        Ok(prompt.clone())
    }
}

/// In-memory store for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPromptStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryPromptStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored prompt rows across all projects.
    pub async fn prompt_count(&self) -> usize {
        self.state.lock().await.prompts.len()
    }

    /// Number of stored dependency edges across all projects.
    pub async fn dependency_count(&self) -> usize {
        self.state.lock().await.dependencies.len()
    }

    /// Copy of the current committed state.
    pub async fn snapshot(&self) -> StoreState {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl PromptStore for InMemoryPromptStore {
    type Tx = InMemoryTransaction;
    type Reader = InMemoryReader;

    async fn begin(&self) -> QuillResult<InMemoryTransaction> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let staged = guard.clone();
        Ok(InMemoryTransaction { guard, staged })
    }

    async fn reader(&self) -> QuillResult<InMemoryReader> {
        Ok(InMemoryReader {
            state: Arc::clone(&self.state),
        })
    }
}

/// Autocommit reads against the committed state.
#[derive(Debug, Clone)]
pub struct InMemoryReader {
    state: Arc<Mutex<StoreState>>,
}

#[async_trait]
impl PromptReads for InMemoryReader {
    async fn find_version(
        &mut self,
        project_id: &str,
        name: &str,
        version: i32,
    ) -> QuillResult<Option<Prompt>> {
        Ok(self.state.lock().await.find_version(project_id, name, version))
    }

    async fn find_by_label(
        &mut self,
        project_id: &str,
        name: &str,
        label: &str,
    ) -> QuillResult<Option<Prompt>> {
        Ok(self.state.lock().await.find_by_label(project_id, name, label))
    }

    async fn list_family(&mut self, project_id: &str, name: &str) -> QuillResult<Vec<Prompt>> {
        Ok(self.state.lock().await.list_family(project_id, name))
    }

    async fn find_dependents(
        &mut self,
        project_id: &str,
        child_name: &str,
        query: &DependencyQuery,
    ) -> QuillResult<Vec<DependencyRow>> {
        Ok(self
            .state
            .lock()
            .await
            .find_dependents(project_id, child_name, query))
    }
}

/// Serializable transaction over [`InMemoryPromptStore`].
#[derive(Debug)]
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<StoreState>,
    staged: StoreState,
}

#[async_trait]
impl PromptReads for InMemoryTransaction {
    async fn find_version(
        &mut self,
        project_id: &str,
        name: &str,
        version: i32,
    ) -> QuillResult<Option<Prompt>> {
        Ok(self.staged.find_version(project_id, name, version))
    }

    async fn find_by_label(
        &mut self,
        project_id: &str,
        name: &str,
        label: &str,
    ) -> QuillResult<Option<Prompt>> {
        Ok(self.staged.find_by_label(project_id, name, label))
    }

    async fn list_family(&mut self, project_id: &str, name: &str) -> QuillResult<Vec<Prompt>> {
        Ok(self.staged.list_family(project_id, name))
    }

    async fn find_dependents(
        &mut self,
        project_id: &str,
        child_name: &str,
        query: &DependencyQuery,
    ) -> QuillResult<Vec<DependencyRow>> {
        Ok(self.staged.find_dependents(project_id, child_name, query))
    }
}

#[async_trait]
impl PromptTransaction for InMemoryTransaction {
    async fn insert_prompt(&mut self, prompt: &Prompt) -> QuillResult<()> {
        self.staged.insert_prompt(prompt)
    }

    async fn insert_dependency(&mut self, dependency: &PromptDependency) -> QuillResult<()> {
        self.staged.insert_dependency(dependency)
    }

    async fn delete_prompts(&mut self, project_id: &str, ids: &[PromptId]) -> QuillResult<u64> {
        Ok(self.staged.delete_prompts(project_id, ids))
    }

    async fn set_labels(
        &mut self,
        project_id: &str,
        id: PromptId,
        labels: &LabelSet,
    ) -> QuillResult<Prompt> {
        self.staged.set_labels(project_id, id, labels)
    }

    async fn commit(mut self) -> QuillResult<()> {
        *self.guard = std::mem::take(&mut self.staged);
        Ok(())
    }

    async fn rollback(self) -> QuillResult<()> {
        Ok(())
    }
}

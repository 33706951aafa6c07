//! Transactional store traits.
//!
//! The store owns prompt rows and dependency edges. All writes of one
//! mutation go through a single [`PromptTransaction`]; dropping a transaction
//! without calling [`PromptTransaction::commit`] rolls it back.

use async_trait::async_trait;
use quill_core::{
    ChildSelector, DependencyQuery, DependentRef, LabelSet, Prompt, PromptDependency, PromptId,
    QuillResult,
};

/// A dependency edge joined with its parent row, as returned by a dependents
/// query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyRow {
    pub edge: PromptDependency,
    pub parent_name: String,
    pub parent_version: i32,
}

impl DependencyRow {
    pub fn parent_id(&self) -> PromptId {
        self.edge.parent_id
    }

    pub fn selector(&self) -> &ChildSelector {
        &self.edge.child
    }

    /// Report form used in conflict messages.
    pub fn to_dependent_ref(&self) -> DependentRef {
        DependentRef {
            parent_name: self.parent_name.clone(),
            parent_version: self.parent_version,
            child_name: self.edge.child_name.clone(),
            matched: self.edge.child.clone(),
        }
    }
}

/// Read operations available both on the store and inside a transaction.
///
/// Inside a transaction, reads observe the transaction's own staged writes.
#[async_trait]
pub trait PromptReads: Send {
    /// Row by (project_id, name, version), or `None` when absent.
    async fn find_version(
        &mut self,
        project_id: &str,
        name: &str,
        version: i32,
    ) -> QuillResult<Option<Prompt>>;

    /// Row currently holding `label` in the family, or `None`.
    async fn find_by_label(
        &mut self,
        project_id: &str,
        name: &str,
        label: &str,
    ) -> QuillResult<Option<Prompt>>;

    /// Every row of the family, highest version first.
    async fn list_family(&mut self, project_id: &str, name: &str) -> QuillResult<Vec<Prompt>>;

    /// Edges on `child_name` in `project_id` matching `query`, joined with
    /// their parent rows. Parents are restricted to the same project.
    async fn find_dependents(
        &mut self,
        project_id: &str,
        child_name: &str,
        query: &DependencyQuery,
    ) -> QuillResult<Vec<DependencyRow>>;
}

/// One atomic unit of work against the store.
#[async_trait]
pub trait PromptTransaction: PromptReads {
    /// Insert a new row. Fails with a constraint violation when the
    /// (project_id, name, version) triple is taken.
    async fn insert_prompt(&mut self, prompt: &Prompt) -> QuillResult<()>;

    /// Insert a dependency edge whose parent row exists.
    async fn insert_dependency(&mut self, dependency: &PromptDependency) -> QuillResult<()>;

    /// Delete rows by id within a project. Outgoing edges of deleted rows are
    /// removed with them. Returns the number of rows deleted.
    async fn delete_prompts(&mut self, project_id: &str, ids: &[PromptId]) -> QuillResult<u64>;

    /// Replace a row's label set, returning the updated row.
    async fn set_labels(
        &mut self,
        project_id: &str,
        id: PromptId,
        labels: &LabelSet,
    ) -> QuillResult<Prompt>;

    /// Make every staged write visible atomically.
    async fn commit(self) -> QuillResult<()>;

    /// Discard every staged write.
    async fn rollback(self) -> QuillResult<()>;
}

/// The transactional store collaborator.
#[async_trait]
pub trait PromptStore: Send + Sync {
    type Tx: PromptTransaction + 'static;
    type Reader: PromptReads + 'static;

    /// Open a transaction. Its reads and writes are isolated from concurrent
    /// transactions until commit.
    async fn begin(&self) -> QuillResult<Self::Tx>;

    /// Autocommit read handle, used for checks that do not need a
    /// transaction and for the read path.
    async fn reader(&self) -> QuillResult<Self::Reader>;
}

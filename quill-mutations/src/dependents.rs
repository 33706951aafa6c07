//! Dependents lookup.
//!
//! Answers "which other prompts depend on these versions or labels of
//! `child_name`?". Only one hop is ever inspected.

use std::collections::HashSet;

use quill_core::{DependencyQuery, DependentRef, LabelSet, PromptId, QuillError, QuillResult};
use quill_storage::{DependencyRow, PromptReads};

/// Parents whose edges must not count as dependents.
///
/// When rows are deleted, their own outgoing edges go with them, so they
/// never block their own deletion.
#[derive(Debug, Clone, Default)]
pub struct ExcludedParents(HashSet<PromptId>);

impl ExcludedParents {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &PromptId) -> bool {
        self.0.contains(id)
    }
}

impl FromIterator<PromptId> for ExcludedParents {
    fn from_iter<I: IntoIterator<Item = PromptId>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Dependents of `child_name` matching the candidate versions or labels.
///
/// Returns an empty list when both candidate sets are empty, without
/// touching the store.
pub async fn find_dependents<R>(
    reads: &mut R,
    project_id: &str,
    child_name: &str,
    candidate_versions: impl IntoIterator<Item = i32>,
    candidate_labels: &LabelSet,
    excluded: &ExcludedParents,
) -> QuillResult<Vec<DependentRef>>
where
    R: PromptReads + ?Sized,
{
    let query = DependencyQuery::selectors(candidate_versions, candidate_labels.clone());
    find_dependents_matching(reads, project_id, child_name, &query, excluded).await
}

/// Dependents of `child_name` under an arbitrary query.
pub async fn find_dependents_matching<R>(
    reads: &mut R,
    project_id: &str,
    child_name: &str,
    query: &DependencyQuery,
    excluded: &ExcludedParents,
) -> QuillResult<Vec<DependentRef>>
where
    R: PromptReads + ?Sized,
{
    if query.is_empty() {
        return Ok(Vec::new());
    }
    let rows = reads.find_dependents(project_id, child_name, query).await?;
    Ok(to_refs(rows, excluded))
}

fn to_refs(rows: Vec<DependencyRow>, excluded: &ExcludedParents) -> Vec<DependentRef> {
    let mut refs: Vec<DependentRef> = rows
        .iter()
        .filter(|row| !excluded.contains(&row.parent_id()))
        .map(DependencyRow::to_dependent_ref)
        .collect();
    refs.sort();
    refs.dedup();
    refs
}

/// Fail with `DependencyConflict` when `dependents` is non-empty.
pub fn ensure_no_dependents(
    child_name: &str,
    dependents: Vec<DependentRef>,
    plural: bool,
) -> QuillResult<()> {
    if dependents.is_empty() {
        return Ok(());
    }
    tracing::info!(
        child_name,
        dependents = dependents.len(),
        "Mutation blocked by dependent prompts"
    );
    Err(QuillError::DependencyConflict {
        child_name: child_name.to_string(),
        dependents,
        plural,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use quill_core::{ChildSelector, Prompt, PromptDependency};
    use quill_storage::{InMemoryPromptStore, PromptStore, PromptTransaction};

    async fn seeded() -> (InMemoryPromptStore, Prompt) {
        let store = InMemoryPromptStore::new();
        let mut tx = store.begin().await.unwrap();
        let onboarding = Prompt::new("proj", "onboarding", 3, serde_json::json!("@@@greeting@@@"));
        let summary = Prompt::new("proj", "summary", 1, serde_json::json!("@@@greeting@@@"));
        tx.insert_prompt(&onboarding).await.unwrap();
        tx.insert_prompt(&summary).await.unwrap();
        tx.insert_dependency(&PromptDependency::new(
            "proj",
            onboarding.id,
            "greeting",
            ChildSelector::Version(1),
        ))
        .await
        .unwrap();
        tx.insert_dependency(&PromptDependency::new(
            "proj",
            summary.id,
            "greeting",
            ChildSelector::Label("production".into()),
        ))
        .await
        .unwrap();
        tx.commit().await.unwrap();
        (store, onboarding)
    }

    #[tokio::test]
    async fn test_matches_version_or_label() {
        let (store, _) = seeded().await;
        let mut reader = store.reader().await.unwrap();

        let by_version = find_dependents(
            &mut reader,
            "proj",
            "greeting",
            [1],
            &LabelSet::new(),
            &ExcludedParents::none(),
        )
        .await
        .unwrap();
        assert_eq!(by_version.len(), 1);
        assert_eq!(by_version[0].parent_name, "onboarding");

        let by_label = find_dependents(
            &mut reader,
            "proj",
            "greeting",
            [7],
            &LabelSet::from_iter(["production"]),
            &ExcludedParents::none(),
        )
        .await
        .unwrap();
        assert_eq!(by_label.len(), 1);
        assert_eq!(by_label[0].matched, ChildSelector::Label("production".into()));

        let none = find_dependents(
            &mut reader,
            "proj",
            "greeting",
            [2],
            &LabelSet::from_iter(["staging"]),
            &ExcludedParents::none(),
        )
        .await
        .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_empty_candidates_match_nothing() {
        let (store, _) = seeded().await;
        let mut reader = store.reader().await.unwrap();
        let found = find_dependents(
            &mut reader,
            "proj",
            "greeting",
            [],
            &LabelSet::new(),
            &ExcludedParents::none(),
        )
        .await
        .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_excluded_parents_are_skipped() {
        let (store, onboarding) = seeded().await;
        let mut reader = store.reader().await.unwrap();
        let excluded: ExcludedParents = [onboarding.id].into_iter().collect();
        let found = find_dependents_matching(
            &mut reader,
            "proj",
            "greeting",
            &DependencyQuery::AnyEdge,
            &excluded,
        )
        .await
        .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].parent_name, "summary");
    }

    #[tokio::test]
    async fn test_other_project_is_invisible() {
        let (store, _) = seeded().await;
        let mut reader = store.reader().await.unwrap();
        let found = find_dependents_matching(
            &mut reader,
            "elsewhere",
            "greeting",
            &DependencyQuery::AnyEdge,
            &ExcludedParents::none(),
        )
        .await
        .unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn test_ensure_no_dependents() {
        assert!(ensure_no_dependents("greeting", Vec::new(), false).is_ok());
        let err = ensure_no_dependents(
            "greeting",
            vec![DependentRef {
                parent_name: "onboarding".into(),
                parent_version: 3,
                child_name: "greeting".into(),
                matched: ChildSelector::Version(1),
            }],
            false,
        )
        .unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Other prompts are depending on the prompt version"));
        assert!(message.contains("onboarding v3 depends on greeting v1"));
    }
}

//! Property-Based Tests for the `latest` invariant
//!
//! For any well-formed family and any sequence of deletes, label updates,
//! `latest` strips and creates, every non-empty family has exactly one
//! version holding `latest` after each mutation, and no non-reserved label
//! is held by two versions.

use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use quill_core::{LabelSet, Prompt, QuillError, ValidationError};
use quill_mutations::{
    LabelUpdate, MutationContext, MutationOrchestrator, NewPromptVersion,
};
use quill_storage::{InMemoryFamilyCache, InMemoryPromptStore, PromptReads, PromptStore};
use quill_test_utils::fixtures::{self, PROJECT};
use quill_test_utils::generators::{arb_family, arb_family_ops, arb_label_set, FamilyOp};
use tokio::runtime::Runtime;

type Orchestrator = MutationOrchestrator<InMemoryPromptStore, InMemoryFamilyCache>;

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

async fn family(store: &InMemoryPromptStore) -> Result<Vec<Prompt>, TestCaseError> {
    let mut reader = store
        .reader()
        .await
        .map_err(|e| TestCaseError::fail(e.to_string()))?;
    reader
        .list_family(PROJECT, "greeting")
        .await
        .map_err(|e| TestCaseError::fail(e.to_string()))
}

fn check_family(rows: &[Prompt]) -> Result<(), TestCaseError> {
    let holders = rows.iter().filter(|p| p.is_latest()).count();
    if rows.is_empty() {
        prop_assert_eq!(holders, 0);
    } else {
        prop_assert_eq!(holders, 1, "latest held by {} versions", holders);
    }

    let mut seen = HashSet::new();
    for label in rows.iter().flat_map(|p| p.labels.without_latest().into_iter()) {
        prop_assert!(seen.insert(label.clone()), "label {} held twice", label);
    }
    Ok(())
}

/// Apply one op; only outcomes the op is allowed to produce count as success.
async fn apply(
    orchestrator: &Orchestrator,
    ctx: &MutationContext,
    rows: &[Prompt],
    op: &FamilyOp,
) -> Result<(), TestCaseError> {
    let pick = |i: usize| rows.get(i % rows.len().max(1)).map(|p| p.version);
    let result = match op {
        FamilyOp::Delete(i) => match pick(*i) {
            Some(version) => orchestrator
                .delete_version(ctx, "greeting", version)
                .await
                .map(|_| ()),
            None => return Ok(()),
        },
        FamilyOp::Relabel(i, labels) => match pick(*i) {
            Some(version) => orchestrator
                .update_labels(ctx, "greeting", version, LabelUpdate::new(labels.clone()))
                .await
                .map(|_| ()),
            None => return Ok(()),
        },
        FamilyOp::StripLatest => match rows.iter().find(|p| p.is_latest()) {
            Some(holder) => {
                let keep = holder.labels.without_latest();
                orchestrator
                    .update_labels(
                        ctx,
                        "greeting",
                        holder.version,
                        LabelUpdate::new(keep).stripping_latest(),
                    )
                    .await
                    .map(|_| ())
            }
            None => return Ok(()),
        },
        FamilyOp::Create(labels) => orchestrator
            .create_version(
                ctx,
                "greeting",
                NewPromptVersion {
                    content: serde_json::json!("next"),
                    labels: labels.clone(),
                    dependencies: Vec::new(),
                },
            )
            .await
            .map(|_| ()),
    };

    match result {
        Ok(()) => Ok(()),
        Err(QuillError::Validation(ValidationError::CannotStripLatest { .. })) if rows.len() == 1 => {
            Ok(())
        }
        Err(e) => Err(TestCaseError::fail(format!("{:?} failed: {}", op, e))),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_exactly_one_latest_after_every_mutation(
        seed in arb_family(PROJECT, "greeting"),
        ops in arb_family_ops(8),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = Arc::new(InMemoryPromptStore::new());
            fixtures::seed_prompts(store.as_ref(), &seed)
                .await
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let orchestrator = MutationOrchestrator::new(
                Arc::clone(&store),
                Arc::new(InMemoryFamilyCache::new()),
                fixtures::fast_config(),
            )
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let ctx = MutationContext::new(PROJECT, fixtures::member());

            check_family(&family(&store).await?)?;
            for op in &ops {
                let rows = family(&store).await?;
                apply(&orchestrator, &ctx, &rows, op).await?;
                check_family(&family(&store).await?)?;
            }
            Ok::<(), TestCaseError>(())
        })?;
    }

    #[test]
    fn prop_created_versions_are_consecutive(
        creates in 1usize..6,
        label_sets in proptest::collection::vec(arb_label_set(2), 6),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = Arc::new(InMemoryPromptStore::new());
            let orchestrator = MutationOrchestrator::new(
                Arc::clone(&store),
                Arc::new(InMemoryFamilyCache::new()),
                fixtures::fast_config(),
            )
            .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let ctx = MutationContext::new(PROJECT, fixtures::member());

            for (i, requested) in label_sets.iter().take(creates).enumerate() {
                let created = orchestrator
                    .create_version(&ctx, "greeting", NewPromptVersion {
                        content: serde_json::json!(i),
                        labels: requested.clone(),
                        dependencies: Vec::new(),
                    })
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert_eq!(created.prompt.version, i as i32 + 1);
                prop_assert!(created.prompt.is_latest());
                let expected: LabelSet = requested.iter().collect();
                prop_assert_eq!(created.prompt.labels.without_latest(), expected);
            }
            check_family(&family(&store).await?)
        })?;
    }
}

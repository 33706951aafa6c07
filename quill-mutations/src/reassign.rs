//! `latest` label promotion.
//!
//! Whenever the row holding `latest` loses it (deleted, or stripped by a
//! label update), the highest remaining version of the family takes it over
//! inside the same transaction.

use quill_core::{Prompt, PromotedVersion, PromptId, QuillResult, LATEST_LABEL};
use quill_storage::PromptTransaction;

/// Highest-versioned row of `family` other than `removed`.
///
/// `family` may be in any order.
pub fn pick_successor<'a>(family: &'a [Prompt], removed: &PromptId) -> Option<&'a Prompt> {
    family
        .iter()
        .filter(|p| &p.id != removed)
        .max_by_key(|p| p.version)
}

/// Promote a successor when `removed_labels` included `latest`.
///
/// The successor keeps its existing labels; `latest` is added to them.
/// Returns `None` when no promotion was needed or the family has no other
/// row left.
pub async fn reassign_latest_if_needed<T>(
    tx: &mut T,
    project_id: &str,
    name: &str,
    removed: &PromptId,
    removed_labels: &quill_core::LabelSet,
) -> QuillResult<Option<PromotedVersion>>
where
    T: PromptTransaction + ?Sized,
{
    if !removed_labels.has_latest() {
        return Ok(None);
    }

    let family = tx.list_family(project_id, name).await?;
    let Some(successor) = pick_successor(&family, removed) else {
        tracing::debug!(project_id, name, "No version left to take the latest label");
        return Ok(None);
    };

    let mut labels = successor.labels.clone();
    labels.insert(LATEST_LABEL);
    let promoted = tx.set_labels(project_id, successor.id, &labels).await?;

    tracing::debug!(
        project_id,
        name,
        version = promoted.version,
        "Promoted version to latest"
    );
    Ok(Some(PromotedVersion {
        prompt_id: promoted.id,
        version: promoted.version,
    }))
}

//! Mutation orchestrator.
//!
//! Every mutation has the same shape:
//!
//! 1. validate input and run the dependency / authorization checks against
//!    an autocommit reader (fail fast, no lock taken);
//! 2. take the family lock and sweep the family cache;
//! 3. open a transaction, re-check against the transaction's snapshot, write,
//!    promote `latest` where needed, commit;
//! 4. release the lock;
//! 5. emit audit records.

use std::collections::BTreeSet;
use std::sync::Arc;

use quill_core::{
    Actor, AuditRecord, DependencyQuery, DependencySpec, DependentRef, FamilyKey, LabelSet,
    ProjectId, Prompt, PromotedVersion, PromptDependency, PromptId, QuillConfig, QuillError,
    QuillResult, ValidationError, LATEST_LABEL,
};
use quill_storage::{FamilyCache, PromptReads, PromptStore, PromptTransaction};

use crate::collaborators::{
    ensure_label_change_permitted, AllowAllAuthorizer, AuditSink, LabelAuthorizer,
    TracingAuditSink,
};
use crate::dependents::{
    ensure_no_dependents, find_dependents, find_dependents_matching, ExcludedParents,
};
use crate::guard::CacheCoherenceGuard;
use crate::reassign::reassign_latest_if_needed;

// ============================================================================
// REQUEST / OUTCOME TYPES
// ============================================================================

/// Who mutates which project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationContext {
    pub project_id: ProjectId,
    pub actor: Actor,
}

impl MutationContext {
    pub fn new(project_id: impl Into<ProjectId>, actor: Actor) -> Self {
        Self {
            project_id: project_id.into(),
            actor,
        }
    }
}

/// Outcome of deleting one version.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedVersion {
    /// The row as it was before deletion.
    pub deleted: Prompt,
    /// Set when the deleted row held `latest` and another row took it.
    pub promoted: Option<PromotedVersion>,
}

/// Outcome of deleting a whole family.
#[derive(Debug, Clone, PartialEq)]
pub struct DeletedFamily {
    /// Every deleted row as it was before deletion, highest version first.
    pub deleted: Vec<Prompt>,
}

/// What a family deletion would remove and who blocks it.
#[derive(Debug, Clone, PartialEq)]
pub struct FamilyDeletionPlan {
    pub rows: Vec<Prompt>,
    pub versions: BTreeSet<i32>,
    /// Union of every label held by the family, `latest` included.
    pub labels: LabelSet,
    /// Parents outside the family with an edge on its name.
    pub dependents: Vec<DependentRef>,
}

impl FamilyDeletionPlan {
    pub fn is_blocked(&self) -> bool {
        !self.dependents.is_empty()
    }

    /// Labels the authorization collaborator must clear.
    pub fn labels_to_remove(&self) -> LabelSet {
        self.labels.without_latest()
    }
}

/// Requested label state for one version.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LabelUpdate {
    /// New non-reserved labels of the version. Replaces the current ones.
    pub labels: LabelSet,
    /// Remove `latest` from the version, promoting the highest other version.
    pub strip_latest: bool,
}

impl LabelUpdate {
    pub fn new(labels: LabelSet) -> Self {
        Self {
            labels,
            strip_latest: false,
        }
    }

    pub fn stripping_latest(mut self) -> Self {
        self.strip_latest = true;
        self
    }
}

/// One row whose labels changed.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelChange {
    pub before: Prompt,
    pub after: Prompt,
}

/// Outcome of a label update.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelUpdateOutcome {
    /// The updated version.
    pub prompt: Prompt,
    /// Every row whose labels changed, the updated version first.
    pub changes: Vec<LabelChange>,
    pub promoted: Option<PromotedVersion>,
}

/// A version to append to a family.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NewPromptVersion {
    pub content: serde_json::Value,
    /// Labels besides `latest`, which every new version receives.
    pub labels: LabelSet,
    pub dependencies: Vec<DependencySpec>,
}

/// Outcome of creating a version.
#[derive(Debug, Clone, PartialEq)]
pub struct CreatedVersion {
    pub prompt: Prompt,
    /// Older rows that gave up labels to the new version.
    pub relabelled: Vec<LabelChange>,
}

// ============================================================================
// ORCHESTRATOR
// ============================================================================

/// Runs dependency-checked, cache-coherent mutations on prompt families.
pub struct MutationOrchestrator<S, C>
where
    S: PromptStore,
    C: FamilyCache + 'static,
{
    store: Arc<S>,
    guard: CacheCoherenceGuard<C>,
    audit: Arc<dyn AuditSink>,
    authorizer: Arc<dyn LabelAuthorizer>,
}

impl<S, C> MutationOrchestrator<S, C>
where
    S: PromptStore,
    C: FamilyCache + 'static,
{
    /// Build an orchestrator that audits to tracing and treats no label as
    /// protected.
    pub fn new(store: Arc<S>, cache: Arc<C>, config: QuillConfig) -> QuillResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            guard: CacheCoherenceGuard::new(cache, config),
            audit: Arc::new(TracingAuditSink),
            authorizer: Arc::new(AllowAllAuthorizer),
        })
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn LabelAuthorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn guard(&self) -> &CacheCoherenceGuard<C> {
        &self.guard
    }

    // ------------------------------------------------------------------------
    // Delete one version
    // ------------------------------------------------------------------------

    /// Delete `name` v`version`, promoting a successor if it held `latest`.
    ///
    /// Fails with `DependencyConflict` when another prompt references the
    /// version directly or through one of its labels.
    #[tracing::instrument(
        skip_all,
        fields(project_id = %ctx.project_id, prompt_name = %name, version = version)
    )]
    pub async fn delete_version(
        &self,
        ctx: &MutationContext,
        name: &str,
        version: i32,
    ) -> QuillResult<DeletedVersion> {
        let project_id = ctx.project_id.as_str();
        let target = {
            let mut reader = self.store.reader().await?;
            let target = reader
                .find_version(project_id, name, version)
                .await?
                .ok_or_else(|| not_found(name, Some(version)))?;
            let dependents = version_dependents(&mut reader, &target).await?;
            ensure_no_dependents(name, dependents, false)?;
            target
        };
        ensure_label_change_permitted(
            self.authorizer.as_ref(),
            project_id,
            &ctx.actor,
            &target.labels.without_latest(),
        )
        .await?;

        let family = FamilyKey::new(project_id, name);
        let outcome = self
            .guard
            .run_locked(&family, self.delete_version_tx(ctx, name, version))
            .await?;

        tracing::info!(
            deleted_id = %outcome.deleted.id,
            promoted = ?outcome.promoted.map(|p| p.version),
            "Deleted prompt version"
        );
        self.emit_audit(AuditRecord::deleted(&ctx.actor, &outcome.deleted))
            .await;
        Ok(outcome)
    }

    async fn delete_version_tx(
        &self,
        ctx: &MutationContext,
        name: &str,
        version: i32,
    ) -> QuillResult<DeletedVersion> {
        let project_id = ctx.project_id.as_str();
        let mut tx = self.store.begin().await?;

        let target = tx
            .find_version(project_id, name, version)
            .await?
            .ok_or_else(|| not_found(name, Some(version)))?;
        let dependents = version_dependents(&mut tx, &target).await?;
        ensure_no_dependents(name, dependents, false)?;
        ensure_label_change_permitted(
            self.authorizer.as_ref(),
            project_id,
            &ctx.actor,
            &target.labels.without_latest(),
        )
        .await?;

        if tx.delete_prompts(project_id, &[target.id]).await? == 0 {
            return Err(not_found(name, Some(version)));
        }
        let promoted =
            reassign_latest_if_needed(&mut tx, project_id, name, &target.id, &target.labels)
                .await?;

        tx.commit().await?;
        Ok(DeletedVersion {
            deleted: target,
            promoted,
        })
    }

    // ------------------------------------------------------------------------
    // Delete a family
    // ------------------------------------------------------------------------

    /// Rows, versions and labels a family deletion would remove, and the
    /// dependents that would block it. Takes no lock.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn plan_family_deletion(
        &self,
        project_id: &str,
        name: &str,
    ) -> QuillResult<FamilyDeletionPlan> {
        let mut reader = self.store.reader().await?;
        family_plan(&mut reader, project_id, name).await
    }

    /// Delete every version of `name`.
    ///
    /// Blocked by any edge on `name` from outside the family, and by protected
    /// labels the actor may not remove.
    #[tracing::instrument(skip_all, fields(project_id = %ctx.project_id, prompt_name = %name))]
    pub async fn delete_family(&self, ctx: &MutationContext, name: &str) -> QuillResult<DeletedFamily> {
        let project_id = ctx.project_id.as_str();
        let plan = self.plan_family_deletion(project_id, name).await?;
        if plan.rows.is_empty() {
            return Err(not_found(name, None));
        }
        ensure_no_dependents(name, plan.dependents.clone(), true)?;
        ensure_label_change_permitted(
            self.authorizer.as_ref(),
            project_id,
            &ctx.actor,
            &plan.labels_to_remove(),
        )
        .await?;

        let family = FamilyKey::new(project_id, name);
        let outcome = self
            .guard
            .run_locked(&family, self.delete_family_tx(ctx, name))
            .await?;

        tracing::info!(deleted = outcome.deleted.len(), "Deleted prompt family");
        for row in &outcome.deleted {
            self.emit_audit(AuditRecord::deleted(&ctx.actor, row)).await;
        }
        Ok(outcome)
    }

    async fn delete_family_tx(&self, ctx: &MutationContext, name: &str) -> QuillResult<DeletedFamily> {
        let project_id = ctx.project_id.as_str();
        let mut tx = self.store.begin().await?;

        let plan = family_plan(&mut tx, project_id, name).await?;
        if plan.rows.is_empty() {
            return Err(not_found(name, None));
        }
        ensure_no_dependents(name, plan.dependents.clone(), true)?;
        // Rows may have gained labels while we waited for the lock.
        ensure_label_change_permitted(
            self.authorizer.as_ref(),
            project_id,
            &ctx.actor,
            &plan.labels_to_remove(),
        )
        .await?;

        let ids: Vec<PromptId> = plan.rows.iter().map(|p| p.id).collect();
        tx.delete_prompts(project_id, &ids).await?;
        tx.commit().await?;

        Ok(DeletedFamily { deleted: plan.rows })
    }

    // ------------------------------------------------------------------------
    // Update labels
    // ------------------------------------------------------------------------

    /// Replace the non-reserved labels of `name` v`version`.
    ///
    /// Labels the version takes are removed from its siblings. `latest` can
    /// only be stripped, never assigned, and stripping it promotes the
    /// highest other version.
    #[tracing::instrument(
        skip_all,
        fields(project_id = %ctx.project_id, prompt_name = %name, version = version)
    )]
    pub async fn update_labels(
        &self,
        ctx: &MutationContext,
        name: &str,
        version: i32,
        update: LabelUpdate,
    ) -> QuillResult<LabelUpdateOutcome> {
        validate_requested_labels(&update.labels)?;
        let project_id = ctx.project_id.as_str();

        let (target, family_size) = {
            let mut reader = self.store.reader().await?;
            let target = reader
                .find_version(project_id, name, version)
                .await?
                .ok_or_else(|| not_found(name, Some(version)))?;
            let family_size = reader.list_family(project_id, name).await?.len();
            (target, family_size)
        };
        if update.strip_latest && target.is_latest() && family_size <= 1 {
            return Err(cannot_strip_latest(name, version));
        }

        ensure_label_change_permitted(
            self.authorizer.as_ref(),
            project_id,
            &ctx.actor,
            &changed_labels(&target.labels, &update.labels),
        )
        .await?;

        let family = FamilyKey::new(project_id, name);
        let outcome = self
            .guard
            .run_locked(&family, self.update_labels_tx(ctx, name, version, &update))
            .await?;

        tracing::info!(
            labels = %outcome.prompt.labels,
            changed_rows = outcome.changes.len(),
            promoted = ?outcome.promoted.map(|p| p.version),
            "Updated prompt labels"
        );
        for change in &outcome.changes {
            self.emit_audit(AuditRecord::updated(&ctx.actor, &change.before, &change.after))
                .await;
        }
        Ok(outcome)
    }

    async fn update_labels_tx(
        &self,
        ctx: &MutationContext,
        name: &str,
        version: i32,
        update: &LabelUpdate,
    ) -> QuillResult<LabelUpdateOutcome> {
        let project_id = ctx.project_id.as_str();
        let mut tx = self.store.begin().await?;

        let rows = tx.list_family(project_id, name).await?;
        let target = rows
            .iter()
            .find(|p| p.version == version)
            .cloned()
            .ok_or_else(|| not_found(name, Some(version)))?;
        // The row may have gained or lost labels while we waited for the lock.
        ensure_label_change_permitted(
            self.authorizer.as_ref(),
            project_id,
            &ctx.actor,
            &changed_labels(&target.labels, &update.labels),
        )
        .await?;

        let strip = update.strip_latest && target.is_latest();
        let mut next = update.labels.clone();
        if target.is_latest() && !strip {
            next.insert(LATEST_LABEL);
        }

        let mut changes = Vec::new();
        let after = tx.set_labels(project_id, target.id, &next).await?;
        changes.push(LabelChange {
            before: target.clone(),
            after: after.clone(),
        });
        let moved =
            take_labels_from_siblings(&mut tx, &rows, Some(&target.id), &update.labels).await?;
        changes.extend(moved);

        let promoted = if strip {
            let promoted = reassign_latest_if_needed(
                &mut tx,
                project_id,
                name,
                &target.id,
                &LabelSet::latest(),
            )
            .await?
            .ok_or_else(|| cannot_strip_latest(name, version))?;
            record_promotion(&mut tx, &rows, &mut changes, project_id, name, promoted).await?;
            Some(promoted)
        } else {
            None
        };

        tx.commit().await?;
        Ok(LabelUpdateOutcome {
            prompt: after,
            changes,
            promoted,
        })
    }

    // ------------------------------------------------------------------------
    // Create a version
    // ------------------------------------------------------------------------

    /// Append the next version to `name`. It becomes `latest` and takes every
    /// requested label from the versions currently holding it.
    #[tracing::instrument(skip_all, fields(project_id = %ctx.project_id, prompt_name = %name))]
    pub async fn create_version(
        &self,
        ctx: &MutationContext,
        name: &str,
        new: NewPromptVersion,
    ) -> QuillResult<CreatedVersion> {
        let requested = new.labels.without_latest();
        requested.validate()?;
        for dependency in &new.dependencies {
            if dependency.child_name == name {
                return Err(ValidationError::SelfDependency {
                    name: name.to_string(),
                }
                .into());
            }
        }
        let project_id = ctx.project_id.as_str();
        ensure_label_change_permitted(self.authorizer.as_ref(), project_id, &ctx.actor, &requested)
            .await?;

        let family = FamilyKey::new(project_id, name);
        let outcome = self
            .guard
            .run_locked(&family, self.create_version_tx(ctx, name, new, requested))
            .await?;

        tracing::info!(
            version = outcome.prompt.version,
            relabelled = outcome.relabelled.len(),
            "Created prompt version"
        );
        self.emit_audit(AuditRecord::created(&ctx.actor, &outcome.prompt))
            .await;
        for change in &outcome.relabelled {
            self.emit_audit(AuditRecord::updated(&ctx.actor, &change.before, &change.after))
                .await;
        }
        Ok(outcome)
    }

    async fn create_version_tx(
        &self,
        ctx: &MutationContext,
        name: &str,
        new: NewPromptVersion,
        requested: LabelSet,
    ) -> QuillResult<CreatedVersion> {
        let project_id = ctx.project_id.as_str();
        let mut tx = self.store.begin().await?;

        let rows = tx.list_family(project_id, name).await?;
        let version = rows.iter().map(|p| p.version).max().unwrap_or(0) + 1;

        let mut labels = requested;
        labels.insert(LATEST_LABEL);
        let relabelled = take_labels_from_siblings(&mut tx, &rows, None, &labels).await?;

        let mut prompt = Prompt::new(project_id, name, version, new.content).with_labels(labels);
        if let Some(actor_id) = ctx.actor.actor_id() {
            prompt = prompt.with_created_by(actor_id);
        }
        tx.insert_prompt(&prompt).await?;
        for spec in new.dependencies {
            let edge = PromptDependency::new(project_id, prompt.id, spec.child_name, spec.child);
            tx.insert_dependency(&edge).await?;
        }

        tx.commit().await?;
        Ok(CreatedVersion { prompt, relabelled })
    }

    async fn emit_audit(&self, record: AuditRecord) {
        let resource_id = record.resource_id;
        if let Err(e) = self.audit.record(record).await {
            tracing::warn!(error = %e, resource_id = %resource_id, "Failed to write audit record");
        }
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn not_found(name: &str, version: Option<i32>) -> QuillError {
    QuillError::NotFound {
        name: name.to_string(),
        version,
    }
}

fn cannot_strip_latest(name: &str, version: i32) -> QuillError {
    ValidationError::CannotStripLatest {
        name: name.to_string(),
        version,
    }
    .into()
}

/// Non-reserved labels added or removed when `current` becomes `requested`.
fn changed_labels(current: &LabelSet, requested: &LabelSet) -> LabelSet {
    let current = current.without_latest();
    requested
        .difference(&current)
        .union(&current.difference(requested))
}

fn validate_requested_labels(labels: &LabelSet) -> QuillResult<()> {
    if labels.has_latest() {
        return Err(ValidationError::ReservedLabel {
            label: LATEST_LABEL.to_string(),
        }
        .into());
    }
    labels.validate()?;
    Ok(())
}

/// Dependents blocking deletion of one row: edges on its version or on any
/// label it holds, ignoring the row's own edges.
async fn version_dependents<R>(reads: &mut R, target: &Prompt) -> QuillResult<Vec<DependentRef>>
where
    R: PromptReads + ?Sized,
{
    find_dependents(
        reads,
        &target.project_id,
        &target.name,
        [target.version],
        &target.labels,
        &ExcludedParents::from_iter([target.id]),
    )
    .await
}

async fn family_plan<R>(reads: &mut R, project_id: &str, name: &str) -> QuillResult<FamilyDeletionPlan>
where
    R: PromptReads + ?Sized,
{
    let rows = reads.list_family(project_id, name).await?;
    let versions: BTreeSet<i32> = rows.iter().map(|p| p.version).collect();
    let labels = rows
        .iter()
        .fold(LabelSet::new(), |acc, p| acc.union(&p.labels));
    let dependents = if rows.is_empty() {
        Vec::new()
    } else {
        let own: ExcludedParents = rows.iter().map(|p| p.id).collect();
        find_dependents_matching(reads, project_id, name, &DependencyQuery::AnyEdge, &own).await?
    };
    Ok(FamilyDeletionPlan {
        rows,
        versions,
        labels,
        dependents,
    })
}

/// Remove `labels` from every row in `rows` except `keep`.
async fn take_labels_from_siblings<T>(
    tx: &mut T,
    rows: &[Prompt],
    keep: Option<&PromptId>,
    labels: &LabelSet,
) -> QuillResult<Vec<LabelChange>>
where
    T: PromptTransaction + ?Sized,
{
    let mut changes = Vec::new();
    for row in rows.iter().filter(|p| Some(&p.id) != keep) {
        if row.labels.intersection(labels).is_empty() {
            continue;
        }
        let remaining = row.labels.difference(labels);
        let after = tx.set_labels(&row.project_id, row.id, &remaining).await?;
        changes.push(LabelChange {
            before: row.clone(),
            after,
        });
    }
    Ok(changes)
}

/// Fold a promotion into the change list, merging with an earlier change of
/// the same row.
async fn record_promotion<T>(
    tx: &mut T,
    rows: &[Prompt],
    changes: &mut Vec<LabelChange>,
    project_id: &str,
    name: &str,
    promoted: PromotedVersion,
) -> QuillResult<()>
where
    T: PromptTransaction + ?Sized,
{
    let Some(after) = tx.find_version(project_id, name, promoted.version).await? else {
        return Err(not_found(name, Some(promoted.version)));
    };
    if let Some(existing) = changes.iter_mut().find(|c| c.after.id == promoted.prompt_id) {
        existing.after = after;
        return Ok(());
    }
    if let Some(before) = rows.iter().find(|p| p.id == promoted.prompt_id) {
        changes.push(LabelChange {
            before: before.clone(),
            after,
        });
    }
    Ok(())
}

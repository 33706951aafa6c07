//! Audit and authorization collaborators.
//!
//! Both live outside the transactional path. Audit failures are logged and
//! swallowed; authorization answers are a hard gate checked before any lock
//! is taken.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use quill_core::{Actor, AuditRecord, LabelSet, QuillError, QuillResult};

// ============================================================================
// AUDIT
// ============================================================================

/// Receives audit records after a mutation commits.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> QuillResult<()>;
}

/// Writes audit records to the tracing pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) -> QuillResult<()> {
        tracing::info!(
            action = ?record.action,
            resource_id = %record.resource_id,
            project_id = %record.project_id,
            org_id = %record.org_id,
            actor_id = ?record.actor_id,
            "Audit"
        );
        Ok(())
    }
}

/// Keeps audit records in memory.
#[derive(Debug, Default)]
pub struct InMemoryAuditLog {
    records: Mutex<Vec<AuditRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditLog {
    async fn record(&self, record: AuditRecord) -> QuillResult<()> {
        let mut records = self.records.lock().map_err(|_| {
            QuillError::from(quill_core::StorageError::Unavailable {
                reason: "audit log lock poisoned".to_string(),
            })
        })?;
        records.push(record);
        Ok(())
    }
}

// ============================================================================
// AUTHORIZATION
// ============================================================================

/// Outcome of a protected-label check.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProtectedLabelCheck {
    /// The subset of the checked labels that is protected.
    pub protected_labels: LabelSet,
    /// Whether the actor may change them.
    pub permitted: bool,
}

impl ProtectedLabelCheck {
    pub fn has_protected_labels(&self) -> bool {
        !self.protected_labels.is_empty()
    }
}

/// Decides whether an actor may add or remove protected labels.
#[async_trait]
pub trait LabelAuthorizer: Send + Sync {
    async fn check(
        &self,
        project_id: &str,
        actor: &Actor,
        labels: &LabelSet,
    ) -> QuillResult<ProtectedLabelCheck>;
}

/// Fail with `AuthorizationDenied` unless `actor` may change `labels`.
pub async fn ensure_label_change_permitted(
    authorizer: &dyn LabelAuthorizer,
    project_id: &str,
    actor: &Actor,
    labels: &LabelSet,
) -> QuillResult<()> {
    if labels.is_empty() {
        return Ok(());
    }
    let check = authorizer.check(project_id, actor, labels).await?;
    if check.has_protected_labels() && !check.permitted {
        tracing::info!(
            project_id,
            protected = %check.protected_labels,
            "Protected label change denied"
        );
        return Err(QuillError::AuthorizationDenied {
            protected_labels: check.protected_labels,
        });
    }
    Ok(())
}

/// Treats no label as protected.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllAuthorizer;

#[async_trait]
impl LabelAuthorizer for AllowAllAuthorizer {
    async fn check(
        &self,
        _project_id: &str,
        _actor: &Actor,
        _labels: &LabelSet,
    ) -> QuillResult<ProtectedLabelCheck> {
        Ok(ProtectedLabelCheck {
            protected_labels: LabelSet::new(),
            permitted: true,
        })
    }
}

/// Fixed per-project protected labels and a fixed set of privileged actors.
#[derive(Debug, Clone, Default)]
pub struct StaticLabelAuthorizer {
    protected: HashMap<String, LabelSet>,
    privileged: HashSet<String>,
}

impl StaticLabelAuthorizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn protect(mut self, project_id: impl Into<String>, labels: LabelSet) -> Self {
        let entry = self.protected.entry(project_id.into()).or_default();
        *entry = entry.union(&labels);
        self
    }

    /// Grant `actor_id` permission to change protected labels.
    pub fn privilege(mut self, actor_id: impl Into<String>) -> Self {
        self.privileged.insert(actor_id.into());
        self
    }
}

#[async_trait]
impl LabelAuthorizer for StaticLabelAuthorizer {
    async fn check(
        &self,
        project_id: &str,
        actor: &Actor,
        labels: &LabelSet,
    ) -> QuillResult<ProtectedLabelCheck> {
        let protected_labels = self
            .protected
            .get(project_id)
            .map(|p| p.intersection(labels))
            .unwrap_or_default();
        let permitted = protected_labels.is_empty()
            || actor
                .actor_id()
                .map(|id| self.privileged.contains(id))
                .unwrap_or(false);
        Ok(ProtectedLabelCheck {
            protected_labels,
            permitted,
        })
    }
}

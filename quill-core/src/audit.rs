//! Audit records emitted around prompt mutations.

use crate::identity::{Actor, OrgId, ProjectId, PromptId, Timestamp};
use crate::prompt::Prompt;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditResourceType {
    Prompt,
}

/// One audit entry. `before` carries the full prior row for deletes and
/// label updates so the row can be reconstructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub action: AuditAction,
    pub resource_type: AuditResourceType,
    pub resource_id: PromptId,
    pub project_id: ProjectId,
    pub org_id: OrgId,
    pub actor_id: Option<String>,
    pub before: Option<Prompt>,
    pub after: Option<Prompt>,
    pub recorded_at: Timestamp,
}

impl AuditRecord {
    pub fn deleted(actor: &Actor, before: &Prompt) -> Self {
        Self::build(AuditAction::Delete, actor, before.id, &before.project_id)
            .with_before(before.clone())
    }

    pub fn updated(actor: &Actor, before: &Prompt, after: &Prompt) -> Self {
        Self::build(AuditAction::Update, actor, after.id, &after.project_id)
            .with_before(before.clone())
            .with_after(after.clone())
    }

    pub fn created(actor: &Actor, after: &Prompt) -> Self {
        Self::build(AuditAction::Create, actor, after.id, &after.project_id)
            .with_after(after.clone())
    }

    fn build(action: AuditAction, actor: &Actor, resource_id: PromptId, project_id: &str) -> Self {
        Self {
            action,
            resource_type: AuditResourceType::Prompt,
            resource_id,
            project_id: project_id.to_string(),
            org_id: actor.org_id.clone(),
            actor_id: actor.actor_id().map(str::to_string),
            before: None,
            after: None,
            recorded_at: chrono::Utc::now(),
        }
    }

    fn with_before(mut self, before: Prompt) -> Self {
        self.before = Some(before);
        self
    }

    fn with_after(mut self, after: Prompt) -> Self {
        self.after = Some(after);
        self
    }
}

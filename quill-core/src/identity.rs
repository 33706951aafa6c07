//! Identity types for quill entities

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Project identifier. Projects are owned by the host application and are
/// opaque strings to this crate.
pub type ProjectId = String;

/// Organization identifier, carried through to audit records only.
pub type OrgId = String;

/// Row identifier of a single prompt version.
///
/// Uses UUIDv7 so ids are sortable by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PromptId(Uuid);

impl PromptId {
    /// Generate a fresh id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wrap an existing UUID, e.g. one read back from a store.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for PromptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PromptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Row identifier of a dependency edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DependencyId(Uuid);

impl DependencyId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for DependencyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who is performing a mutation.
///
/// Exactly one of user or API key is set in practice, but both are optional
/// so that internal jobs can act anonymously.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    pub org_id: OrgId,
    pub user_id: Option<String>,
    pub api_key_id: Option<String>,
}

impl Actor {
    /// Actor authenticated by an API key.
    pub fn api_key(org_id: impl Into<OrgId>, api_key_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            user_id: None,
            api_key_id: Some(api_key_id.into()),
        }
    }

    /// Actor authenticated as a user session.
    pub fn user(org_id: impl Into<OrgId>, user_id: impl Into<String>) -> Self {
        Self {
            org_id: org_id.into(),
            user_id: Some(user_id.into()),
            api_key_id: None,
        }
    }

    /// Identifier recorded in audit logs.
    pub fn actor_id(&self) -> Option<&str> {
        self.user_id.as_deref().or(self.api_key_id.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_ids_are_unique() {
        let a = PromptId::new();
        let b = PromptId::new();
        assert_ne!(a, b);
        assert_eq!(PromptId::from_uuid(a.as_uuid()), a);
    }

    #[test]
    fn test_actor_id_prefers_user() {
        let mut actor = Actor::api_key("org", "key-1");
        assert_eq!(actor.actor_id(), Some("key-1"));
        actor.user_id = Some("user-1".to_string());
        assert_eq!(actor.actor_id(), Some("user-1"));
    }
}

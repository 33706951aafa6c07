//! Prompt versions and their label sets

use crate::constants::{LATEST_LABEL, MAX_LABEL_LENGTH};
use crate::error::ValidationError;
use crate::identity::{ProjectId, PromptId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// LABEL SET
// ============================================================================

/// Set of labels attached to one prompt version.
///
/// Stores may persist labels as an array, but duplicates and ordering carry
/// no meaning. Iteration is sorted so that rendered messages are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelSet(BTreeSet<String>);

impl LabelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set containing only the reserved `latest` label.
    pub fn latest() -> Self {
        Self::from_iter([LATEST_LABEL])
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, label: &str) -> bool {
        self.0.contains(label)
    }

    /// Whether this set holds the reserved `latest` label.
    pub fn has_latest(&self) -> bool {
        self.contains(LATEST_LABEL)
    }

    /// Insert a label. Returns false when it was already present.
    pub fn insert(&mut self, label: impl Into<String>) -> bool {
        self.0.insert(label.into())
    }

    /// Remove a label. Returns false when it was absent.
    pub fn remove(&mut self, label: &str) -> bool {
        self.0.remove(label)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn union(&self, other: &LabelSet) -> LabelSet {
        LabelSet(self.0.union(&other.0).cloned().collect())
    }

    pub fn intersection(&self, other: &LabelSet) -> LabelSet {
        LabelSet(self.0.intersection(&other.0).cloned().collect())
    }

    /// Labels in `self` that are not in `other`.
    pub fn difference(&self, other: &LabelSet) -> LabelSet {
        LabelSet(self.0.difference(&other.0).cloned().collect())
    }

    /// Copy of this set without the reserved `latest` label.
    pub fn without_latest(&self) -> LabelSet {
        let mut labels = self.clone();
        labels.remove(LATEST_LABEL);
        labels
    }

    /// Check every label against the naming rules.
    ///
    /// `latest` is accepted here; callers that must not touch the reserved
    /// label reject it separately.
    pub fn validate(&self) -> Result<(), ValidationError> {
        for label in self.iter() {
            validate_label(label)?;
        }
        Ok(())
    }
}

impl<S: Into<String>> FromIterator<S> for LabelSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        LabelSet(iter.into_iter().map(Into::into).collect())
    }
}

impl<S: Into<String>> Extend<S> for LabelSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        self.0.extend(iter.into_iter().map(Into::into));
    }
}

impl IntoIterator for LabelSet {
    type Item = String;
    type IntoIter = std::collections::btree_set::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for LabelSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self.iter().collect::<Vec<_>>().join(", ");
        f.write_str(&joined)
    }
}

/// Labels are lowercase alphanumerics plus `_`, `-` and `.`, at most
/// [`MAX_LABEL_LENGTH`] characters.
pub fn validate_label(label: &str) -> Result<(), ValidationError> {
    if label.is_empty() {
        return Err(ValidationError::InvalidLabel {
            label: label.to_string(),
            reason: "label must not be empty".to_string(),
        });
    }
    if label.len() > MAX_LABEL_LENGTH {
        return Err(ValidationError::InvalidLabel {
            label: label.to_string(),
            reason: format!("label must be at most {} characters", MAX_LABEL_LENGTH),
        });
    }
    let valid = label
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.'));
    if !valid {
        return Err(ValidationError::InvalidLabel {
            label: label.to_string(),
            reason: "only lowercase alphanumerics, '_', '-' and '.' are allowed".to_string(),
        });
    }
    Ok(())
}

// ============================================================================
// PROMPT
// ============================================================================

/// One immutable version of a prompt. Only `labels` changes after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prompt {
    pub id: PromptId,
    pub project_id: ProjectId,
    pub name: String,
    /// Unique per (project_id, name), starting at 1.
    pub version: i32,
    pub labels: LabelSet,
    /// Prompt body. Opaque to the registry.
    pub content: serde_json::Value,
    pub created_by: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Prompt {
    /// Build a new version row. The caller picks the version number.
    pub fn new(
        project_id: impl Into<ProjectId>,
        name: impl Into<String>,
        version: i32,
        content: serde_json::Value,
    ) -> Self {
        let now = chrono::Utc::now();
        Self {
            id: PromptId::new(),
            project_id: project_id.into(),
            name: name.into(),
            version,
            labels: LabelSet::new(),
            content,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_labels(mut self, labels: LabelSet) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_created_by(mut self, created_by: impl Into<String>) -> Self {
        self.created_by = Some(created_by.into());
        self
    }

    pub fn is_latest(&self) -> bool {
        self.labels.has_latest()
    }
}

/// Outcome of a `latest` promotion: which row received the label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotedVersion {
    pub prompt_id: PromptId,
    pub version: i32,
}

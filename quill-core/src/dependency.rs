//! Dependency edges between prompts.
//!
//! Edges form a flat relation `parent row -> (child name, selector)`. They are
//! only ever inspected one hop deep, so no graph structure is built here.

use crate::error::ValidationError;
use crate::identity::{DependencyId, ProjectId, PromptId};
use crate::prompt::LabelSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// How a parent resolves its child: a pinned version or a movable label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChildSelector {
    Version(i32),
    Label(String),
}

impl ChildSelector {
    /// Build a selector from the two nullable columns a store persists.
    ///
    /// Exactly one of `version` and `label` must be set.
    pub fn from_columns(
        child_name: &str,
        version: Option<i32>,
        label: Option<String>,
    ) -> Result<Self, ValidationError> {
        match (version, label) {
            (Some(v), None) => Ok(ChildSelector::Version(v)),
            (None, Some(l)) => Ok(ChildSelector::Label(l)),
            _ => Err(ValidationError::InvalidSelector {
                child_name: child_name.to_string(),
            }),
        }
    }

    /// Split back into `(child_version, child_label)` columns.
    pub fn into_columns(self) -> (Option<i32>, Option<String>) {
        match self {
            ChildSelector::Version(v) => (Some(v), None),
            ChildSelector::Label(l) => (None, Some(l)),
        }
    }
}

impl fmt::Display for ChildSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildSelector::Version(v) => write!(f, "v{}", v),
            ChildSelector::Label(l) => f.write_str(l),
        }
    }
}

/// Directed edge: the parent prompt row embeds `child_name` resolved by `child`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptDependency {
    pub id: DependencyId,
    pub project_id: ProjectId,
    pub parent_id: PromptId,
    pub child_name: String,
    pub child: ChildSelector,
}

impl PromptDependency {
    pub fn new(
        project_id: impl Into<ProjectId>,
        parent_id: PromptId,
        child_name: impl Into<String>,
        child: ChildSelector,
    ) -> Self {
        Self {
            id: DependencyId::new(),
            project_id: project_id.into(),
            parent_id,
            child_name: child_name.into(),
            child,
        }
    }
}

/// Reference requested by a new prompt version, before its row id exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySpec {
    pub child_name: String,
    pub child: ChildSelector,
}

impl DependencySpec {
    pub fn version(child_name: impl Into<String>, version: i32) -> Self {
        Self {
            child_name: child_name.into(),
            child: ChildSelector::Version(version),
        }
    }

    pub fn label(child_name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            child_name: child_name.into(),
            child: ChildSelector::Label(label.into()),
        }
    }
}

/// Which edges on a child name a dependents lookup should match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyQuery {
    /// Edges whose selector is one of the given versions or labels.
    Selectors {
        versions: BTreeSet<i32>,
        labels: LabelSet,
    },
    /// Every edge on the child name, whatever its selector.
    AnyEdge,
}

impl DependencyQuery {
    pub fn selectors(versions: impl IntoIterator<Item = i32>, labels: LabelSet) -> Self {
        DependencyQuery::Selectors {
            versions: versions.into_iter().collect(),
            labels,
        }
    }

    /// Whether an edge with this selector falls under the query.
    pub fn matches(&self, selector: &ChildSelector) -> bool {
        match self {
            DependencyQuery::AnyEdge => true,
            DependencyQuery::Selectors { versions, labels } => match selector {
                ChildSelector::Version(v) => versions.contains(v),
                ChildSelector::Label(l) => labels.contains(l),
            },
        }
    }

    /// A selector query with no candidates can never match.
    pub fn is_empty(&self) -> bool {
        match self {
            DependencyQuery::AnyEdge => false,
            DependencyQuery::Selectors { versions, labels } => {
                versions.is_empty() && labels.is_empty()
            }
        }
    }
}

/// A parent that blocks a destructive operation on its child.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependentRef {
    pub parent_name: String,
    pub parent_version: i32,
    pub child_name: String,
    pub matched: ChildSelector,
}

impl fmt::Display for DependentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} v{} depends on {} {}",
            self.parent_name, self.parent_version, self.child_name, self.matched
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_from_columns() {
        assert_eq!(
            ChildSelector::from_columns("greeting", Some(1), None).unwrap(),
            ChildSelector::Version(1)
        );
        assert_eq!(
            ChildSelector::from_columns("greeting", None, Some("prod".to_string())).unwrap(),
            ChildSelector::Label("prod".to_string())
        );
        assert!(ChildSelector::from_columns("greeting", None, None).is_err());
        assert!(ChildSelector::from_columns("greeting", Some(1), Some("prod".to_string())).is_err());
    }

    #[test]
    fn test_selector_columns_roundtrip() {
        let selector = ChildSelector::Label("prod".to_string());
        let (version, label) = selector.clone().into_columns();
        assert_eq!(
            ChildSelector::from_columns("greeting", version, label).unwrap(),
            selector
        );
    }

    #[test]
    fn test_query_matches() {
        let query = DependencyQuery::selectors([2], LabelSet::from_iter(["prod"]));
        assert!(query.matches(&ChildSelector::Version(2)));
        assert!(!query.matches(&ChildSelector::Version(1)));
        assert!(query.matches(&ChildSelector::Label("prod".to_string())));
        assert!(!query.matches(&ChildSelector::Label("staging".to_string())));
        assert!(DependencyQuery::AnyEdge.matches(&ChildSelector::Version(99)));
    }

    #[test]
    fn test_empty_query() {
        assert!(DependencyQuery::selectors([], LabelSet::new()).is_empty());
        assert!(!DependencyQuery::AnyEdge.is_empty());
    }

    #[test]
    fn test_dependent_ref_display() {
        let by_version = DependentRef {
            parent_name: "onboarding".to_string(),
            parent_version: 3,
            child_name: "greeting".to_string(),
            matched: ChildSelector::Version(1),
        };
        assert_eq!(by_version.to_string(), "onboarding v3 depends on greeting v1");

        let by_label = DependentRef {
            matched: ChildSelector::Label("prod".to_string()),
            parent_version: 4,
            ..by_version
        };
        assert_eq!(by_label.to_string(), "onboarding v4 depends on greeting prod");
    }
}

//! Error types for quill operations

use crate::dependency::DependentRef;
use crate::identity::ProjectId;
use crate::prompt::LabelSet;
use std::time::Duration;
use thiserror::Error;

/// Transactional store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Prompt not found: '{name}' in project {project_id}{}", .version.map(|v| format!(" with version {}", v)).unwrap_or_default())]
    NotFound {
        project_id: ProjectId,
        name: String,
        version: Option<i32>,
    },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String, retryable: bool },

    #[error("Constraint violation on {constraint}: {reason}")]
    ConstraintViolation { constraint: String, reason: String },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Distributed lock / cache service errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Timed out after {waited:?} waiting for lock on {key}")]
    LockTimeout { key: String, waited: Duration },

    #[error("Lock on {key} is not held by this token")]
    LockNotHeld { key: String },

    #[error("Lease of {lease:?} on {key} cannot be represented")]
    InvalidLease { key: String, lease: Duration },

    #[error("Cache service unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Input validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Dependency on {child_name} must name exactly one of version or label")]
    InvalidSelector { child_name: String },

    #[error("Label '{label}' is reserved and is always assigned to the latest prompt version")]
    ReservedLabel { label: String },

    #[error("Invalid label '{label}': {reason}")]
    InvalidLabel { label: String, reason: String },

    #[error("Cannot remove 'latest' from {name} v{version}: no other version can take it")]
    CannotStripLatest { name: String, version: i32 },

    #[error("Prompt {name} cannot depend on itself")]
    SelfDependency { name: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all quill errors.
///
/// `NotFound`, `DependencyConflict`, `AuthorizationDenied`, `LockTimeout` and
/// `Transaction` are the outcomes callers are expected to branch on.
#[derive(Debug, Clone, Error)]
pub enum QuillError {
    #[error("Prompt not found: '{name}'{}", .version.map(|v| format!(" with version {}", v)).unwrap_or_default())]
    NotFound { name: String, version: Option<i32> },

    #[error("{}", render_dependency_conflict(.dependents, .plural))]
    DependencyConflict {
        child_name: String,
        dependents: Vec<DependentRef>,
        /// Whether the conflict concerns a whole family rather than one version.
        plural: bool,
    },

    #[error("You don't have permission to change prompts with a protected label. Protected labels are: {}", .protected_labels)]
    AuthorizationDenied { protected_labels: LabelSet },

    #[error("Timed out after {waited:?} waiting for lock on {key}")]
    LockTimeout { key: String, waited: Duration },

    #[error("Transaction error: {0}")]
    Transaction(StorageError),

    #[error("Cache error: {0}")]
    Cache(CacheError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl QuillError {
    /// Whether re-running the whole operation from the top may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            QuillError::LockTimeout { .. } => true,
            QuillError::Transaction(StorageError::TransactionFailed { retryable, .. }) => {
                *retryable
            }
            QuillError::Transaction(StorageError::Unavailable { .. }) => true,
            QuillError::Cache(CacheError::Unavailable { .. }) => true,
            _ => false,
        }
    }
}

impl From<StorageError> for QuillError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { name, version, .. } => QuillError::NotFound { name, version },
            other => QuillError::Transaction(other),
        }
    }
}

impl From<CacheError> for QuillError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::LockTimeout { key, waited } => QuillError::LockTimeout { key, waited },
            other => QuillError::Cache(other),
        }
    }
}

fn render_dependency_conflict(dependents: &[DependentRef], plural: &bool) -> String {
    let lines = dependents
        .iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    let target = if *plural {
        "prompt versions"
    } else {
        "the prompt version"
    };
    format!(
        "Other prompts are depending on {} you are trying to delete:\n\n{}\n\nPlease delete the dependent prompts first.",
        target, lines
    )
}

/// Result type alias for quill operations.
pub type QuillResult<T> = Result<T, QuillError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::ChildSelector;

    #[test]
    fn test_not_found_display() {
        let err = QuillError::NotFound {
            name: "greeting".to_string(),
            version: Some(2),
        };
        assert_eq!(err.to_string(), "Prompt not found: 'greeting' with version 2");

        let err = QuillError::NotFound {
            name: "greeting".to_string(),
            version: None,
        };
        assert_eq!(err.to_string(), "Prompt not found: 'greeting'");
    }

    #[test]
    fn test_dependency_conflict_lists_every_parent() {
        let err = QuillError::DependencyConflict {
            child_name: "greeting".to_string(),
            dependents: vec![
                DependentRef {
                    parent_name: "onboarding".to_string(),
                    parent_version: 3,
                    child_name: "greeting".to_string(),
                    matched: ChildSelector::Version(1),
                },
                DependentRef {
                    parent_name: "checkout".to_string(),
                    parent_version: 1,
                    child_name: "greeting".to_string(),
                    matched: ChildSelector::Label("prod".to_string()),
                },
            ],
            plural: false,
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Other prompts are depending on the prompt version"));
        assert!(msg.contains("onboarding v3 depends on greeting v1"));
        assert!(msg.contains("checkout v1 depends on greeting prod"));
        assert!(msg.ends_with("Please delete the dependent prompts first."));
    }

    #[test]
    fn test_storage_not_found_maps_to_top_level() {
        let err = QuillError::from(StorageError::NotFound {
            project_id: "p".to_string(),
            name: "greeting".to_string(),
            version: Some(1),
        });
        assert!(matches!(err, QuillError::NotFound { version: Some(1), .. }));
    }

    #[test]
    fn test_retry_classification() {
        let timeout = QuillError::from(CacheError::LockTimeout {
            key: "LOCK:prompt:p:greeting".to_string(),
            waited: Duration::from_secs(5),
        });
        assert!(matches!(timeout, QuillError::LockTimeout { .. }));
        assert!(timeout.is_retryable());

        let transient = QuillError::from(StorageError::TransactionFailed {
            reason: "connection reset".to_string(),
            retryable: true,
        });
        assert!(transient.is_retryable());

        let constraint = QuillError::from(StorageError::ConstraintViolation {
            constraint: "prompts_project_id_name_version_key".to_string(),
            reason: "duplicate".to_string(),
        });
        assert!(!constraint.is_retryable());

        let denied = QuillError::AuthorizationDenied {
            protected_labels: LabelSet::from_iter(["production"]),
        };
        assert!(!denied.is_retryable());
        assert!(denied.to_string().contains("production"));
    }
}

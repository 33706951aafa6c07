//! quill Core - Entity Types
//!
//! Pure data structures shared by the storage and mutation crates: prompt
//! versions, label sets, dependency edges, family keys, lock leases, audit
//! records, configuration and the error taxonomy. No I/O happens here.

pub mod audit;
pub mod config;
pub mod constants;
pub mod dependency;
pub mod error;
pub mod identity;
pub mod key;
pub mod lock;
pub mod prompt;

pub use audit::{AuditAction, AuditRecord, AuditResourceType};
pub use config::QuillConfig;
pub use constants::{LATEST_LABEL, PRODUCTION_LABEL};
pub use dependency::{ChildSelector, DependencyQuery, DependencySpec, DependentRef, PromptDependency};
pub use error::{CacheError, ConfigError, QuillError, QuillResult, StorageError, ValidationError};
pub use identity::{Actor, DependencyId, OrgId, ProjectId, PromptId, Timestamp};
pub use key::{CacheKey, CacheSlot, FamilyKey};
pub use lock::{Acquired, FamilyLease, LeaseData, LeaseState, LockToken};
pub use prompt::{validate_label, LabelSet, PromotedVersion, Prompt};

//! Dependency-checked, cache-coherent mutations of versioned prompts.
//!
//! [`MutationOrchestrator`] deletes versions and families, updates labels
//! and appends versions. Each mutation is checked against the dependency
//! edges of other prompts, keeps exactly one `latest` holder per family,
//! and runs under the family lock of [`CacheCoherenceGuard`] so that no
//! reader caches a pre-mutation snapshot.

pub mod collaborators;
pub mod dependents;
pub mod guard;
pub mod orchestrator;
pub mod reassign;

pub use collaborators::{
    ensure_label_change_permitted, AllowAllAuthorizer, AuditSink, InMemoryAuditLog,
    LabelAuthorizer, ProtectedLabelCheck, StaticLabelAuthorizer, TracingAuditSink,
};
pub use dependents::{
    ensure_no_dependents, find_dependents, find_dependents_matching, ExcludedParents,
};
pub use guard::{CacheCoherenceGuard, HeldLease};
pub use orchestrator::{
    CreatedVersion, DeletedFamily, DeletedVersion, FamilyDeletionPlan, LabelChange,
    LabelUpdate, LabelUpdateOutcome, MutationContext, MutationOrchestrator, NewPromptVersion,
};
pub use reassign::{pick_successor, reassign_latest_if_needed};

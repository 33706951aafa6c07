//! Constants for quill
//!
//! Centralizing constants makes them easy to find, modify, and test.

// ============================================================================
// LABELS
// ============================================================================

/// Reserved label held by exactly one version of every non-empty family.
pub const LATEST_LABEL: &str = "latest";

/// Label resolved when a reader asks for a prompt without version or label.
pub const PRODUCTION_LABEL: &str = "production";

/// Maximum length of a single label.
pub const MAX_LABEL_LENGTH: usize = 36;

// ============================================================================
// LOCKING
// ============================================================================

/// Default lease of a family lock in milliseconds (30 seconds).
pub const DEFAULT_LOCK_LEASE_MS: u64 = 30_000;

/// Longest accepted family lock lease in milliseconds (24 hours).
pub const MAX_LOCK_LEASE_MS: u64 = 86_400_000;

/// Default bounded wait when acquiring a family lock in milliseconds.
pub const DEFAULT_LOCK_WAIT_MS: u64 = 5_000;

/// Default interval between lock acquisition attempts in milliseconds.
pub const DEFAULT_LOCK_POLL_INTERVAL_MS: u64 = 25;

// ============================================================================
// CACHE KEYS
// ============================================================================

/// Namespace prefix of every cache key owned by the prompt registry.
pub const CACHE_KEY_NAMESPACE: &str = "prompt";

/// Prefix of family lock keys.
pub const LOCK_KEY_NAMESPACE: &str = "LOCK:prompt";

//! Lease typestate for family locks.
//!
//! A family lock is a short-lived lease with a TTL. The typestate makes a
//! lease usable only while it is held: releasing consumes it.
//!
//! ```text
//! (unlocked) ─── acquire() ──→ Acquired ─── release() ──→ (unlocked)
//!                                  │
//!                             (TTL expiry)
//! ```

use crate::error::CacheError;
use crate::identity::Timestamp;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;
use uuid::Uuid;

/// Opaque proof of lock ownership handed out by the lock service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LockToken(Uuid);

impl LockToken {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// LEASE DATA (state-independent)
// ============================================================================

/// What the lock service records for a held lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseData {
    pub key: String,
    pub token: LockToken,
    pub acquired_at: Timestamp,
    pub expires_at: Timestamp,
}

impl LeaseData {
    /// New lease on `key` valid for `lease` from `now`.
    ///
    /// Fails with `InvalidLease` when the expiry is not representable.
    pub fn new(key: impl Into<String>, lease: Duration, now: Timestamp) -> Result<Self, CacheError> {
        let key = key.into();
        let expires_at = chrono::Duration::from_std(lease)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl));
        let Some(expires_at) = expires_at else {
            return Err(CacheError::InvalidLease { key, lease });
        };
        Ok(Self {
            key,
            token: LockToken::new(),
            acquired_at: now,
            expires_at,
        })
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    pub fn remaining_duration(&self, now: Timestamp) -> Option<Duration> {
        if now >= self.expires_at {
            None
        } else {
            (self.expires_at - now).to_std().ok()
        }
    }
}

// ============================================================================
// TYPESTATE MARKERS
// ============================================================================

/// Marker trait for lease states.
pub trait LeaseState: private::Sealed + Send + Sync {}

/// Lease is currently held.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acquired;
impl LeaseState for Acquired {}

mod private {
    pub trait Sealed {}
    impl Sealed for super::Acquired {}
}

/// A family lock lease with compile-time state tracking.
#[derive(Debug)]
pub struct FamilyLease<S: LeaseState> {
    data: LeaseData,
    _state: PhantomData<S>,
}

impl<S: LeaseState> FamilyLease<S> {
    pub fn data(&self) -> &LeaseData {
        &self.data
    }

    pub fn key(&self) -> &str {
        &self.data.key
    }

    pub fn token(&self) -> LockToken {
        self.data.token
    }

    pub fn expires_at(&self) -> Timestamp {
        self.data.expires_at
    }
}

impl FamilyLease<Acquired> {
    /// Wrap lease data returned by a successful acquire.
    pub fn new(data: LeaseData) -> Self {
        FamilyLease {
            data,
            _state: PhantomData,
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.data.is_expired(now)
    }

    /// Release the lease, returning the data the lock service needs to drop it.
    pub fn release(self) -> LeaseData {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_lease_expiry() {
        let now = Utc::now();
        let data = LeaseData::new("LOCK:prompt:p:greeting", Duration::from_secs(30), now).unwrap();
        assert!(!data.is_expired(now));
        assert!(data.remaining_duration(now).is_some());

        let later = now + chrono::Duration::seconds(31);
        assert!(data.is_expired(later));
        assert!(data.remaining_duration(later).is_none());
    }

    #[test]
    fn test_release_consumes_lease() {
        let data =
            LeaseData::new("LOCK:prompt:p:greeting", Duration::from_secs(5), Utc::now()).unwrap();
        let lease = FamilyLease::<Acquired>::new(data.clone());
        assert_eq!(lease.token(), data.token);
        assert_eq!(lease.key(), "LOCK:prompt:p:greeting");
        let released = lease.release();
        assert_eq!(released, data);
    }

    #[test]
    fn test_unrepresentable_lease_is_rejected() {
        let now = Utc::now();
        for lease in [
            Duration::from_millis(u64::MAX),
            Duration::from_millis(100_000_000_000_000_000),
        ] {
            let err = LeaseData::new("LOCK:prompt:p:greeting", lease, now).unwrap_err();
            assert!(matches!(err, CacheError::InvalidLease { .. }));
        }
    }

    #[test]
    fn test_tokens_are_unique() {
        assert_ne!(LockToken::new(), LockToken::new());
    }
}

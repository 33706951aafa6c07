//! Per-family watermarks.
//!
//! Every invalidation of a family advances its watermark. A reader that
//! fetched from the store under watermark `w` may only populate the cache if
//! the family is still at `w`; otherwise a mutation ran in between and the
//! fetched row may predate it.

use chrono::{DateTime, Utc};

/// A point in a family's invalidation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark {
    /// Monotonically increasing; each invalidation increments it.
    pub sequence: u64,
    /// When this watermark was observed.
    pub observed_at: DateTime<Utc>,
}

impl Watermark {
    pub fn new(sequence: u64) -> Self {
        Self {
            sequence,
            observed_at: Utc::now(),
        }
    }

    /// Beginning of time for a family that was never invalidated.
    pub fn zero() -> Self {
        Self {
            sequence: 0,
            observed_at: DateTime::UNIX_EPOCH,
        }
    }

    pub fn is_newer_than(&self, other: &Watermark) -> bool {
        self.sequence > other.sequence
    }

    /// Same point in history, regardless of when each side observed it.
    pub fn same_sequence(&self, other: &Watermark) -> bool {
        self.sequence == other.sequence
    }

    pub fn next(&self) -> Watermark {
        Watermark::new(self.sequence + 1)
    }
}

impl Default for Watermark {
    fn default() -> Self {
        Self::zero()
    }
}

//! Freshness contracts for cached prompt reads.

use chrono::{DateTime, Utc};
use std::time::Duration;

use super::watermark::Watermark;

/// Staleness tolerance a reader signs up for.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Freshness {
    /// Serve a cached entry no older than `max_staleness`.
    BestEffort { max_staleness: Duration },

    /// Serve a cached entry only if the family watermark has not moved since
    /// it was cached.
    #[default]
    Consistent,
}

impl Freshness {
    pub fn best_effort(max_staleness: Duration) -> Self {
        Self::BestEffort { max_staleness }
    }

    pub fn consistent() -> Self {
        Self::Consistent
    }
}

/// Result of a read, carrying where it came from.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    cached_at: DateTime<Utc>,
    watermark: Watermark,
    was_cache_hit: bool,
    /// Whether a store read was written back to the cache.
    populated: bool,
}

impl<T> CacheRead<T> {
    pub fn from_cache(value: T, cached_at: DateTime<Utc>, watermark: Watermark) -> Self {
        Self {
            value,
            cached_at,
            watermark,
            was_cache_hit: true,
            populated: false,
        }
    }

    pub fn from_storage(value: T, watermark: Watermark, populated: bool) -> Self {
        Self {
            value,
            cached_at: Utc::now(),
            watermark,
            was_cache_hit: false,
            populated,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }

    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn was_cache_hit(&self) -> bool {
        self.was_cache_hit
    }

    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit
    }

    pub fn populated_cache(&self) -> bool {
        self.populated
    }

    pub fn watermark(&self) -> Watermark {
        self.watermark
    }

    pub fn staleness(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.cached_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }
}

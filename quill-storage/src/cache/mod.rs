//! Family cache: lock service seam, read-through resolution and
//! watermark-guarded population.
//!
//! Cached entries are keyed per family (see [`quill_core::FamilyKey`]), so a
//! mutation can sweep every version- and label-keyed entry of a family with
//! one prefix invalidation.

pub mod freshness;
pub mod memory;
pub mod read_through;
pub mod traits;
pub mod watermark;

pub use freshness::{CacheRead, Freshness};
pub use memory::InMemoryFamilyCache;
pub use read_through::{PromptReader, PromptSelector};
pub use traits::{CacheStats, CachedPrompt, FamilyCache};
pub use watermark::Watermark;

//! quill Storage - Store and Cache Seams
//!
//! Defines the transactional store and the distributed lock/cache service as
//! traits, with in-memory implementations used by tests and single-process
//! deployments.

pub mod cache;
pub mod memory;
pub mod store;

pub use cache::{
    CacheRead, CacheStats, CachedPrompt, FamilyCache, Freshness, InMemoryFamilyCache,
    PromptReader, PromptSelector, Watermark,
};
pub use memory::{InMemoryPromptStore, InMemoryReader, InMemoryTransaction, StoreState};
pub use store::{DependencyRow, PromptReads, PromptStore, PromptTransaction};

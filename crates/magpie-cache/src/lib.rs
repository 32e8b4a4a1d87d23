// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Caching layer for Magpie

#![warn(missing_docs)]

pub mod key;
pub mod lm;
pub mod memory;

pub use key::CacheKey;
pub use lm::CachedLm;
pub use memory::{ConcurrentCache, MemoryCache};

use async_trait::async_trait;
use magpie::Values;

/// Cache trait. Safe for concurrent reads and inserts; entries are only
/// ever inserted whole.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Get a value from cache
    async fn get(&self, key: &CacheKey) -> Option<Values>;

    /// Set a value in cache
    async fn set(&self, key: CacheKey, value: Values) -> anyhow::Result<()>;

    /// Check if key exists
    async fn contains(&self, key: &CacheKey) -> bool;

    /// Clear the cache
    async fn clear(&self) -> anyhow::Result<()>;
}

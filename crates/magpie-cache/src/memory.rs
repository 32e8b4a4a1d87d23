// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! In-memory caches

use crate::{Cache, CacheKey};
use async_trait::async_trait;
use dashmap::DashMap;
use lru::LruCache;
use magpie::Values;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::Mutex;

/// In-memory LRU cache
#[derive(Clone)]
pub struct MemoryCache {
    cache: Arc<Mutex<LruCache<CacheKey, Values>>>,
}

impl MemoryCache {
    /// Create a new memory cache with capacity. A capacity of 0 is treated as 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    /// Number of entries
    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    /// Whether the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.cache.lock().await.is_empty()
    }
}

impl Default for MemoryCache {
    /// Default capacity of 1000 items
    fn default() -> Self {
        Self::new(1000)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Option<Values> {
        let mut cache = self.cache.lock().await;
        cache.get(key).cloned()
    }

    async fn set(&self, key: CacheKey, value: Values) -> anyhow::Result<()> {
        let mut cache = self.cache.lock().await;
        cache.put(key, value);
        Ok(())
    }

    async fn contains(&self, key: &CacheKey) -> bool {
        let cache = self.cache.lock().await;
        cache.contains(key)
    }

    async fn clear(&self) -> anyhow::Result<()> {
        let mut cache = self.cache.lock().await;
        cache.clear();
        Ok(())
    }
}

/// Thread-safe concurrent cache using DashMap (no LRU)
#[derive(Default)]
pub struct ConcurrentCache {
    cache: DashMap<CacheKey, Values>,
}

impl ConcurrentCache {
    /// Create a new concurrent cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }
}

#[async_trait]
impl Cache for ConcurrentCache {
    async fn get(&self, key: &CacheKey) -> Option<Values> {
        self.cache.get(key).map(|v| v.clone())
    }

    async fn set(&self, key: CacheKey, value: Values) -> anyhow::Result<()> {
        self.cache.insert(key, value);
        Ok(())
    }

    async fn contains(&self, key: &CacheKey) -> bool {
        self.cache.contains_key(key)
    }

    async fn clear(&self) -> anyhow::Result<()> {
        self.cache.clear();
        Ok(())
    }
}

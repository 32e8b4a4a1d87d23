// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Caching wrapper for any [`Lm`].
//!
//! Hits are returned with `cached = true` and zero usage so they are not
//! billed. Two concurrent misses on the same key may both reach the inner
//! LM; the later insert wins. Errors and outputs that violate the request's
//! contract are never cached, so a guard retry reaches the inner LM again.

use crate::{Cache, CacheKey, ConcurrentCache};
use async_trait::async_trait;
use magpie::{Lm, LmError, LmOutput, LmRequest};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// An LM wrapper that serves repeated requests from a shared cache.
pub struct CachedLm<L: Lm> {
    inner: L,
    cache: Arc<dyn Cache>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<L: Lm> CachedLm<L> {
    /// Wrap `inner` with an unbounded concurrent cache
    pub fn new(inner: L) -> Self {
        Self::with_cache(inner, Arc::new(ConcurrentCache::new()))
    }

    /// Wrap `inner` with a caller-supplied cache, which may be shared
    pub fn with_cache(inner: L, cache: Arc<dyn Cache>) -> Self {
        Self {
            inner,
            cache,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The wrapped LM
    pub fn inner(&self) -> &L {
        &self.inner
    }

    /// The backing cache
    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Cache hits so far
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Cache misses so far
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<L: Lm> Lm for CachedLm<L> {
    async fn invoke(&self, request: &LmRequest) -> Result<LmOutput, LmError> {
        let key = CacheKey::from_request(self.inner.model_name(), request);

        if let Some(values) = self.cache.get(&key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(digest = %key.digest, "cache hit");
            return Ok(LmOutput {
                values,
                usage: Default::default(),
                cached: true,
            });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let output = self.inner.invoke(request).await?;
        if let Err(reason) = request.contract.check_outputs(&output.values) {
            debug!(digest = %key.digest, %reason, "invalid output not cached");
        } else if let Err(e) = self.cache.set(key, output.values.clone()).await {
            warn!(error = %e, "failed to store LM output in cache");
        }
        Ok(output)
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

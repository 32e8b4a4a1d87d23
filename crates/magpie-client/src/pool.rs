// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Global cap on concurrent LM calls

use async_trait::async_trait;
use magpie::{CancelToken, Lm, LmError, LmOutput, LmRequest};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::trace;

/// Pool for rate limiting and concurrency control
#[derive(Debug)]
pub struct LmPool {
    /// Semaphore for controlling concurrent requests
    semaphore: Semaphore,

    /// Maximum concurrent requests
    max_concurrent: usize,
}

impl LmPool {
    /// Create a new pool. A limit of 0 is treated as 1.
    pub fn new(max_concurrent: usize) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            semaphore: Semaphore::new(max_concurrent),
            max_concurrent,
        }
    }

    /// Acquire a permit to make a request
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>, LmError> {
        self.semaphore
            .acquire()
            .await
            .map_err(|_| LmError::unavailable("LM pool closed"))
    }

    /// Get max concurrent requests
    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Permits currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for LmPool {
    fn default() -> Self {
        Self::new(10)
    }
}

/// LM wrapper that holds a pool permit for the duration of each call.
///
/// Every wrapper sharing one [`LmPool`] shares its limit, no matter how many
/// evaluations are in flight. Calls still waiting for a permit when the
/// cancel token fires fail without reaching the inner LM.
pub struct PooledLm<L: Lm> {
    inner: L,
    pool: Arc<LmPool>,
    timeout: Option<Duration>,
    cancel: CancelToken,
}

impl<L: Lm> PooledLm<L> {
    /// Wrap `inner` with a shared pool
    pub fn new(inner: L, pool: Arc<LmPool>) -> Self {
        Self {
            inner,
            pool,
            timeout: None,
            cancel: CancelToken::never(),
        }
    }

    /// Fail calls that run longer than `timeout` with a timeout error.
    /// Waiting for a permit does not count.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Abandon permit waits once `cancel` fires
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The shared pool
    pub fn pool(&self) -> &Arc<LmPool> {
        &self.pool
    }
}

#[async_trait]
impl<L: Lm> Lm for PooledLm<L> {
    async fn invoke(&self, request: &LmRequest) -> Result<LmOutput, LmError> {
        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                trace!(model = self.inner.model_name(), "cancelled while waiting for LM pool");
                return Err(LmError::unavailable("cancelled while waiting for LM pool"));
            }
            permit = self.pool.acquire() => permit?,
        };
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.invoke(request))
                .await
                .map_err(|_| LmError::timeout(format!("LM call exceeded {:?}", limit)))?,
            None => self.inner.invoke(request).await,
        }
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}

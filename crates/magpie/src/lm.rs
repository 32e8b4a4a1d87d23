// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! LM invocation capability.
//!
//! Steps never talk to a model directly. They hand an [`LmRequest`] to an
//! [`Lm`], which may be a real provider adapter, a cache, a pool or one of the
//! mocks defined here.
//!
//! ```
//! use magpie::lm::MockLm;
//! use magpie::types::values;
//!
//! let lm = MockLm::new(|req| Ok(values([("answer", req.inputs["question"].clone())])));
//! assert_eq!(lm.calls(), 0);
//! ```

use crate::contract::Contract;
use crate::demo::Demonstration;
use crate::step::{Step, StepStrategy, REASONING_FIELD};
use crate::types::Values;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Per-call overrides. Anything left `None` falls back to the LM's own
/// configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CallOptions {
    /// Sampling temperature override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Completion length override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl CallOptions {
    /// Override the temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Override the completion length
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Everything an LM needs to execute one step
#[derive(Debug, Clone)]
pub struct LmRequest {
    /// Contract of the calling step
    pub contract: Arc<Contract>,
    /// Effective instruction
    pub instruction: String,
    /// Demonstrations, in order
    pub demos: Vec<Demonstration>,
    /// Input values
    pub inputs: Values,
    /// Execution strategy
    pub strategy: StepStrategy,
    /// Per-call overrides
    pub options: CallOptions,
}

impl LmRequest {
    /// Build the request a step would send for `inputs`
    pub fn for_step(step: &Step, inputs: Values, options: CallOptions) -> Self {
        Self {
            contract: Arc::clone(step.contract()),
            instruction: step.effective_instruction().to_string(),
            demos: step.demos.to_vec(),
            inputs,
            strategy: step.strategy().clone(),
            options,
        }
    }

    /// Output field names expected in the reply, reasoning first when requested
    pub fn output_names(&self) -> Vec<&str> {
        let mut names = Vec::with_capacity(self.contract.outputs().len() + 1);
        if self.strategy.wants_reasoning() {
            names.push(REASONING_FIELD);
        }
        names.extend(self.contract.outputs().iter().map(|f| f.name.as_str()));
        names
    }
}

/// Token usage of one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    pub prompt_tokens: u64,
    /// Completion tokens
    pub completion_tokens: u64,
}

impl Usage {
    /// Create usage counts
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
        }
    }

    /// Total tokens
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Output of a successful call
#[derive(Debug, Clone, PartialEq)]
pub struct LmOutput {
    /// Produced output values
    pub values: Values,
    /// Token usage
    pub usage: Usage,
    /// Whether the values were served from a cache
    pub cached: bool,
}

impl LmOutput {
    /// Create an uncached output with zero usage
    pub fn new(values: Values) -> Self {
        Self {
            values,
            usage: Usage::default(),
            cached: false,
        }
    }

    /// Attach usage counts
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }
}

/// Failure classes reported by an LM
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LmErrorKind {
    /// The call timed out
    Timeout,
    /// The provider throttled the call
    RateLimited,
    /// The provider is down or overloaded
    Unavailable,
    /// The reply could not be parsed into the contract's outputs
    Malformed,
    /// The provider refused on safety grounds
    Safety,
    /// Any other refusal
    Rejected,
}

impl LmErrorKind {
    /// Stable name for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::Unavailable => "unavailable",
            Self::Malformed => "malformed",
            Self::Safety => "safety",
            Self::Rejected => "rejected",
        }
    }

    /// Whether a retry may succeed
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited | Self::Unavailable | Self::Malformed
        )
    }
}

impl fmt::Display for LmErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by an [`Lm`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct LmError {
    /// Failure class
    pub kind: LmErrorKind,
    /// Provider message
    pub message: String,
}

impl LmError {
    /// Create an error of a given kind
    pub fn new(kind: LmErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(LmErrorKind::Timeout, message)
    }

    /// Rate-limit error
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::new(LmErrorKind::RateLimited, message)
    }

    /// Unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(LmErrorKind::Unavailable, message)
    }

    /// Malformed-output error
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(LmErrorKind::Malformed, message)
    }

    /// Safety refusal
    pub fn safety(message: impl Into<String>) -> Self {
        Self::new(LmErrorKind::Safety, message)
    }

    /// Generic refusal
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(LmErrorKind::Rejected, message)
    }

    /// Whether a retry may succeed
    #[inline]
    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }

    /// Classify a provider that only reports a message string.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let msg = message.to_lowercase();

        let kind = if msg.contains("429") || msg.contains("rate limit") {
            LmErrorKind::RateLimited
        } else if msg.contains("timeout") || msg.contains("timed out") {
            LmErrorKind::Timeout
        } else if msg.contains("500")
            || msg.contains("502")
            || msg.contains("503")
            || msg.contains("internal server error")
            || msg.contains("bad gateway")
            || msg.contains("service unavailable")
            || msg.contains("overloaded")
            || msg.contains("capacity")
            || (msg.contains("connection") && (msg.contains("reset") || msg.contains("refused")))
        {
            LmErrorKind::Unavailable
        } else if msg.contains("content filter")
            || msg.contains("content_filter")
            || msg.contains("safety")
        {
            LmErrorKind::Safety
        } else if msg.contains("parse") || msg.contains("malformed") {
            LmErrorKind::Malformed
        } else {
            LmErrorKind::Rejected
        };

        Self { kind, message }
    }
}

/// LM invocation capability. Implementations must be safe to call again
/// with the same request and may return different outputs each time.
#[async_trait]
pub trait Lm: Send + Sync {
    /// Execute one request
    async fn invoke(&self, request: &LmRequest) -> Result<LmOutput, LmError>;

    /// Model name, used in cache keys and logs
    fn model_name(&self) -> &str {
        "unknown"
    }
}

#[async_trait]
impl<L: Lm + ?Sized> Lm for Arc<L> {
    async fn invoke(&self, request: &LmRequest) -> Result<LmOutput, LmError> {
        (**self).invoke(request).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Shared counters of billable LM work.
///
/// Cache hits are not billable and are not counted. Every recorded call
/// notifies [`UsageMeter::subscribe`] receivers, so limits can be enforced
/// while calls are still in flight.
#[derive(Debug)]
pub struct UsageMeter {
    calls: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    updates: watch::Sender<()>,
}

impl Default for UsageMeter {
    fn default() -> Self {
        let (updates, _rx) = watch::channel(());
        Self {
            calls: AtomicU64::new(0),
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
            updates,
        }
    }
}

/// Point-in-time copy of a [`UsageMeter`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Billable calls
    pub calls: u64,
    /// Prompt tokens
    pub prompt_tokens: u64,
    /// Completion tokens
    pub completion_tokens: u64,
}

impl UsageMeter {
    /// Create a zeroed meter
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one call's output
    pub fn record(&self, output: &LmOutput) {
        if output.cached {
            return;
        }
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.prompt_tokens
            .fetch_add(output.usage.prompt_tokens, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(output.usage.completion_tokens, Ordering::Relaxed);
        self.updates.send_replace(());
    }

    /// Receiver that is marked changed after every recorded call
    pub fn subscribe(&self) -> watch::Receiver<()> {
        self.updates.subscribe()
    }

    /// Read the counters
    pub fn snapshot(&self) -> UsageSnapshot {
        UsageSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
        }
    }
}

/// A mock LM driven by a closure, for tests.
///
/// Usage is estimated at one token per four characters.
pub struct MockLm<F>
where
    F: Fn(&LmRequest) -> Result<Values, LmError> + Send + Sync,
{
    responder: F,
    name: &'static str,
    latency: Option<Duration>,
    calls: AtomicUsize,
}

impl<F> MockLm<F>
where
    F: Fn(&LmRequest) -> Result<Values, LmError> + Send + Sync,
{
    /// Create a new mock LM with the given responder.
    pub fn new(responder: F) -> Self {
        Self {
            responder,
            name: "mock",
            latency: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Set a custom model name.
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Sleep for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of invocations so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn estimate_tokens(values: &Values) -> u64 {
    let chars: usize = values.iter().map(|(k, v)| k.len() + v.len()).sum();
    (chars as u64).div_ceil(4)
}

#[async_trait]
impl<F> Lm for MockLm<F>
where
    F: Fn(&LmRequest) -> Result<Values, LmError> + Send + Sync,
{
    async fn invoke(&self, request: &LmRequest) -> Result<LmOutput, LmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let values = (self.responder)(request)?;
        let usage = Usage::new(
            estimate_tokens(&request.inputs) + request.instruction.len() as u64 / 4,
            estimate_tokens(&values),
        );
        Ok(LmOutput::new(values).with_usage(usage))
    }

    fn model_name(&self) -> &str {
        self.name
    }
}

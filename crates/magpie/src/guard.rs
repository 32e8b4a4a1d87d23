// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Quality guard: contract validation and retry with exponential backoff.
//!
//! Inputs are validated before any LM call and are never retried. Transient
//! LM failures and outputs that violate the contract are retried up to
//! [`GuardPolicy::max_attempts`]; everything else fails on the spot. A step
//! that gives up yields a [`StepFailure`], never a panic.

use crate::cancel::CancelToken;
use crate::contract::Contract;
use crate::lm::{CallOptions, Lm, LmOutput, LmRequest, UsageMeter};
use crate::step::Step;
use crate::types::{duration_ms, Values};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, warn};

/// Retry policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    #[serde(with = "duration_ms")]
    pub initial_backoff: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Upper bound on any single delay
    #[serde(with = "duration_ms")]
    pub max_backoff: Duration,
}

impl Default for GuardPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_backoff: Duration::from_secs(30),
        }
    }
}

impl GuardPolicy {
    /// Create a policy with `max_attempts` and default backoff
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Set the initial backoff
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Set the backoff multiplier
    pub fn with_backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Set the maximum backoff
    pub fn with_max_backoff(mut self, backoff: Duration) -> Self {
        self.max_backoff = backoff;
        self
    }

    /// Policy that never sleeps, for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts)
            .with_initial_backoff(Duration::ZERO)
            .with_max_backoff(Duration::ZERO)
    }

    /// Saturates at `max_backoff` when the product is not a valid duration.
    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(
            (delay.as_secs_f64() * self.backoff_factor).min(self.max_backoff.as_secs_f64()),
        )
        .unwrap_or(self.max_backoff)
    }
}

/// Why a step gave up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Inputs violated the contract; no LM call was made
    InvalidInput,
    /// Every attempt hit a transient LM error
    RetriesExhausted,
    /// The LM refused in a way retries cannot fix
    NonTransient,
    /// Every attempt produced output violating the contract
    InvalidOutput,
    /// Cancellation was requested
    Cancelled,
}

impl FailureKind {
    /// Stable name for logging
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::RetriesExhausted => "retries_exhausted",
            Self::NonTransient => "non_transient",
            Self::InvalidOutput => "invalid_output",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Sentinel produced when a step gives up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    /// Failure class
    pub kind: FailureKind,
    /// Last reason observed
    pub reason: String,
    /// LM attempts made
    pub attempts: u32,
}

impl StepFailure {
    /// Create a failure
    pub fn new(kind: FailureKind, reason: impl Into<String>, attempts: u32) -> Self {
        Self {
            kind,
            reason: reason.into(),
            attempts,
        }
    }

    /// Whether the failure came from cancellation
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.kind == FailureKind::Cancelled
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} after {} attempt(s): {}",
            self.kind.as_str(),
            self.attempts,
            self.reason
        )
    }
}

/// A successful guarded call
#[derive(Debug, Clone)]
pub struct Guarded {
    /// LM output, validated against the contract
    pub output: LmOutput,
    /// Attempts it took
    pub attempts: u32,
}

/// Validates values against contracts and retries LM calls.
#[derive(Debug, Clone, Default)]
pub struct QualityGuard {
    policy: GuardPolicy,
}

impl QualityGuard {
    /// Create a guard with a policy
    pub fn new(policy: GuardPolicy) -> Self {
        Self { policy }
    }

    /// The retry policy
    pub fn policy(&self) -> &GuardPolicy {
        &self.policy
    }

    /// Check inputs and project them onto the step's declared input fields.
    ///
    /// Undeclared keys are dropped. Missing optional inputs are allowed.
    pub fn validate_input(&self, step: &Step, values: &Values) -> Result<Values, StepFailure> {
        check_inputs(step.contract(), values)
            .map_err(|reason| StepFailure::new(FailureKind::InvalidInput, reason, 0))
    }

    /// Check outputs: every output field present and within its domain and
    /// bounds. The reasoning field is not part of the contract and is ignored.
    pub fn validate_output(&self, step: &Step, output: &Values) -> Result<(), String> {
        step.contract().check_outputs(output)
    }

    /// Call the LM for `step`, retrying transient failures and invalid outputs.
    ///
    /// Cancellation is checked before every attempt and while backing off. An
    /// LM error observed after cancellation is reported as cancelled.
    /// Every non-cached reply is recorded on `meter`, including rejected ones.
    pub async fn invoke_with_retry(
        &self,
        lm: &dyn Lm,
        step: &Step,
        inputs: Values,
        options: CallOptions,
        cancel: &CancelToken,
        meter: &UsageMeter,
    ) -> Result<Guarded, StepFailure> {
        let request = LmRequest::for_step(step, inputs, options);
        let max_attempts = self.policy.max_attempts.max(1);
        let mut delay = self.policy.initial_backoff;
        let mut last_kind = FailureKind::RetriesExhausted;
        let mut last_reason = String::new();

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(StepFailure::new(
                    FailureKind::Cancelled,
                    "cancelled before attempt",
                    attempt - 1,
                ));
            }

            match lm.invoke(&request).await {
                Ok(output) => {
                    meter.record(&output);
                    match step.contract().check_outputs(&output.values) {
                        Ok(()) => return Ok(Guarded { output, attempts: attempt }),
                        Err(reason) => {
                            debug!(step = step.name(), attempt, %reason, "output rejected");
                            last_kind = FailureKind::InvalidOutput;
                            last_reason = reason;
                        }
                    }
                }
                Err(e) if cancel.is_cancelled() => {
                    debug!(step = step.name(), attempt, error = %e, "LM call cut short by cancellation");
                    return Err(StepFailure::new(
                        FailureKind::Cancelled,
                        e.to_string(),
                        attempt - 1,
                    ));
                }
                Err(e) if e.is_transient() => {
                    debug!(step = step.name(), attempt, error = %e, "transient LM error");
                    last_kind = FailureKind::RetriesExhausted;
                    last_reason = e.to_string();
                }
                Err(e) => {
                    warn!(step = step.name(), error = %e, "LM refused");
                    return Err(StepFailure::new(
                        FailureKind::NonTransient,
                        e.to_string(),
                        attempt,
                    ));
                }
            }

            if attempt < max_attempts && !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(StepFailure::new(
                            FailureKind::Cancelled,
                            "cancelled during backoff",
                            attempt,
                        ));
                    }
                }
                delay = self.policy.next_delay(delay);
            }
        }

        warn!(
            step = step.name(),
            attempts = max_attempts,
            kind = last_kind.as_str(),
            reason = %last_reason,
            "step gave up"
        );
        Err(StepFailure::new(last_kind, last_reason, max_attempts))
    }
}

fn check_inputs(contract: &Contract, values: &Values) -> Result<Values, String> {
    let mut projected = Values::new();
    for field in contract.inputs() {
        match values.get(&field.name) {
            Some(value) => {
                field.check(value)?;
                projected.insert(field.name.clone(), value.clone());
            }
            None if field.required => {
                return Err(format!("missing required input `{}`", field.name));
            }
            None => {}
        }
    }
    Ok(projected)
}

// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Trace recording.
//!
//! A [`TraceRecorder`] is shared by every worker of an evaluation. Each call
//! to [`TraceRecorder::record`] opens a fresh [`RunContext`] with its own
//! event buffer, so concurrent runs never see each other's events.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::guard::{QualityGuard, StepFailure};
use crate::lm::{CallOptions, Lm, UsageMeter};
use crate::pipeline::Pipeline;
use crate::step::Step;
use crate::types::{duration_ms, Values};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of one step invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    /// Outputs produced by the step
    Success(Values),
    /// The guard gave up
    Failure(StepFailure),
}

/// One step invocation within a pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    /// Step name
    pub step: String,
    /// Inputs as sent to the LM
    pub inputs: Values,
    /// Outputs or failure
    pub outcome: StepOutcome,
    /// Wall-clock time spent in the step
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    /// LM attempts made
    pub attempts: u32,
}

impl TraceEvent {
    /// Outputs, when the step succeeded
    pub fn outputs(&self) -> Option<&Values> {
        match &self.outcome {
            StepOutcome::Success(values) => Some(values),
            StepOutcome::Failure(_) => None,
        }
    }

    /// Whether the step succeeded
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, StepOutcome::Success(_))
    }
}

/// Ordered events of one pipeline run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Events in invocation order
    pub events: Vec<TraceEvent>,
}

impl Trace {
    /// Number of events
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no step was invoked
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Iterate events
    pub fn iter(&self) -> std::slice::Iter<'_, TraceEvent> {
        self.events.iter()
    }

    /// Events of a single step
    pub fn for_step<'a>(&'a self, step: &'a str) -> impl Iterator<Item = &'a TraceEvent> + 'a {
        self.events.iter().filter(move |e| e.step == step)
    }

    /// Total LM attempts across the run
    pub fn total_attempts(&self) -> u32 {
        self.events.iter().map(|e| e.attempts).sum()
    }
}

/// Output and trace of one recorded run
#[derive(Debug)]
pub struct Recording {
    /// Pipeline output or the error it raised
    pub output: Result<Values>,
    /// Events recorded until completion or failure
    pub trace: Trace,
}

/// Executes pipelines and records their traces.
#[derive(Clone)]
pub struct TraceRecorder {
    lm: Arc<dyn Lm>,
    guard: QualityGuard,
    meter: Arc<UsageMeter>,
    cancel: CancelToken,
    options: CallOptions,
}

impl std::fmt::Debug for TraceRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceRecorder")
            .field("lm", &self.lm.model_name())
            .field("guard", &self.guard)
            .field("options", &self.options)
            .finish()
    }
}

impl TraceRecorder {
    /// Create a recorder with the default guard
    pub fn new(lm: Arc<dyn Lm>) -> Self {
        Self {
            lm,
            guard: QualityGuard::default(),
            meter: Arc::new(UsageMeter::new()),
            cancel: CancelToken::never(),
            options: CallOptions::default(),
        }
    }

    /// Set the quality guard
    pub fn with_guard(mut self, guard: QualityGuard) -> Self {
        self.guard = guard;
        self
    }

    /// Share a usage meter
    pub fn with_meter(mut self, meter: Arc<UsageMeter>) -> Self {
        self.meter = meter;
        self
    }

    /// Observe a cancellation token
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Per-run call overrides
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the LM, keeping everything else
    pub fn with_lm(mut self, lm: Arc<dyn Lm>) -> Self {
        self.lm = lm;
        self
    }

    /// The LM capability
    pub fn lm(&self) -> &Arc<dyn Lm> {
        &self.lm
    }

    /// The quality guard
    pub fn guard(&self) -> &QualityGuard {
        &self.guard
    }

    /// The shared usage meter
    pub fn meter(&self) -> &Arc<UsageMeter> {
        &self.meter
    }

    /// The cancellation token
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Run `pipeline` on `input` and return its output with the trace.
    ///
    /// Errors are recorded in the trace and returned in
    /// [`Recording::output`]; they are never swallowed.
    pub async fn record(&self, pipeline: &dyn Pipeline, input: &Values) -> Recording {
        let cx = RunContext::new(self);
        let output = pipeline.run(&cx, input).await;
        if let Err(e) = &output {
            debug!(pipeline = pipeline.name(), error = %e, "run failed");
        }
        Recording {
            output,
            trace: cx.into_trace(),
        }
    }
}

/// Per-run execution context handed to [`Pipeline::run`].
pub struct RunContext<'a> {
    recorder: &'a TraceRecorder,
    events: Mutex<Vec<TraceEvent>>,
}

impl<'a> RunContext<'a> {
    fn new(recorder: &'a TraceRecorder) -> Self {
        Self {
            recorder,
            events: Mutex::new(Vec::new()),
        }
    }

    /// Per-call overrides in effect for this run
    pub fn options(&self) -> CallOptions {
        self.recorder.options
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.recorder.cancel.is_cancelled()
    }

    /// Invoke `step` through the quality guard and record one event.
    ///
    /// `inputs` may carry extra keys; only the step's declared inputs are
    /// sent.
    pub async fn call(&self, step: &Step, inputs: &Values) -> Result<Values> {
        let started = Instant::now();
        let guard = &self.recorder.guard;

        let projected = match guard.validate_input(step, inputs) {
            Ok(projected) => projected,
            Err(failure) => {
                self.push(step, inputs.clone(), StepOutcome::Failure(failure.clone()), started, 0);
                return Err(Error::step(step.name(), failure));
            }
        };

        let result = guard
            .invoke_with_retry(
                self.recorder.lm.as_ref(),
                step,
                projected.clone(),
                self.recorder.options,
                &self.recorder.cancel,
                &self.recorder.meter,
            )
            .await;

        match result {
            Ok(guarded) => {
                let values = guarded.output.values;
                self.push(
                    step,
                    projected,
                    StepOutcome::Success(values.clone()),
                    started,
                    guarded.attempts,
                );
                Ok(values)
            }
            Err(failure) => {
                let attempts = failure.attempts;
                self.push(
                    step,
                    projected,
                    StepOutcome::Failure(failure.clone()),
                    started,
                    attempts,
                );
                Err(Error::step(step.name(), failure))
            }
        }
    }

    fn push(
        &self,
        step: &Step,
        inputs: Values,
        outcome: StepOutcome,
        started: Instant,
        attempts: u32,
    ) {
        self.events.lock().push(TraceEvent {
            step: step.name().to_string(),
            inputs,
            outcome,
            duration: started.elapsed(),
            attempts,
        });
    }

    fn into_trace(self) -> Trace {
        Trace {
            events: self.events.into_inner(),
        }
    }
}

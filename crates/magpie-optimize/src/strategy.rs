// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Candidate generation strategies

use crate::candidate::{Candidate, IdGen};
use async_trait::async_trait;
use magpie::{Dataset, Pipeline, Result, Trace, UsageMeter};
use magpie_eval::{AggregateResult, EvalConfig, Evaluator, Metric};

/// What a strategy may still spend in the current generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainingBudget {
    /// Candidate evaluations left; `None` when unlimited
    pub trials: Option<usize>,
}

impl RemainingBudget {
    /// No limit
    pub const UNLIMITED: Self = Self { trials: None };

    /// Cap a wanted number of candidates to what is left
    pub fn cap(&self, wanted: usize) -> usize {
        self.trials.map_or(wanted, |left| wanted.min(left))
    }
}

/// Everything a strategy may use while proposing
pub struct ProposeContext<'a> {
    /// Training split. Never the validation split.
    pub train: &'a Dataset,
    /// Harness bound to the search's shared LM, cache and cancellation
    pub evaluator: &'a Evaluator,
    /// Scoring function
    pub metric: &'a dyn Metric,
    /// Candidate id source
    pub ids: &'a IdGen,
    /// Generation being produced (1-based)
    pub generation: usize,
    /// Concurrency for training-split evaluations
    pub concurrency: usize,
}

impl ProposeContext<'_> {
    /// Evaluate `pipeline` on the training split, keeping traces
    pub async fn evaluate_train(&self, pipeline: &dyn Pipeline) -> Result<AggregateResult> {
        let config: EvalConfig = self.evaluator.config().clone().with_traces(true);
        Evaluator::new(self.evaluator.recorder().clone())
            .with_config(config)
            .evaluate(pipeline, self.train, self.metric, self.concurrency)
            .await
    }

    /// Record traces of `pipeline` on the first `n` training examples
    pub async fn sample_traces(&self, pipeline: &dyn Pipeline, n: usize) -> Vec<Trace> {
        let recorder = self.evaluator.recorder();
        let mut traces = Vec::with_capacity(n);
        for example in self.train.iter().take(n) {
            if recorder.cancel_token().is_cancelled() {
                break;
            }
            let recording = recorder.record(pipeline, &example.inputs).await;
            traces.push(recording.trace);
        }
        traces
    }

    /// Meter that billable calls of this search are recorded on
    pub fn meter(&self) -> &UsageMeter {
        self.evaluator.recorder().meter()
    }

    /// Whether the search is being cancelled
    pub fn is_cancelled(&self) -> bool {
        self.evaluator.recorder().cancel_token().is_cancelled()
    }
}

/// A way of producing new candidates from the current best.
///
/// Strategies are stateful: they remember what they already proposed and
/// are driven one generation at a time by the search controller.
#[async_trait]
pub trait Strategy: Send {
    /// Produce candidates derived from `current`.
    ///
    /// An empty list means no improvement is available this generation.
    async fn propose(
        &mut self,
        cx: &ProposeContext<'_>,
        current: &Candidate,
        budget: RemainingBudget,
    ) -> Result<Vec<Candidate>>;

    /// Strategy name for provenance and logs
    fn name(&self) -> &'static str;

    /// Maximum number of generations; `None` when unbounded
    fn max_generations(&self) -> Option<usize> {
        None
    }

    /// Stop after this many consecutive generations without improvement
    fn patience(&self) -> Option<usize> {
        None
    }
}

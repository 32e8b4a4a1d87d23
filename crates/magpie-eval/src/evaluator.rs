// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Evaluation harness: runs a pipeline over a dataset with bounded
//! concurrency and scores every example.
//!
//! One bad example never aborts an evaluation. Pipeline errors, metric
//! panics and pipeline panics all become a [`ScoreRecord`] with score 0.
//! Only harness-level faults (empty dataset, zero concurrency) are returned
//! as errors, and they are returned before any LM call.

use crate::metric::Metric;
use futures::{FutureExt, StreamExt};
use magpie::types::duration_ms;
use magpie::{Dataset, Error, Example, Pipeline, Recording, Result, Trace, TraceRecorder};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};
use tracing::{debug, info_span, warn, Instrument};

/// Harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Keep each example's trace in its record
    pub keep_traces: bool,
    /// How long in-flight examples may run after cancellation
    #[serde(with = "duration_ms")]
    pub drain_timeout: Duration,
}

impl Default for EvalConfig {
    fn default() -> Self {
        Self {
            keep_traces: false,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl EvalConfig {
    /// Keep or drop traces
    pub fn with_traces(mut self, keep: bool) -> Self {
        self.keep_traces = keep;
        self
    }

    /// Set the drain timeout
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }
}

/// Outcome class of one example
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// The metric produced a score
    Scored,
    /// The pipeline or metric failed
    Failed,
    /// Cancellation stopped the example
    Cancelled,
}

/// Error captured for one example
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordError {
    /// Error category, see [`magpie::Error::category`]
    pub category: String,
    /// Rendered error
    pub message: String,
}

/// Score of one example
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    /// Position in the dataset
    pub index: usize,
    /// Example id
    pub example_id: String,
    /// Score in `[0, 1]`; 0 for failed and cancelled examples
    pub score: f64,
    /// Per-field scores reported by the metric
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<BTreeMap<String, f64>>,
    /// Trace, when traces are kept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<Trace>,
    /// Captured error
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RecordError>,
    /// Outcome class
    pub status: RecordStatus,
}

impl ScoreRecord {
    fn failed(
        index: usize,
        example: &Example,
        category: &str,
        message: impl Into<String>,
        trace: Option<Trace>,
    ) -> Self {
        Self {
            index,
            example_id: example.id.clone(),
            score: 0.0,
            breakdown: None,
            trace,
            error: Some(RecordError {
                category: category.to_string(),
                message: message.into(),
            }),
            status: RecordStatus::Failed,
        }
    }

    fn cancelled(index: usize, example: &Example, trace: Option<Trace>) -> Self {
        Self {
            status: RecordStatus::Cancelled,
            ..Self::failed(index, example, "cancelled", "evaluation cancelled", trace)
        }
    }

    /// Whether the metric produced the score
    pub fn is_scored(&self) -> bool {
        self.status == RecordStatus::Scored
    }
}

/// Result of evaluating a pipeline on a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateResult {
    /// Mean score over all examples; failures count as 0
    pub overall_score: f64,
    /// One record per example, in dataset order
    pub per_example: Vec<ScoreRecord>,
    /// Examples that failed
    pub error_count: usize,
    /// Examples stopped by cancellation
    pub cancelled_count: usize,
    /// Wall-clock time of the evaluation
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
}

impl AggregateResult {
    /// Number of examples
    pub fn total(&self) -> usize {
        self.per_example.len()
    }

    /// Records that failed
    pub fn failures(&self) -> impl Iterator<Item = &ScoreRecord> {
        self.per_example
            .iter()
            .filter(|r| r.status == RecordStatus::Failed)
    }

    /// Scored records strictly above `threshold`
    pub fn passing(&self, threshold: f64) -> impl Iterator<Item = &ScoreRecord> {
        self.per_example
            .iter()
            .filter(move |r| r.is_scored() && r.score > threshold)
    }

    /// Whether any example was cancelled
    pub fn was_cancelled(&self) -> bool {
        self.cancelled_count > 0
    }
}

/// Evaluator for running metrics over datasets
#[derive(Debug, Clone)]
pub struct Evaluator {
    recorder: TraceRecorder,
    config: EvalConfig,
}

impl Evaluator {
    /// Create a new evaluator
    pub fn new(recorder: TraceRecorder) -> Self {
        Self {
            recorder,
            config: EvalConfig::default(),
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: EvalConfig) -> Self {
        self.config = config;
        self
    }

    /// The trace recorder
    pub fn recorder(&self) -> &TraceRecorder {
        &self.recorder
    }

    /// The configuration
    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    /// Evaluate `pipeline` on every example of `dataset`, with at most
    /// `concurrency` runs in flight.
    pub async fn evaluate(
        &self,
        pipeline: &dyn Pipeline,
        dataset: &Dataset,
        metric: &dyn Metric,
        concurrency: usize,
    ) -> Result<AggregateResult> {
        if dataset.is_empty() {
            return Err(Error::EmptyDataset);
        }
        if concurrency == 0 {
            return Err(Error::config("concurrency must be positive"));
        }

        let span = info_span!(
            "evaluate",
            pipeline = pipeline.name(),
            metric = metric.name(),
            examples = dataset.len(),
            concurrency
        );
        self.evaluate_inner(pipeline, dataset, metric, concurrency)
            .instrument(span)
            .await
    }

    async fn evaluate_inner(
        &self,
        pipeline: &dyn Pipeline,
        dataset: &Dataset,
        metric: &dyn Metric,
        concurrency: usize,
    ) -> Result<AggregateResult> {
        let started = Instant::now();
        let cancel = self.recorder.cancel_token().clone();
        let mut slots: Vec<Option<ScoreRecord>> = (0..dataset.len()).map(|_| None).collect();

        // Iterate indices: borrowed items make the future not `Send` for callers.
        let runs = futures::stream::iter(0..dataset.len())
            .map(|index| {
                let example = &dataset[index];
                async move { (index, self.run_one(pipeline, index, example, metric).await) }
            })
            .buffer_unordered(concurrency);
        let mut runs = std::pin::pin!(runs);

        let completed = loop {
            tokio::select! {
                next = runs.next() => match next {
                    Some((index, record)) => slots[index] = Some(record),
                    None => break true,
                },
                _ = cancel.cancelled() => break false,
            }
        };

        if !completed {
            warn!(
                drain_timeout_ms = self.config.drain_timeout.as_millis() as u64,
                "evaluation cancelled, draining in-flight examples"
            );
            let drain = async {
                while let Some((index, record)) = runs.next().await {
                    slots[index] = Some(record);
                }
            };
            if tokio::time::timeout(self.config.drain_timeout, drain)
                .await
                .is_err()
            {
                warn!("drain timeout elapsed, abandoning in-flight examples");
            }
        }

        let per_example: Vec<ScoreRecord> = slots
            .into_iter()
            .zip(dataset.iter())
            .enumerate()
            .map(|(index, (slot, example))| {
                slot.unwrap_or_else(|| ScoreRecord::cancelled(index, example, None))
            })
            .collect();

        let error_count = per_example
            .iter()
            .filter(|r| r.status == RecordStatus::Failed)
            .count();
        let cancelled_count = per_example
            .iter()
            .filter(|r| r.status == RecordStatus::Cancelled)
            .count();
        let overall_score =
            per_example.iter().map(|r| r.score).sum::<f64>() / per_example.len() as f64;

        debug!(
            overall_score,
            error_count,
            cancelled_count,
            "evaluation finished"
        );

        Ok(AggregateResult {
            overall_score,
            per_example,
            error_count,
            cancelled_count,
            elapsed: started.elapsed(),
        })
    }

    async fn run_one(
        &self,
        pipeline: &dyn Pipeline,
        index: usize,
        example: &Example,
        metric: &dyn Metric,
    ) -> ScoreRecord {
        if self.recorder.cancel_token().is_cancelled() {
            return ScoreRecord::cancelled(index, example, None);
        }

        let recorded = AssertUnwindSafe(self.recorder.record(pipeline, &example.inputs))
            .catch_unwind()
            .await;
        let Recording { output, trace } = match recorded {
            Ok(recording) => recording,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(example = %example.id, %message, "pipeline panicked");
                return ScoreRecord::failed(index, example, "panic", message, None);
            }
        };

        let actual = match output {
            Ok(actual) => actual,
            Err(e) => {
                let kept = self.config.keep_traces.then_some(trace);
                if e.is_cancelled() {
                    return ScoreRecord::cancelled(index, example, kept);
                }
                debug!(example = %example.id, error = %e, "example failed");
                return ScoreRecord::failed(index, example, e.category(), e.to_string(), kept);
            }
        };

        let scored = std::panic::catch_unwind(AssertUnwindSafe(|| {
            metric.score(&example.expected, &actual, Some(&trace))
        }));
        let kept = self.config.keep_traces.then_some(trace);

        match scored {
            Ok(result) => ScoreRecord {
                index,
                example_id: example.id.clone(),
                score: result.score,
                breakdown: result.breakdown,
                trace: kept,
                error: None,
                status: RecordStatus::Scored,
            },
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(example = %example.id, %message, "metric panicked");
                ScoreRecord::failed(index, example, "metric_panic", message, kept)
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Evaluation framework for Magpie
//!
//! Metrics score a single output; the [`Evaluator`] harness runs a pipeline
//! over a whole dataset with bounded concurrency, failure isolation and
//! cooperative cancellation.

#![warn(missing_docs)]

pub mod evaluator;
pub mod metric;

pub use evaluator::{
    AggregateResult, EvalConfig, Evaluator, RecordError, RecordStatus, ScoreRecord,
};
pub use metric::{metric_fn, ExactMatch, F1Score, FnMetric, Metric, MetricResult, SemanticF1};

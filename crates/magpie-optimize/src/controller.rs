// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Budgeted search over candidate pipelines.
//!
//! ```text
//! Idle -> EvaluatingBaseline -> Generating -> EvaluatingCandidates -> Selecting
//!                                   ^                                     |
//!                                   +------------- (continue) ------------+-> Terminal
//! ```
//!
//! Every comparison uses the validation split. Strategies only ever see the
//! training split.

use crate::budget::{BudgetTracker, StopReason};
use crate::candidate::{Candidate, IdGen, Provenance};
use crate::config::SearchConfig;
use crate::strategy::{ProposeContext, Strategy};
use futures::StreamExt;
use magpie::lm::UsageSnapshot;
use magpie::{
    CallOptions, CancelHandle, CancelToken, Dataset, Error, Lm, Pipeline, QualityGuard, Result,
    TraceRecorder, UsageMeter,
};
use magpie_client::{LmPool, PooledLm};
use magpie_eval::{AggregateResult, EvalConfig, Evaluator, Metric};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchState {
    /// Not started
    Idle,
    /// Scoring the unmodified pipeline
    EvaluatingBaseline,
    /// Waiting on the strategy
    Generating,
    /// Scoring a generation of candidates
    EvaluatingCandidates,
    /// Comparing scores against the best
    Selecting,
    /// Done
    Terminal,
}

/// What happened to one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateReport {
    /// Origin of the candidate
    pub provenance: Provenance,
    /// Validation score, if the evaluation completed
    pub score: Option<f64>,
    /// Demonstrations across all steps
    pub total_demos: usize,
    /// Whether it became the best
    pub accepted: bool,
    /// Why it was discarded without a score
    pub error: Option<String>,
}

/// Result of a search
pub struct SearchOutcome {
    /// Best pipeline found, possibly the baseline
    pub best: Box<dyn Pipeline>,
    /// Provenance of the best pipeline
    pub best_provenance: Provenance,
    /// Validation score of the best pipeline
    pub best_score: f64,
    /// Validation score of the baseline
    pub baseline_score: f64,
    /// Best score after every selection; never decreases
    pub history: Vec<f64>,
    /// Why the search ended
    pub stop_reason: StopReason,
    /// Candidate evaluations performed
    pub trials: usize,
    /// Every evaluated candidate, in proposal order
    pub candidates: Vec<CandidateReport>,
    /// Billable LM usage of the whole search
    pub usage: UsageSnapshot,
    /// Wall-clock time
    pub elapsed: Duration,
}

impl SearchOutcome {
    /// Whether anything beat the baseline
    pub fn improved(&self) -> bool {
        self.best_provenance.parent.is_some()
    }
}

impl fmt::Debug for SearchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchOutcome")
            .field("best", &self.best.name())
            .field("best_provenance", &self.best_provenance)
            .field("best_score", &self.best_score)
            .field("baseline_score", &self.baseline_score)
            .field("history", &self.history)
            .field("stop_reason", &self.stop_reason)
            .field("trials", &self.trials)
            .field("usage", &self.usage)
            .finish()
    }
}

/// Aborts the wrapped task when dropped
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Drives a [`Strategy`] under a budget and keeps the best candidate.
pub struct SearchController {
    config: SearchConfig,
    lm: Arc<dyn Lm>,
    metric: Arc<dyn Metric>,
    cancel: CancelToken,
    options: CallOptions,
    state: watch::Sender<SearchState>,
}

impl SearchController {
    /// Create a controller with the default configuration
    pub fn new(lm: Arc<dyn Lm>, metric: Arc<dyn Metric>) -> Self {
        Self {
            config: SearchConfig::default(),
            lm,
            metric,
            cancel: CancelToken::never(),
            options: CallOptions::default(),
            state: watch::Sender::new(SearchState::Idle),
        }
    }

    /// Set the configuration
    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    /// Observe an external cancellation token
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Per-call overrides for every pipeline run
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    /// Get the configuration
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<SearchState> {
        self.state.subscribe()
    }

    /// Current state
    pub fn state(&self) -> SearchState {
        *self.state.borrow()
    }

    fn transition(&self, next: SearchState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!(from = ?prev, to = ?next, "search state");
        }
    }

    /// Search for a better variant of `pipeline`.
    ///
    /// Fails only on faults detected before the baseline is scored:
    /// invalid configuration, an empty split, or a validation split that
    /// shares an example id with the training split.
    pub async fn search(
        &self,
        pipeline: &dyn Pipeline,
        train: &Dataset,
        validation: &Dataset,
        strategy: &mut dyn Strategy,
    ) -> Result<SearchOutcome> {
        self.config.validate()?;
        if train.is_empty() || validation.is_empty() {
            return Err(Error::EmptyDataset);
        }
        if !train.is_disjoint_from(validation) {
            return Err(Error::config(
                "validation split shares example ids with the training split",
            ));
        }

        let span = info_span!(
            "search",
            pipeline = pipeline.name(),
            strategy = strategy.name(),
            train = train.len(),
            validation = validation.len()
        );
        self.search_inner(pipeline, train, validation, strategy)
            .instrument(span)
            .await
    }

    async fn search_inner(
        &self,
        pipeline: &dyn Pipeline,
        train: &Dataset,
        validation: &Dataset,
        strategy: &mut dyn Strategy,
    ) -> Result<SearchOutcome> {
        let started = Instant::now();
        let internal = CancelHandle::new();
        let meter = Arc::new(UsageMeter::new());
        let _watchdog = self.spawn_watchdog(&internal, meter.clone());

        let evaluator = self.evaluator(&internal, meter.clone());
        let mut budget =
            BudgetTracker::new(self.config.budget.clone(), self.config.cost, meter.clone());
        let ids = IdGen::new();
        let metric = self.metric.as_ref();
        let concurrency = self.config.eval_concurrency;

        self.transition(SearchState::EvaluatingBaseline);
        let baseline = Candidate::baseline(pipeline, &ids);
        let baseline_result = match evaluator
            .evaluate(baseline.pipeline.as_ref(), validation, metric, concurrency)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                self.transition(SearchState::Terminal);
                return Err(e);
            }
        };
        let baseline_score = baseline_result.overall_score;
        info!(baseline_score, "baseline scored");

        let mut best = baseline;
        let mut best_score = baseline_score;
        let mut history = Vec::new();
        let mut reports = Vec::new();
        let mut generation = 0usize;
        let mut empty_streak = 0usize;
        let mut stale = 0usize;

        let stop_reason = loop {
            if internal.is_cancelled() {
                break self.cancel_reason(&budget);
            }
            if let Some(reason) = budget.exhausted() {
                break reason;
            }
            if strategy.max_generations().is_some_and(|max| generation >= max) {
                break StopReason::GenerationLimit;
            }
            generation += 1;

            self.transition(SearchState::Generating);
            let cx = ProposeContext {
                train,
                evaluator: &evaluator,
                metric,
                ids: &ids,
                generation,
                concurrency,
            };
            let mut candidates = match strategy.propose(&cx, &best, budget.remaining()).await {
                Ok(candidates) => candidates,
                Err(e) => {
                    warn!(generation, error = %e, "strategy failed, treating as empty generation");
                    Vec::new()
                }
            };
            if let Some(left) = budget.remaining().trials {
                candidates.truncate(left);
            }

            if candidates.is_empty() {
                empty_streak += 1;
                debug!(generation, empty_streak, "no candidates");
                if empty_streak >= 2 {
                    break StopReason::NoCandidates;
                }
                continue;
            }
            empty_streak = 0;

            self.transition(SearchState::EvaluatingCandidates);
            budget.record_trials(candidates.len());
            let evaluated = self
                .evaluate_candidates(&evaluator, candidates, validation)
                .await;

            self.transition(SearchState::Selecting);
            let mut improved = false;
            for (candidate, result) in evaluated {
                let mut report = CandidateReport {
                    provenance: candidate.provenance.clone(),
                    score: None,
                    total_demos: candidate.total_demos(),
                    accepted: false,
                    error: None,
                };
                match result {
                    Err(e) => {
                        warn!(candidate = %candidate.id(), error = %e, "candidate discarded");
                        report.error = Some(e.to_string());
                    }
                    Ok(result) if result.was_cancelled() => {
                        warn!(candidate = %candidate.id(), "candidate evaluation cancelled, discarded");
                        report.error = Some("evaluation cancelled".to_string());
                    }
                    Ok(result) => {
                        let score = result.overall_score;
                        report.score = Some(score);
                        let better = score > best_score
                            || (score == best_score && report.total_demos < best.total_demos());
                        debug!(
                            candidate = %candidate.id(),
                            strategy = %candidate.provenance.strategy,
                            score,
                            best_score,
                            accepted = better,
                            "candidate scored"
                        );
                        if better {
                            improved |= score > best_score;
                            report.accepted = true;
                            best_score = score;
                            best = candidate;
                        }
                    }
                }
                reports.push(report);
            }
            history.push(best_score);

            if improved {
                stale = 0;
            } else {
                stale += 1;
                if strategy.patience().is_some_and(|patience| stale >= patience) {
                    break StopReason::Patience;
                }
            }
        };

        self.transition(SearchState::Terminal);
        info!(
            stop_reason = %stop_reason,
            best_score,
            baseline_score,
            trials = budget.trials(),
            "search finished"
        );

        Ok(SearchOutcome {
            best_provenance: best.provenance.clone(),
            best: best.pipeline,
            best_score,
            baseline_score,
            history,
            stop_reason,
            trials: budget.trials(),
            candidates: reports,
            usage: meter.snapshot(),
            elapsed: started.elapsed(),
        })
    }

    fn evaluator(&self, internal: &CancelHandle, meter: Arc<UsageMeter>) -> Evaluator {
        let pool = Arc::new(LmPool::new(self.config.max_lm_calls));
        let mut lm = PooledLm::new(self.lm.clone(), pool).with_cancel(internal.token());
        if let Some(timeout) = self.config.call_timeout {
            lm = lm.with_timeout(timeout);
        }
        let recorder = TraceRecorder::new(Arc::new(lm))
            .with_guard(QualityGuard::new(self.config.guard.clone()))
            .with_meter(meter)
            .with_cancel(internal.token())
            .with_options(self.options);
        Evaluator::new(recorder)
            .with_config(EvalConfig::default().with_drain_timeout(self.config.drain_timeout))
    }

    async fn evaluate_candidates(
        &self,
        evaluator: &Evaluator,
        candidates: Vec<Candidate>,
        validation: &Dataset,
    ) -> Vec<(Candidate, Result<AggregateResult>)> {
        let metric = self.metric.as_ref();
        let concurrency = self.config.eval_concurrency;
        futures::stream::iter(candidates)
            .map(|candidate| async move {
                let result = evaluator
                    .evaluate(candidate.pipeline.as_ref(), validation, metric, concurrency)
                    .await;
                (candidate, result)
            })
            .buffered(self.config.candidate_concurrency)
            .collect()
            .await
    }

    /// Cancel `internal` when the caller cancels, the deadline passes or the
    /// metered spend reaches the cost limit. Spend is re-checked on every
    /// recorded call, so a generation cannot run past the limit.
    fn spawn_watchdog(&self, internal: &CancelHandle, meter: Arc<UsageMeter>) -> AbortOnDrop {
        let external = self.cancel.clone();
        let internal = internal.clone();
        let deadline = self.config.budget.max_duration;
        let max_cost = self.config.budget.max_cost;
        let cost_model = self.config.cost;
        AbortOnDrop(tokio::spawn(async move {
            let expired = async {
                match deadline {
                    Some(limit) => tokio::time::sleep(limit).await,
                    None => std::future::pending::<()>().await,
                }
            };
            let overspent = async {
                let Some(max) = max_cost else {
                    return std::future::pending::<()>().await;
                };
                let mut updates = meter.subscribe();
                while cost_model.cost(&meter.snapshot()) < max {
                    if updates.changed().await.is_err() {
                        return std::future::pending::<()>().await;
                    }
                }
            };
            tokio::select! {
                _ = external.cancelled() => warn!("search cancelled"),
                _ = expired => warn!("search deadline reached"),
                _ = overspent => warn!("search cost limit reached"),
            }
            internal.cancel();
        }))
    }

    fn cancel_reason(&self, budget: &BudgetTracker) -> StopReason {
        if self.cancel.is_cancelled() {
            StopReason::Cancelled
        } else if budget.cost_exhausted() {
            StopReason::CostLimit
        } else {
            StopReason::Deadline
        }
    }
}

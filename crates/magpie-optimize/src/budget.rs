// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Search budgets: trials, wall-clock and estimated cost

use crate::strategy::RemainingBudget;
use magpie::lm::{UsageMeter, UsageSnapshot};
use magpie::types::option_duration_ms;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Limits for one search. Unset limits do not apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Maximum candidate evaluations on the validation split
    pub max_trials: Option<usize>,
    /// Maximum wall-clock time, in milliseconds when serialized
    #[serde(with = "option_duration_ms", skip_serializing_if = "Option::is_none")]
    pub max_duration: Option<Duration>,
    /// Maximum estimated cost, in [`CostModel`] units
    pub max_cost: Option<f64>,
}

impl BudgetConfig {
    /// Set max trials.
    pub fn with_max_trials(mut self, n: usize) -> Self {
        self.max_trials = Some(n);
        self
    }

    /// Set max wall-clock time.
    pub fn with_max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }

    /// Set max estimated cost.
    pub fn with_max_cost(mut self, cost: f64) -> Self {
        self.max_cost = Some(cost);
        self
    }
}

/// Linear price model for estimating spend from usage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostModel {
    /// Cost per billable call
    pub per_call: f64,
    /// Cost per 1000 prompt tokens
    pub per_1k_prompt_tokens: f64,
    /// Cost per 1000 completion tokens
    pub per_1k_completion_tokens: f64,
}

impl Default for CostModel {
    fn default() -> Self {
        Self {
            per_call: 1.0,
            per_1k_prompt_tokens: 0.0,
            per_1k_completion_tokens: 0.0,
        }
    }
}

impl CostModel {
    /// Estimated cost of `usage`
    pub fn cost(&self, usage: &UsageSnapshot) -> f64 {
        self.per_call * usage.calls as f64
            + self.per_1k_prompt_tokens * usage.prompt_tokens as f64 / 1000.0
            + self.per_1k_completion_tokens * usage.completion_tokens as f64 / 1000.0
    }
}

/// Why a search stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Trial limit reached
    MaxTrials,
    /// Wall-clock limit reached
    Deadline,
    /// Estimated cost limit reached
    CostLimit,
    /// Strategy generation limit reached
    GenerationLimit,
    /// Too many generations without improvement
    Patience,
    /// Strategy produced nothing twice in a row
    NoCandidates,
    /// Cancelled by the caller
    Cancelled,
}

impl StopReason {
    /// Stable name for logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaxTrials => "max_trials",
            Self::Deadline => "deadline",
            Self::CostLimit => "cost_limit",
            Self::GenerationLimit => "generation_limit",
            Self::Patience => "patience",
            Self::NoCandidates => "no_candidates",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tracks spend against a [`BudgetConfig`]
#[derive(Debug)]
pub struct BudgetTracker {
    config: BudgetConfig,
    cost_model: CostModel,
    meter: Arc<UsageMeter>,
    started: Instant,
    trials: usize,
}

impl BudgetTracker {
    /// Start tracking now
    pub fn new(config: BudgetConfig, cost_model: CostModel, meter: Arc<UsageMeter>) -> Self {
        Self {
            config,
            cost_model,
            meter,
            started: Instant::now(),
            trials: 0,
        }
    }

    /// Count candidate evaluations
    pub fn record_trials(&mut self, n: usize) {
        self.trials += n;
    }

    /// Candidate evaluations so far
    pub fn trials(&self) -> usize {
        self.trials
    }

    /// Estimated spend so far
    pub fn spent(&self) -> f64 {
        self.cost_model.cost(&self.meter.snapshot())
    }

    /// Time since tracking started
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Time left before the wall-clock limit
    pub fn time_left(&self) -> Option<Duration> {
        self.config
            .max_duration
            .map(|limit| limit.saturating_sub(self.elapsed()))
    }

    /// The first exhausted limit, if any
    pub fn exhausted(&self) -> Option<StopReason> {
        if self.config.max_trials.is_some_and(|max| self.trials >= max) {
            return Some(StopReason::MaxTrials);
        }
        if self.time_left().is_some_and(|left| left.is_zero()) {
            return Some(StopReason::Deadline);
        }
        if self.cost_exhausted() {
            return Some(StopReason::CostLimit);
        }
        None
    }

    /// Whether the estimated spend reached the cost limit
    pub fn cost_exhausted(&self) -> bool {
        self.config.max_cost.is_some_and(|max| self.spent() >= max)
    }

    /// What strategies may still spend
    pub fn remaining(&self) -> RemainingBudget {
        RemainingBudget {
            trials: self
                .config
                .max_trials
                .map(|max| max.saturating_sub(self.trials)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use magpie::{values, LmOutput, Usage};

    #[test]
    fn test_cost_model() {
        let model = CostModel {
            per_call: 0.5,
            per_1k_prompt_tokens: 1.0,
            per_1k_completion_tokens: 2.0,
        };
        let usage = UsageSnapshot {
            calls: 2,
            prompt_tokens: 1000,
            completion_tokens: 500,
        };
        assert!((model.cost(&usage) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_trial_budget() {
        let mut tracker = BudgetTracker::new(
            BudgetConfig::default().with_max_trials(3),
            CostModel::default(),
            Arc::new(UsageMeter::new()),
        );
        assert_eq!(tracker.remaining().trials, Some(3));
        assert_eq!(tracker.exhausted(), None);

        tracker.record_trials(3);
        assert_eq!(tracker.remaining().trials, Some(0));
        assert_eq!(tracker.exhausted(), Some(StopReason::MaxTrials));
    }

    #[test]
    fn test_cost_budget() {
        let meter = Arc::new(UsageMeter::new());
        let tracker = BudgetTracker::new(
            BudgetConfig::default().with_max_cost(2.0),
            CostModel::default(),
            meter.clone(),
        );
        let output = LmOutput::new(values([("a", "b")])).with_usage(Usage::new(1, 1));
        meter.record(&output);
        assert_eq!(tracker.exhausted(), None);
        meter.record(&output);
        assert_eq!(tracker.exhausted(), Some(StopReason::CostLimit));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_budget() {
        let tracker = BudgetTracker::new(
            BudgetConfig::default().with_max_duration(Duration::from_secs(1)),
            CostModel::default(),
            Arc::new(UsageMeter::new()),
        );
        assert_eq!(tracker.exhausted(), None);
        tokio::time::sleep(Duration::from_millis(1200)).await;
        assert_eq!(tracker.time_left(), Some(Duration::ZERO));
        assert_eq!(tracker.exhausted(), Some(StopReason::Deadline));
    }

    #[test]
    fn test_budget_config_serde() {
        let config: BudgetConfig =
            serde_json::from_str(r#"{"max_trials": 10, "max_duration": 1500}"#).unwrap();
        assert_eq!(config.max_trials, Some(10));
        assert_eq!(config.max_duration, Some(Duration::from_millis(1500)));
        assert_eq!(config.max_cost, None);
    }
}

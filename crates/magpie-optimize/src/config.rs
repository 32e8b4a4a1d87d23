// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Search configuration, loadable from YAML or JSON.
//!
//! ```yaml
//! eval_concurrency: 8
//! candidate_concurrency: 2
//! max_lm_calls: 16
//! budget:
//!   max_trials: 20
//!   max_duration: 600000
//! ```

use crate::budget::{BudgetConfig, CostModel};
use magpie::types::{duration_ms, option_duration_ms};
use magpie::{Error, GuardPolicy, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`SearchController`](crate::SearchController)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Limits
    pub budget: BudgetConfig,
    /// Price model for the cost limit
    pub cost: CostModel,
    /// Pipeline runs in flight per evaluation
    pub eval_concurrency: usize,
    /// Candidates evaluated at once
    pub candidate_concurrency: usize,
    /// Global cap on concurrent LM calls
    pub max_lm_calls: usize,
    /// Per-call LM timeout
    #[serde(with = "option_duration_ms", skip_serializing_if = "Option::is_none")]
    pub call_timeout: Option<Duration>,
    /// How long in-flight examples may run after cancellation
    #[serde(with = "duration_ms")]
    pub drain_timeout: Duration,
    /// Retry policy for step calls
    pub guard: GuardPolicy,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            budget: BudgetConfig::default(),
            cost: CostModel::default(),
            eval_concurrency: 4,
            candidate_concurrency: 2,
            max_lm_calls: 8,
            call_timeout: None,
            drain_timeout: Duration::from_secs(5),
            guard: GuardPolicy::default(),
        }
    }
}

impl SearchConfig {
    /// Parse from YAML
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| Error::config(format!("invalid search config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Parse from JSON
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::config(format!("invalid search config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.eval_concurrency == 0 {
            return Err(Error::config("eval_concurrency must be positive"));
        }
        if self.candidate_concurrency == 0 {
            return Err(Error::config("candidate_concurrency must be positive"));
        }
        if self.max_lm_calls == 0 {
            return Err(Error::config("max_lm_calls must be positive"));
        }
        if self.guard.max_attempts == 0 {
            return Err(Error::config("guard.max_attempts must be positive"));
        }
        if !self.guard.backoff_factor.is_finite() || self.guard.backoff_factor < 0.0 {
            return Err(Error::config("guard.backoff_factor must be a non-negative number"));
        }
        if self.budget.max_trials == Some(0) {
            return Err(Error::config("budget.max_trials must be positive when set"));
        }
        if let Some(cost) = self.budget.max_cost {
            if !cost.is_finite() || cost < 0.0 {
                return Err(Error::config("budget.max_cost must be a non-negative number"));
            }
        }
        Ok(())
    }

    /// Set the budget.
    pub fn with_budget(mut self, budget: BudgetConfig) -> Self {
        self.budget = budget;
        self
    }

    /// Set the cost model.
    pub fn with_cost(mut self, cost: CostModel) -> Self {
        self.cost = cost;
        self
    }

    /// Set evaluation concurrency.
    pub fn with_eval_concurrency(mut self, n: usize) -> Self {
        self.eval_concurrency = n;
        self
    }

    /// Set candidate concurrency.
    pub fn with_candidate_concurrency(mut self, n: usize) -> Self {
        self.candidate_concurrency = n;
        self
    }

    /// Set the global LM call cap.
    pub fn with_max_lm_calls(mut self, n: usize) -> Self {
        self.max_lm_calls = n;
        self
    }

    /// Set the per-call timeout.
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Set the drain timeout.
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn with_guard(mut self, guard: GuardPolicy) -> Self {
        self.guard = guard;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_yaml() {
        let config = SearchConfig::from_yaml_str(
            "eval_concurrency: 8\nmax_lm_calls: 16\nbudget:\n  max_trials: 20\n  max_duration: 60000\nguard:\n  max_attempts: 2\n",
        )
        .unwrap();
        assert_eq!(config.eval_concurrency, 8);
        assert_eq!(config.candidate_concurrency, 2);
        assert_eq!(config.max_lm_calls, 16);
        assert_eq!(config.budget.max_trials, Some(20));
        assert_eq!(config.budget.max_duration, Some(Duration::from_secs(60)));
        assert_eq!(config.guard.max_attempts, 2);
    }

    #[test]
    fn test_from_json_defaults() {
        let config = SearchConfig::from_json_str("{}").unwrap();
        assert_eq!(config, SearchConfig::default());
    }

    #[test]
    fn test_validate_rejects() {
        assert!(SearchConfig::from_json_str(r#"{"eval_concurrency": 0}"#).is_err());
        assert!(SearchConfig::from_yaml_str("budget:\n  max_trials: 0\n").is_err());
        assert!(SearchConfig::from_yaml_str("budget:\n  max_cost: -1.0\n").is_err());
        let err = SearchConfig::from_yaml_str("eval_concurrency: [").unwrap_err();
        assert!(err.is_harness_fault());
    }

    #[test]
    fn test_validate_rejects_bad_backoff_factor() {
        let err = SearchConfig::from_yaml_str("guard:\n  backoff_factor: -1\n").unwrap_err();
        assert!(err.is_harness_fault());
        assert!(err.to_string().contains("backoff_factor"));
        assert!(SearchConfig::from_yaml_str("guard:\n  backoff_factor: .nan\n").is_err());
        assert!(SearchConfig::from_yaml_str("guard:\n  backoff_factor: 1.5\n").is_ok());
    }
}

// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! LabeledFewShot - Direct Labeled Example Selection
//!
//! Selects demonstrations directly from labeled examples without running
//! the pipeline.
//!
//! ## Algorithm
//!
//! 1. Order the training examples (as given, reversed, or seeded shuffle)
//! 2. For each step, take the first `k` examples that fit its contract
//! 3. Emit one candidate, then stop

use super::demo_for_step;
use crate::candidate::Candidate;
use crate::rng::Rng;
use crate::strategy::{ProposeContext, RemainingBudget, Strategy};
use async_trait::async_trait;
use magpie::Result;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Selection strategy for labeled examples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    /// Take first k examples
    #[default]
    First,
    /// Take last k examples
    Last,
    /// Seeded random sample of k examples
    Random,
}

/// LabeledFewShot configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabeledConfig {
    /// Number of examples per step
    pub k: usize,
    /// Selection strategy
    pub selection: Selection,
    /// Random seed (for Random selection)
    pub seed: u64,
}

impl Default for LabeledConfig {
    fn default() -> Self {
        Self {
            k: 16,
            selection: Selection::First,
            seed: 42,
        }
    }
}

impl LabeledConfig {
    /// Set k (number of examples).
    pub fn with_k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    /// Set selection strategy.
    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    /// Set random seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// LabeledFewShot strategy. Proposes exactly one candidate.
#[derive(Debug, Clone)]
pub struct LabeledFewShot {
    config: LabeledConfig,
    done: bool,
}

impl LabeledFewShot {
    /// Create a new strategy.
    pub fn new(config: LabeledConfig) -> Self {
        Self {
            config,
            done: false,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &LabeledConfig {
        &self.config
    }

    /// Example indices in selection order.
    pub fn order(&self, len: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..len).collect();
        match self.config.selection {
            Selection::First => {}
            Selection::Last => {
                // Last k in their original order: rotate so the tail leads.
                let start = len.saturating_sub(self.config.k);
                order.rotate_left(start);
            }
            Selection::Random => Rng::new(self.config.seed).shuffle(&mut order),
        }
        order
    }
}

impl Default for LabeledFewShot {
    fn default() -> Self {
        Self::new(LabeledConfig::default())
    }
}

#[async_trait]
impl Strategy for LabeledFewShot {
    async fn propose(
        &mut self,
        cx: &ProposeContext<'_>,
        current: &Candidate,
        budget: RemainingBudget,
    ) -> Result<Vec<Candidate>> {
        if self.done || budget.cap(1) == 0 {
            return Ok(Vec::new());
        }
        self.done = true;

        let order = self.order(cx.train.len());
        let mut candidate = Candidate::derive(
            current,
            cx.ids,
            self.name(),
            cx.generation,
            format!("k={} selection={:?}", self.config.k, self.config.selection),
        );

        let mut any = false;
        for step in candidate.pipeline.steps_mut() {
            let demos: Vec<_> = order
                .iter()
                .filter_map(|&i| demo_for_step(step, &cx.train[i]))
                .take(self.config.k)
                .collect();
            debug!(step = step.name(), demos = demos.len(), "labeled demos selected");
            any |= !demos.is_empty();
            step.demos = demos.into_iter().collect();
        }

        if !any {
            return Ok(Vec::new());
        }
        Ok(vec![candidate])
    }

    fn name(&self) -> &'static str {
        "labeled"
    }

    fn max_generations(&self) -> Option<usize> {
        Some(1)
    }
}

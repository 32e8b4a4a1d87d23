// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! BootstrapFewShot - demonstrations from the pipeline's own successes
//!
//! ## Algorithm
//!
//! 1. Run the current pipeline over the training split, keeping traces
//! 2. Keep examples whose score strictly exceeds the threshold
//! 3. Turn every successful step call of a kept trace into a demonstration
//! 4. De-duplicate per step by serialized inputs
//! 5. Sample up to `max_demos` per step without replacement (seeded)
//!
//! With `num_candidates > 1` every sample becomes its own candidate, which
//! turns the strategy into random search over demonstration sets.

use crate::candidate::Candidate;
use crate::rng::Rng;
use crate::strategy::{ProposeContext, RemainingBudget, Strategy};
use async_trait::async_trait;
use magpie::{Demonstration, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};

/// BootstrapFewShot configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BootstrapConfig {
    /// Maximum demonstrations per step
    pub max_demos: usize,
    /// Scores must be strictly above this to be harvested
    pub threshold: f64,
    /// Candidates per generation (more than one is random search)
    pub num_candidates: usize,
    /// Number of bootstrap rounds
    pub rounds: usize,
    /// Random seed
    pub seed: u64,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            max_demos: 4,
            threshold: 0.5,
            num_candidates: 1,
            rounds: 1,
            seed: 42,
        }
    }
}

impl BootstrapConfig {
    /// Set maximum number of demonstrations.
    pub fn with_max_demos(mut self, n: usize) -> Self {
        self.max_demos = n;
        self
    }

    /// Set metric threshold.
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    /// Set candidates per generation.
    pub fn with_num_candidates(mut self, n: usize) -> Self {
        self.num_candidates = n;
        self
    }

    /// Set number of rounds.
    pub fn with_rounds(mut self, n: usize) -> Self {
        self.rounds = n;
        self
    }

    /// Set seed.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// BootstrapFewShot strategy.
#[derive(Debug, Clone, Default)]
pub struct BootstrapFewShot {
    config: BootstrapConfig,
    pool: BTreeMap<String, Vec<Demonstration>>,
    round: usize,
}

impl BootstrapFewShot {
    /// Create a new strategy.
    pub fn new(config: BootstrapConfig) -> Self {
        Self {
            config,
            pool: BTreeMap::new(),
            round: 0,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// De-duplicated demonstrations harvested in the latest round, per step
    pub fn demo_pool(&self) -> &BTreeMap<String, Vec<Demonstration>> {
        &self.pool
    }

    /// Harvest the demonstration pool for `current` from the training split.
    pub async fn bootstrap(
        &mut self,
        cx: &ProposeContext<'_>,
        current: &Candidate,
    ) -> Result<&BTreeMap<String, Vec<Demonstration>>> {
        let result = cx.evaluate_train(current.pipeline.as_ref()).await?;

        let mut pool: BTreeMap<String, Vec<Demonstration>> = BTreeMap::new();
        let mut seen: HashSet<(String, String)> = HashSet::new();
        let mut accepted = 0usize;

        for record in &result.per_example {
            if !record.is_scored() || record.score <= self.config.threshold {
                continue;
            }
            let Some(trace) = &record.trace else { continue };
            accepted += 1;

            for event in trace.iter() {
                let Some(outputs) = event.outputs() else { continue };
                let demo = Demonstration::new(event.inputs.clone(), outputs.clone());
                if seen.insert((event.step.clone(), demo.input_key())) {
                    pool.entry(event.step.clone()).or_default().push(demo);
                }
            }
        }

        info!(
            accepted,
            examples = result.total(),
            demos = pool.values().map(Vec::len).sum::<usize>(),
            "bootstrap harvested demonstrations"
        );
        self.pool = pool;
        Ok(&self.pool)
    }
}

#[async_trait]
impl Strategy for BootstrapFewShot {
    async fn propose(
        &mut self,
        cx: &ProposeContext<'_>,
        current: &Candidate,
        budget: RemainingBudget,
    ) -> Result<Vec<Candidate>> {
        let wanted = budget.cap(self.config.num_candidates.max(1));
        if self.round >= self.config.rounds || wanted == 0 {
            return Ok(Vec::new());
        }
        self.round += 1;

        self.bootstrap(cx, current).await?;
        if self.pool.values().all(Vec::is_empty) {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::with_capacity(wanted);
        for c in 0..wanted {
            let seed = self
                .config
                .seed
                .wrapping_add(self.round as u64 * 1_000)
                .wrapping_add(c as u64);
            let mut rng = Rng::new(seed);
            let mut candidate = Candidate::derive(
                current,
                cx.ids,
                self.name(),
                cx.generation,
                format!("round={} sample={} seed={}", self.round, c, seed),
            );

            for step in candidate.pipeline.steps_mut() {
                let Some(pool) = self.pool.get(step.name()) else { continue };
                let picked = rng.sample_indices(pool.len(), self.config.max_demos);
                step.demos = picked.into_iter().map(|i| pool[i].clone()).collect();
                debug!(step = step.name(), demos = step.demos.len(), "bootstrap sample");
            }
            candidates.push(candidate);
        }
        Ok(candidates)
    }

    fn name(&self) -> &'static str {
        "bootstrap"
    }

    fn max_generations(&self) -> Option<usize> {
        Some(self.config.rounds)
    }
}

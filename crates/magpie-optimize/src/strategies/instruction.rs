// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! InstructionSearch - instruction rewrites with demonstrations held fixed
//!
//! ## Algorithm
//!
//! 1. Record a few training traces of the current best
//! 2. Ask the proposer for `breadth` alternative instructions per step
//! 3. Drop proposals equal to the current or any earlier instruction
//! 4. Emit one candidate per surviving proposal
//!
//! Repeated by the controller this is a local search around the best.

use crate::candidate::Candidate;
use crate::capability::{InstructionProposer, ProposalRequest};
use crate::strategy::{ProposeContext, RemainingBudget, Strategy};
use async_trait::async_trait;
use magpie::Result;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// InstructionSearch configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InstructionConfig {
    /// Proposals requested per step per generation
    pub breadth: usize,
    /// Number of generations
    pub depth: usize,
    /// Training traces shown to the proposer
    pub sample_traces: usize,
}

impl Default for InstructionConfig {
    fn default() -> Self {
        Self {
            breadth: 5,
            depth: 3,
            sample_traces: 2,
        }
    }
}

impl InstructionConfig {
    /// Set breadth.
    pub fn with_breadth(mut self, n: usize) -> Self {
        self.breadth = n;
        self
    }

    /// Set depth.
    pub fn with_depth(mut self, n: usize) -> Self {
        self.depth = n;
        self
    }

    /// Set the number of sample traces.
    pub fn with_sample_traces(mut self, n: usize) -> Self {
        self.sample_traces = n;
        self
    }
}

/// InstructionSearch strategy.
pub struct InstructionSearch {
    config: InstructionConfig,
    proposer: Arc<dyn InstructionProposer>,
    seen: HashMap<String, HashSet<String>>,
}

impl InstructionSearch {
    /// Create a new strategy around a proposer.
    pub fn new(config: InstructionConfig, proposer: Arc<dyn InstructionProposer>) -> Self {
        Self {
            config,
            proposer,
            seen: HashMap::new(),
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &InstructionConfig {
        &self.config
    }

    /// Instructions already proposed or in use for `step`
    pub fn seen(&self, step: &str) -> usize {
        self.seen.get(step).map_or(0, HashSet::len)
    }
}

#[async_trait]
impl Strategy for InstructionSearch {
    async fn propose(
        &mut self,
        cx: &ProposeContext<'_>,
        current: &Candidate,
        budget: RemainingBudget,
    ) -> Result<Vec<Candidate>> {
        let traces = if self.config.sample_traces > 0 {
            cx.sample_traces(current.pipeline.as_ref(), self.config.sample_traces)
                .await
        } else {
            Vec::new()
        };

        let limit = budget.trials.unwrap_or(usize::MAX);
        let mut candidates = Vec::new();
        let steps: Vec<_> = current
            .pipeline
            .steps()
            .into_iter()
            .map(|s| {
                (
                    s.name().to_string(),
                    s.contract().clone(),
                    s.effective_instruction().to_string(),
                )
            })
            .collect();

        for (step_name, contract, instruction) in steps {
            if candidates.len() >= limit || cx.is_cancelled() {
                break;
            }

            let seen = self.seen.entry(step_name.clone()).or_default();
            seen.insert(instruction.clone());

            let proposals = match self
                .proposer
                .propose(ProposalRequest {
                    contract: &contract,
                    current_instruction: &instruction,
                    sample_traces: &traces,
                    n: self.config.breadth,
                    feedback: None,
                    meter: cx.meter(),
                })
                .await
            {
                Ok(proposals) => proposals,
                Err(e) => {
                    warn!(step = %step_name, error = %e, "instruction proposal failed");
                    continue;
                }
            };

            let seen = self.seen.entry(step_name.clone()).or_default();
            for proposal in proposals {
                if candidates.len() >= limit {
                    break;
                }
                let proposal = proposal.trim().to_string();
                if proposal.is_empty() || !seen.insert(proposal.clone()) {
                    debug!(step = %step_name, "duplicate proposal discarded");
                    continue;
                }

                let mut candidate = Candidate::derive(
                    current,
                    cx.ids,
                    "instruction",
                    cx.generation,
                    format!("step={step_name}"),
                );
                if let Some(step) = candidate.pipeline.step_mut(&step_name) {
                    step.instruction = Some(proposal);
                }
                candidates.push(candidate);
            }
        }

        Ok(candidates)
    }

    fn name(&self) -> &'static str {
        "instruction"
    }

    fn max_generations(&self) -> Option<usize> {
        Some(self.config.depth)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = InstructionConfig::default().with_breadth(2).with_depth(4);
        assert_eq!(config.breadth, 2);
        assert_eq!(config.depth, 4);
        assert_eq!(config.sample_traces, 2);
    }
}

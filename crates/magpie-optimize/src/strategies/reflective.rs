// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Reflective - critique failures, then revise the instruction
//!
//! Each generation evaluates the current best on the training split, hands
//! the failing examples to a [`Critic`], and asks the proposer for one
//! revised instruction per step that addresses the critique. Demonstrations
//! can be refreshed from passing traces at the same time.

use crate::candidate::Candidate;
use crate::capability::{Critic, FailureCase, InstructionProposer, ProposalRequest};
use crate::strategy::{ProposeContext, RemainingBudget, Strategy};
use async_trait::async_trait;
use magpie::{Demonstration, Result, Trace};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Reflective configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReflectiveConfig {
    /// Maximum iterations
    pub num_iterations: usize,
    /// Consecutive non-improving iterations before stopping
    pub patience: usize,
    /// Examples scoring below this are failures
    pub pass_threshold: f64,
    /// Failures handed to the critic
    pub max_failures: usize,
    /// Replace demonstrations with ones taken from passing traces
    pub refresh_demos: bool,
    /// Demonstrations per step when refreshing
    pub max_demos: usize,
}

impl Default for ReflectiveConfig {
    fn default() -> Self {
        Self {
            num_iterations: 5,
            patience: 2,
            pass_threshold: 0.5,
            max_failures: 5,
            refresh_demos: false,
            max_demos: 4,
        }
    }
}

impl ReflectiveConfig {
    /// Set max iterations.
    pub fn with_num_iterations(mut self, n: usize) -> Self {
        self.num_iterations = n;
        self
    }

    /// Set patience.
    pub fn with_patience(mut self, n: usize) -> Self {
        self.patience = n;
        self
    }

    /// Set the pass threshold.
    pub fn with_pass_threshold(mut self, threshold: f64) -> Self {
        self.pass_threshold = threshold;
        self
    }

    /// Set failures per critique.
    pub fn with_max_failures(mut self, n: usize) -> Self {
        self.max_failures = n;
        self
    }

    /// Refresh demonstrations from passing traces.
    pub fn with_refresh_demos(mut self, refresh: bool) -> Self {
        self.refresh_demos = refresh;
        self
    }
}

/// Reflective strategy.
pub struct Reflective {
    config: ReflectiveConfig,
    proposer: Arc<dyn InstructionProposer>,
    critic: Arc<dyn Critic>,
    last_feedback: Option<String>,
}

impl Reflective {
    /// Create a new strategy.
    pub fn new(
        config: ReflectiveConfig,
        proposer: Arc<dyn InstructionProposer>,
        critic: Arc<dyn Critic>,
    ) -> Self {
        Self {
            config,
            proposer,
            critic,
            last_feedback: None,
        }
    }

    /// Get the configuration.
    pub fn config(&self) -> &ReflectiveConfig {
        &self.config
    }

    /// Critique produced in the latest iteration
    pub fn last_feedback(&self) -> Option<&str> {
        self.last_feedback.as_deref()
    }
}

fn demos_from_passing(traces: &[&Trace], max_demos: usize) -> BTreeMap<String, Vec<Demonstration>> {
    let mut pool: BTreeMap<String, Vec<Demonstration>> = BTreeMap::new();
    let mut seen = HashSet::new();
    for trace in traces {
        for event in trace.iter() {
            let Some(outputs) = event.outputs() else { continue };
            let demo = Demonstration::new(event.inputs.clone(), outputs.clone());
            let demos = pool.entry(event.step.clone()).or_default();
            if demos.len() < max_demos && seen.insert((event.step.clone(), demo.input_key())) {
                demos.push(demo);
            }
        }
    }
    pool
}

#[async_trait]
impl Strategy for Reflective {
    async fn propose(
        &mut self,
        cx: &ProposeContext<'_>,
        current: &Candidate,
        budget: RemainingBudget,
    ) -> Result<Vec<Candidate>> {
        if budget.cap(1) == 0 {
            return Ok(Vec::new());
        }

        let result = cx.evaluate_train(current.pipeline.as_ref()).await?;
        if result.was_cancelled() {
            return Ok(Vec::new());
        }

        let failures: Vec<FailureCase> = result
            .per_example
            .iter()
            .filter(|r| r.score < self.config.pass_threshold)
            .take(self.config.max_failures)
            .map(|r| {
                let example = &cx.train[r.index];
                FailureCase {
                    example_id: r.example_id.clone(),
                    inputs: example.inputs.clone(),
                    expected: example.expected.clone(),
                    score: r.score,
                    error: r.error.as_ref().map(|e| e.message.clone()),
                    trace: r.trace.clone(),
                }
            })
            .collect();

        if failures.is_empty() {
            info!("no failing training examples, nothing to reflect on");
            return Ok(Vec::new());
        }

        let feedback = self.critic.critique(&failures, cx.meter()).await?;
        debug!(failures = failures.len(), feedback = %feedback, "critique received");
        self.last_feedback = Some(feedback.clone());

        let passing: Vec<&Trace> = result
            .per_example
            .iter()
            .filter(|r| r.is_scored() && r.score >= self.config.pass_threshold)
            .filter_map(|r| r.trace.as_ref())
            .collect();
        let sample: Vec<Trace> = failures.iter().filter_map(|f| f.trace.clone()).collect();

        let mut candidate = Candidate::derive(
            current,
            cx.ids,
            self.name(),
            cx.generation,
            format!("failures={}", failures.len()),
        );
        let mut changed = false;

        let refreshed = if self.config.refresh_demos {
            demos_from_passing(&passing, self.config.max_demos)
        } else {
            BTreeMap::new()
        };

        for step in candidate.pipeline.steps_mut() {
            let current_instruction = step.effective_instruction().to_string();
            let proposals = self
                .proposer
                .propose(ProposalRequest {
                    contract: step.contract(),
                    current_instruction: &current_instruction,
                    sample_traces: &sample,
                    n: 1,
                    feedback: Some(&feedback),
                    meter: cx.meter(),
                })
                .await?;

            if let Some(revised) = proposals
                .into_iter()
                .map(|p| p.trim().to_string())
                .find(|p| !p.is_empty() && *p != current_instruction)
            {
                step.instruction = Some(revised);
                changed = true;
            }

            if let Some(demos) = refreshed.get(step.name()) {
                if !demos.is_empty() {
                    step.demos = demos.iter().cloned().collect();
                    changed = true;
                }
            }
        }

        if !changed {
            return Ok(Vec::new());
        }
        Ok(vec![candidate])
    }

    fn name(&self) -> &'static str {
        "reflective"
    }

    fn max_generations(&self) -> Option<usize> {
        Some(self.config.num_iterations)
    }

    fn patience(&self) -> Option<usize> {
        Some(self.config.patience)
    }
}

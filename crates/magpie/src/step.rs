// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Steps: one LM call bound to a contract

use crate::contract::Contract;
use crate::demo::Demonstration;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::sync::Arc;

/// Name of the extra output requested by [`StepStrategy::Reasoned`]
pub const REASONING_FIELD: &str = "reasoning";

/// How a step asks the LM for its outputs
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum StepStrategy {
    /// Produce the outputs directly
    #[default]
    Direct,
    /// Produce a `reasoning` field before the outputs
    Reasoned,
    /// Produce the outputs with access to the named tools
    ToolUsing {
        /// Tool names offered to the LM
        tools: Vec<String>,
    },
}

impl StepStrategy {
    /// Whether an extra reasoning output is requested
    #[inline]
    pub fn wants_reasoning(&self) -> bool {
        matches!(self, Self::Reasoned)
    }
}

/// Demonstration storage. Most steps carry a handful.
pub type Demos = SmallVec<[Demonstration; 4]>;

/// A named LM step: contract, strategy and the two tunable knobs
/// (instruction override and demonstrations).
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    name: String,
    contract: Arc<Contract>,
    strategy: StepStrategy,
    /// Instruction overriding the contract's base instruction
    pub instruction: Option<String>,
    /// Ordered demonstrations
    pub demos: Demos,
}

impl Step {
    /// Create a direct step
    pub fn new(name: impl Into<String>, contract: Arc<Contract>) -> Self {
        Self {
            name: name.into(),
            contract,
            strategy: StepStrategy::Direct,
            instruction: None,
            demos: SmallVec::new(),
        }
    }

    /// Set the strategy
    pub fn with_strategy(mut self, strategy: StepStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the instruction override
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = Some(instruction.into());
        self
    }

    /// Set demonstrations
    pub fn with_demos(mut self, demos: impl IntoIterator<Item = Demonstration>) -> Self {
        self.demos = demos.into_iter().collect();
        self
    }

    /// Step name, unique within its pipeline
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The step's contract
    pub fn contract(&self) -> &Arc<Contract> {
        &self.contract
    }

    /// The step's strategy
    pub fn strategy(&self) -> &StepStrategy {
        &self.strategy
    }

    /// Instruction actually sent: the override, or the contract's base text.
    pub fn effective_instruction(&self) -> &str {
        self.instruction
            .as_deref()
            .unwrap_or_else(|| self.contract.instructions())
    }
}

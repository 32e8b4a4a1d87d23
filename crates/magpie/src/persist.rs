// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Saving and restoring the tuned state of a pipeline.
//!
//! Only what optimizers change is stored: each step's instruction override
//! and demonstrations. Contracts and glue logic stay in code.

use crate::demo::Demonstration;
use crate::error::{Error, Result};
use crate::pipeline::Pipeline;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Current snapshot format
pub const SCHEMA_VERSION: u32 = 1;

/// Tuned state of one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepState {
    /// Step name
    pub name: String,
    /// Instruction override
    #[serde(default)]
    pub instruction: Option<String>,
    /// Demonstrations in order
    #[serde(default)]
    pub demos: Vec<Demonstration>,
}

/// Tuned state of a whole pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramState {
    /// Snapshot format version
    pub schema_version: u32,
    /// Per-step state in declaration order
    pub steps: Vec<StepState>,
}

impl ProgramState {
    /// Capture the tuned state of `pipeline`
    pub fn capture(pipeline: &dyn Pipeline) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            steps: pipeline
                .steps()
                .into_iter()
                .map(|s| StepState {
                    name: s.name().to_string(),
                    instruction: s.instruction.clone(),
                    demos: s.demos.to_vec(),
                })
                .collect(),
        }
    }

    /// Write this state into `pipeline`.
    ///
    /// Every stored step must exist in the pipeline; nothing is modified if
    /// one is missing.
    pub fn apply(&self, pipeline: &mut dyn Pipeline) -> Result<()> {
        self.check_version()?;
        for state in &self.steps {
            if pipeline.step(&state.name).is_none() {
                return Err(Error::persist(format!(
                    "pipeline has no step named `{}`",
                    state.name
                )));
            }
        }
        for state in &self.steps {
            if let Some(step) = pipeline.step_mut(&state.name) {
                step.instruction = state.instruction.clone();
                step.demos = state.demos.iter().cloned().collect();
            }
        }
        Ok(())
    }

    /// Serialize to pretty JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON, rejecting unknown schema versions
    pub fn from_json(json: &str) -> Result<Self> {
        let state: Self = serde_json::from_str(json)?;
        state.check_version()?;
        Ok(state)
    }

    /// Save to a file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// Load from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    fn check_version(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(Error::persist(format!(
                "unsupported schema version {} (expected {})",
                self.schema_version, SCHEMA_VERSION
            )));
        }
        Ok(())
    }
}

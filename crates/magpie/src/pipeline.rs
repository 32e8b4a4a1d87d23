// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Pipeline trait and the built-in sequential [`Chain`].
//!
//! A pipeline is opaque glue around a fixed set of [`Step`]s. Optimizers only
//! need three things from it: run it, reach its steps to change instructions
//! and demonstrations, and deep-copy it so each candidate owns its own steps.
//!
//! ## Example
//!
//! ```ignore
//! struct Rag { retrieve: Step, answer: Step }
//!
//! #[async_trait]
//! impl Pipeline for Rag {
//!     async fn run(&self, cx: &RunContext<'_>, input: &Values) -> Result<Values> {
//!         let passages = cx.call(&self.retrieve, input).await?;
//!         let mut next = input.clone();
//!         next.extend(passages);
//!         cx.call(&self.answer, &next).await
//!     }
//!     // steps(), steps_mut(), clone_pipeline() ...
//! }
//! ```

use crate::error::{Error, Result};
use crate::step::Step;
use crate::trace::RunContext;
use crate::types::Values;
use async_trait::async_trait;
use std::collections::HashSet;

/// Core trait for executable pipelines.
///
/// Steps must be reached only through [`RunContext::call`], which applies
/// the quality guard and records the trace.
#[async_trait]
pub trait Pipeline: Send + Sync {
    /// Execute the pipeline on one input
    async fn run(&self, cx: &RunContext<'_>, input: &Values) -> Result<Values>;

    /// Steps in declaration order
    fn steps(&self) -> Vec<&Step>;

    /// Mutable steps in declaration order
    fn steps_mut(&mut self) -> Vec<&mut Step>;

    /// Deep copy. The copy must share no mutable state with `self`.
    fn clone_pipeline(&self) -> Box<dyn Pipeline>;

    /// Pipeline name for logging
    fn name(&self) -> &str {
        "pipeline"
    }

    /// Find a step by name
    fn step(&self, name: &str) -> Option<&Step> {
        self.steps().into_iter().find(|s| s.name() == name)
    }

    /// Find a mutable step by name
    fn step_mut(&mut self, name: &str) -> Option<&mut Step> {
        self.steps_mut().into_iter().find(|s| s.name() == name)
    }

    /// Demonstrations across all steps
    fn total_demos(&self) -> usize {
        self.steps().iter().map(|s| s.demos.len()).sum()
    }
}

impl Clone for Box<dyn Pipeline> {
    fn clone(&self) -> Self {
        self.clone_pipeline()
    }
}

/// Check that step names are unique and non-empty
pub fn check_step_names<'a>(steps: impl IntoIterator<Item = &'a Step>) -> Result<()> {
    let mut seen = HashSet::new();
    for step in steps {
        if step.name().is_empty() {
            return Err(Error::pipeline("step name must not be empty"));
        }
        if !seen.insert(step.name()) {
            return Err(Error::pipeline(format!(
                "duplicate step name `{}`",
                step.name()
            )));
        }
    }
    Ok(())
}

/// Runs steps one after another.
///
/// Each step sees the original input plus every earlier output. The result is
/// the union of all step outputs.
#[derive(Debug, Clone)]
pub struct Chain {
    name: String,
    steps: Vec<Step>,
}

impl Chain {
    /// Create a chain. Step names must be unique.
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Result<Self> {
        if steps.is_empty() {
            return Err(Error::pipeline("chain needs at least one step"));
        }
        check_step_names(&steps)?;
        Ok(Self {
            name: name.into(),
            steps,
        })
    }

    /// Single-step chain
    pub fn single(step: Step) -> Self {
        Self {
            name: step.name().to_string(),
            steps: vec![step],
        }
    }
}

#[async_trait]
impl Pipeline for Chain {
    async fn run(&self, cx: &RunContext<'_>, input: &Values) -> Result<Values> {
        let mut acc = input.clone();
        let mut output = Values::new();
        for step in &self.steps {
            let produced = cx.call(step, &acc).await?;
            acc.extend(produced.iter().map(|(k, v)| (k.clone(), v.clone())));
            output.extend(produced);
        }
        Ok(output)
    }

    fn steps(&self) -> Vec<&Step> {
        self.steps.iter().collect()
    }

    fn steps_mut(&mut self) -> Vec<&mut Step> {
        self.steps.iter_mut().collect()
    }

    fn clone_pipeline(&self) -> Box<dyn Pipeline> {
        Box::new(self.clone())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Text proposal and critique capabilities.
//!
//! Instruction search and reflection depend on these traits, not on a
//! concrete model. [`LmProposer`] and [`LmCritic`] implement them on top of
//! any [`Lm`] by running a small meta step. Their replies are recorded on the
//! caller's [`UsageMeter`] so they count against the search's cost budget.

use async_trait::async_trait;
use magpie::{
    CallOptions, Contract, Error, Field, Lm, LmError, LmRequest, Result, Step, Trace,
    UsageMeter, Values,
};
use std::sync::Arc;

/// What the proposer is asked to improve
#[derive(Debug, Clone, Copy)]
pub struct ProposalRequest<'a> {
    /// Contract of the step being tuned
    pub contract: &'a Contract,
    /// Instruction currently in use
    pub current_instruction: &'a str,
    /// Traces of recent runs, for context
    pub sample_traces: &'a [Trace],
    /// Number of proposals wanted
    pub n: usize,
    /// Critique to incorporate, if any
    pub feedback: Option<&'a str>,
    /// Where billable proposal calls are recorded
    pub meter: &'a UsageMeter,
}

/// Produces alternative instructions for a step
#[async_trait]
pub trait InstructionProposer: Send + Sync {
    /// Return up to `request.n` instructions. Fewer is allowed.
    async fn propose(&self, request: ProposalRequest<'_>) -> Result<Vec<String>>;
}

/// An example the current pipeline got wrong
#[derive(Debug, Clone)]
pub struct FailureCase {
    /// Example id
    pub example_id: String,
    /// Example inputs
    pub inputs: Values,
    /// Expected outputs
    pub expected: Values,
    /// Score the example received
    pub score: f64,
    /// Error message when the run failed outright
    pub error: Option<String>,
    /// Trace of the failing run
    pub trace: Option<Trace>,
}

/// Turns failing examples into feedback text
#[async_trait]
pub trait Critic: Send + Sync {
    /// Describe what went wrong and how the instruction could address it.
    /// Billable calls are recorded on `meter`.
    async fn critique(&self, failures: &[FailureCase], meter: &UsageMeter) -> Result<String>;
}

/// Parse a numbered list (`1. foo`, `2) bar`) into its items.
///
/// Unnumbered lines continue the previous item. Lines before the first
/// number are ignored.
pub fn parse_numbered_list(text: &str) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let digits = line.chars().take_while(char::is_ascii_digit).count();
        let rest = &line[digits..];
        let item = if digits > 0 {
            rest.strip_prefix('.').or_else(|| rest.strip_prefix(')'))
        } else {
            None
        };
        match item {
            Some(item) => items.push(item.trim().to_string()),
            None => {
                if let Some(last) = items.last_mut() {
                    last.push(' ');
                    last.push_str(line);
                }
            }
        }
    }
    items.retain(|s| !s.is_empty());
    items
}

/// Render a trace as compact text for meta prompts
pub fn render_trace(trace: &Trace) -> String {
    let mut out = String::new();
    for event in trace.iter() {
        out.push_str(&event.step);
        out.push_str(": ");
        out.push_str(&render_values(&event.inputs));
        out.push_str(" => ");
        match event.outputs() {
            Some(outputs) => out.push_str(&render_values(outputs)),
            None => out.push_str("<failed>"),
        }
        out.push('\n');
    }
    out
}

fn render_values(values: &Values) -> String {
    values
        .iter()
        .map(|(k, v)| format!("{k}={v:?}"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn capability_error(what: &str, e: LmError) -> Error {
    Error::Other(format!("{what} failed: {e}"))
}

/// [`InstructionProposer`] backed by an LM
pub struct LmProposer {
    lm: Arc<dyn Lm>,
    options: CallOptions,
}

impl LmProposer {
    /// Create a proposer. Proposals are sampled at temperature 0.7 by default.
    pub fn new(lm: Arc<dyn Lm>) -> Self {
        Self {
            lm,
            options: CallOptions::default().with_temperature(0.7),
        }
    }

    /// Override call options
    pub fn with_options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }

    fn step() -> Result<Step> {
        let contract = Contract::builder("propose_instructions")
            .instructions(
                "You improve instructions for a language model task. Write alternative \
                 instructions that keep the same intent but are clearer and more likely to \
                 produce correct outputs. Reply with a numbered list.",
            )
            .input(Field::input("task", "The task's fields"))
            .input(Field::input("current_instruction", "Instruction in use"))
            .input(Field::input("count", "How many alternatives to write"))
            .input(Field::input("sample_runs", "Recent runs of the task").optional())
            .input(Field::input("feedback", "Critique to address").optional())
            .output(Field::output("instructions", "Numbered list of instructions"))
            .build()?;
        Ok(Step::new("propose_instructions", contract))
    }
}

#[async_trait]
impl InstructionProposer for LmProposer {
    async fn propose(&self, request: ProposalRequest<'_>) -> Result<Vec<String>> {
        if request.n == 0 {
            return Ok(Vec::new());
        }
        let step = Self::step()?;

        let mut inputs = Values::new();
        inputs.insert("task".into(), request.contract.to_string_format());
        inputs.insert(
            "current_instruction".into(),
            request.current_instruction.to_string(),
        );
        inputs.insert("count".into(), request.n.to_string());
        if !request.sample_traces.is_empty() {
            let runs: Vec<String> = request.sample_traces.iter().map(render_trace).collect();
            inputs.insert("sample_runs".into(), runs.join("\n"));
        }
        if let Some(feedback) = request.feedback {
            inputs.insert("feedback".into(), feedback.to_string());
        }

        let output = self
            .lm
            .invoke(&LmRequest::for_step(&step, inputs, self.options))
            .await
            .map_err(|e| capability_error("instruction proposal", e))?;
        request.meter.record(&output);

        let mut proposals = output
            .values
            .get("instructions")
            .map(|text| parse_numbered_list(text))
            .unwrap_or_default();
        proposals.truncate(request.n);
        Ok(proposals)
    }
}

/// [`Critic`] backed by an LM
pub struct LmCritic {
    lm: Arc<dyn Lm>,
    max_failures: usize,
}

impl LmCritic {
    /// Create a critic showing at most 5 failures per critique
    pub fn new(lm: Arc<dyn Lm>) -> Self {
        Self {
            lm,
            max_failures: 5,
        }
    }

    /// Set how many failures are shown to the LM
    pub fn with_max_failures(mut self, n: usize) -> Self {
        self.max_failures = n.max(1);
        self
    }

    fn step() -> Result<Step> {
        let contract = Contract::builder("critique")
            .instructions(
                "Analyze these failure cases of a language model task and explain what the \
                 instruction should say to avoid them.",
            )
            .input(Field::input("failures", "Failing examples with their runs"))
            .output(Field::output("feedback", "Specific suggested improvements"))
            .build()?;
        Ok(Step::new("critique", contract))
    }
}

#[async_trait]
impl Critic for LmCritic {
    async fn critique(&self, failures: &[FailureCase], meter: &UsageMeter) -> Result<String> {
        if failures.is_empty() {
            return Ok(String::new());
        }
        let step = Self::step()?;

        let mut text = String::new();
        for (i, failure) in failures.iter().take(self.max_failures).enumerate() {
            text.push_str(&format!("Failure {}:\n", i + 1));
            text.push_str(&format!("  Inputs: {}\n", render_values(&failure.inputs)));
            text.push_str(&format!("  Expected: {}\n", render_values(&failure.expected)));
            if let Some(error) = &failure.error {
                text.push_str(&format!("  Error: {error}\n"));
            }
            if let Some(trace) = &failure.trace {
                text.push_str("  Run:\n");
                for line in render_trace(trace).lines() {
                    text.push_str("    ");
                    text.push_str(line);
                    text.push('\n');
                }
            }
        }

        let mut inputs = Values::new();
        inputs.insert("failures".into(), text);
        let output = self
            .lm
            .invoke(&LmRequest::for_step(&step, inputs, CallOptions::default()))
            .await
            .map_err(|e| capability_error("critique", e))?;
        meter.record(&output);

        Ok(output.values.get("feedback").cloned().unwrap_or_default())
    }
}

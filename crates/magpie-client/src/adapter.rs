// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Chat Adapter
//!
//! Formats step requests for chat-style LM interfaces and parses
//! `Field: value` replies back into values.

use crate::request::Message;
use magpie::step::REASONING_FIELD;
use magpie::{Field, LmError, LmRequest, StepStrategy, Values};

/// Chat adapter configuration.
#[derive(Debug, Clone, Copy)]
pub struct ChatConfig {
    /// Include field descriptions in prompt
    pub include_descriptions: bool,
    /// Separator between demos
    pub demo_separator: &'static str,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatConfig {
    /// Create new config.
    pub const fn new() -> Self {
        Self {
            include_descriptions: true,
            demo_separator: "\n---\n",
        }
    }

    /// Set description inclusion.
    pub const fn with_descriptions(mut self, include: bool) -> Self {
        self.include_descriptions = include;
        self
    }
}

/// Chat-style adapter for LM prompts.
///
/// The system message carries the instruction and field list; the user
/// message is formatted as:
/// ```text
/// Question: ...
/// Answer: ...
/// ---
/// Question: [input]
/// Answer:
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatAdapter {
    config: ChatConfig,
}

impl ChatAdapter {
    /// Create a new chat adapter.
    pub const fn new(config: ChatConfig) -> Self {
        Self { config }
    }

    /// Get the configuration.
    pub const fn config(&self) -> &ChatConfig {
        &self.config
    }

    /// Render a step request as chat messages.
    pub fn format(&self, request: &LmRequest) -> Vec<Message> {
        vec![
            Message::system(self.format_system(request)),
            Message::user(self.format_user(request)),
        ]
    }

    fn format_system(&self, request: &LmRequest) -> String {
        let contract = &request.contract;
        let mut out = String::new();

        if !request.instruction.is_empty() {
            out.push_str(&request.instruction);
            out.push_str("\n\n");
        }

        if self.config.include_descriptions {
            out.push_str("Given the following fields:\n");
            for field in contract.inputs() {
                push_field_line(&mut out, field);
            }
            out.push('\n');

            out.push_str("Produce the following fields:\n");
            if request.strategy.wants_reasoning() {
                out.push_str("- Reasoning: think step by step before answering\n");
            }
            for field in contract.outputs() {
                push_field_line(&mut out, field);
            }
        }

        if let StepStrategy::ToolUsing { tools } = &request.strategy {
            if !tools.is_empty() {
                out.push_str("\nYou may use the following tools: ");
                out.push_str(&tools.join(", "));
                out.push('\n');
            }
        }

        out.push_str("\nReply with one `Field: value` line per output field.");
        out
    }

    fn format_user(&self, request: &LmRequest) -> String {
        let contract = &request.contract;
        let mut out = String::new();

        for demo in &request.demos {
            for field in contract.inputs() {
                if let Some(value) = demo.inputs.get(&field.name) {
                    push_value_line(&mut out, &field.prefix, value);
                }
            }
            if let Some(reasoning) = demo.outputs.get(REASONING_FIELD) {
                push_value_line(&mut out, "Reasoning", reasoning);
            }
            for field in contract.outputs() {
                if let Some(value) = demo.outputs.get(&field.name) {
                    push_value_line(&mut out, &field.prefix, value);
                }
            }
            out.push_str(self.config.demo_separator.trim_start_matches('\n'));
        }

        for field in contract.inputs() {
            if let Some(value) = request.inputs.get(&field.name) {
                push_value_line(&mut out, &field.prefix, value);
            }
        }
        if request.strategy.wants_reasoning() {
            out.push_str("Reasoning:\n");
        }
        for field in contract.outputs() {
            out.push_str(&field.prefix);
            out.push_str(":\n");
        }

        out
    }

    /// Parse a reply into output values.
    ///
    /// A field starts at a line `Prefix: value` (or `name: value`) and runs
    /// until the next field or a blank line. Missing contract outputs make
    /// the reply malformed; a missing reasoning field does not.
    pub fn parse(&self, text: &str, request: &LmRequest) -> Result<Values, LmError> {
        let mut labels: Vec<(String, &str)> = Vec::new();
        if request.strategy.wants_reasoning() {
            labels.push(("reasoning".to_string(), REASONING_FIELD));
        }
        for field in request.contract.outputs() {
            labels.push((field.prefix.to_lowercase(), field.name.as_str()));
            labels.push((field.name.to_lowercase(), field.name.as_str()));
        }

        let mut values = Values::new();
        let mut current: Option<&str> = None;

        for line in text.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                current = None;
                continue;
            }

            if let Some((name, rest)) = match_label(trimmed, &labels) {
                current = if values.contains_key(name) {
                    None
                } else {
                    values.insert(name.to_string(), rest.trim().to_string());
                    Some(name)
                };
                continue;
            }

            if let Some(name) = current {
                if let Some(value) = values.get_mut(name) {
                    if !value.is_empty() {
                        value.push('\n');
                    }
                    value.push_str(trimmed);
                }
            }
        }

        for field in request.contract.outputs() {
            if !values.contains_key(&field.name) {
                return Err(LmError::malformed(format!(
                    "could not parse field `{}` from reply",
                    field.name
                )));
            }
        }

        Ok(values)
    }
}

fn push_field_line(out: &mut String, field: &Field) {
    out.push_str("- ");
    out.push_str(&field.prefix);
    if !field.desc.is_empty() {
        out.push_str(": ");
        out.push_str(&field.desc);
    }
    if let Some(domain) = &field.domain {
        out.push_str(" (one of: ");
        out.push_str(&domain.join(", "));
        out.push(')');
    }
    out.push('\n');
}

fn push_value_line(out: &mut String, label: &str, value: &str) {
    out.push_str(label);
    out.push_str(": ");
    out.push_str(value);
    out.push('\n');
}

fn match_label<'a, 'l>(line: &'a str, labels: &'l [(String, &'l str)]) -> Option<(&'l str, &'a str)> {
    let (head, rest) = line.split_once(':')?;
    let head = head.trim().trim_matches('*').trim().to_lowercase();
    labels
        .iter()
        .find(|(label, _)| *label == head)
        .map(|(_, name)| (*name, rest.trim_start().trim_start_matches('*')))
}

// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Contracts: the declarative input/output schema of one LM step

use crate::error::{Error, Result};
use crate::field::{Field, FieldKind};
use crate::types::Values;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;

/// An immutable input/output contract.
///
/// Built through [`ContractBuilder`] or [`Contract::parse`], which enforce
/// that field names are unique and that there is at least one input and one
/// output. Contracts are shared between steps and their clones as
/// `Arc<Contract>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contract {
    name: String,
    instructions: String,
    inputs: Vec<Field>,
    outputs: Vec<Field>,
}

impl Contract {
    /// Start building a contract
    pub fn builder(name: impl Into<String>) -> ContractBuilder {
        ContractBuilder::new(name)
    }

    /// Parse a contract from the shorthand `"input1, input2 -> output1, output2"`.
    pub fn parse(name: impl Into<String>, s: &str) -> Result<Arc<Self>> {
        let parts: Vec<&str> = s.split("->").map(|p| p.trim()).collect();
        if parts.len() != 2 {
            return Err(Error::contract(
                "contract must be in format 'inputs -> outputs'",
            ));
        }

        let mut builder = ContractBuilder::new(name);
        for input in parts[0]
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
        {
            builder = builder.input(Field::input(input, ""));
        }
        for output in parts[1]
            .split(',')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
        {
            builder = builder.output(Field::output(output, ""));
        }

        builder.build()
    }

    /// Contract name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Base task instruction
    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Input fields in declaration order
    pub fn inputs(&self) -> &[Field] {
        &self.inputs
    }

    /// Output fields in declaration order
    pub fn outputs(&self) -> &[Field] {
        &self.outputs
    }

    /// Look up an input field by name
    pub fn input(&self, name: &str) -> Option<&Field> {
        self.inputs.iter().find(|f| f.name == name)
    }

    /// Look up an output field by name
    pub fn output(&self, name: &str) -> Option<&Field> {
        self.outputs.iter().find(|f| f.name == name)
    }

    /// Get all fields (inputs then outputs)
    pub fn all_fields(&self) -> impl Iterator<Item = &Field> {
        self.inputs.iter().chain(self.outputs.iter())
    }

    /// Check that every output field is present and within its domain and
    /// bounds. Keys outside the contract, such as `reasoning`, are ignored.
    pub fn check_outputs(&self, values: &Values) -> std::result::Result<(), String> {
        for field in &self.outputs {
            match values.get(&field.name) {
                Some(value) => field.check(value)?,
                None => return Err(format!("missing output `{}`", field.name)),
            }
        }
        Ok(())
    }

    /// Canonical serialization, stable for equal contracts.
    pub fn fingerprint(&self) -> String {
        // Struct and Vec order are fixed, so serde_json output is canonical.
        serde_json::to_string(self).unwrap_or_else(|_| self.to_string_format())
    }

    /// Convert contract to shorthand string format
    pub fn to_string_format(&self) -> String {
        let inputs: Vec<&str> = self.inputs.iter().map(|f| f.name.as_str()).collect();
        let outputs: Vec<&str> = self.outputs.iter().map(|f| f.name.as_str()).collect();
        format!("{} -> {}", inputs.join(", "), outputs.join(", "))
    }
}

/// Builder for [`Contract`]
#[derive(Debug, Clone)]
pub struct ContractBuilder {
    name: String,
    instructions: String,
    inputs: Vec<Field>,
    outputs: Vec<Field>,
}

impl ContractBuilder {
    /// Create a new builder
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: String::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Set the base instruction
    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        self.instructions = text.into();
        self
    }

    /// Add an input field. The field kind is forced to input.
    pub fn input(mut self, mut field: Field) -> Self {
        field.kind = FieldKind::Input;
        self.inputs.push(field);
        self
    }

    /// Add an output field. Outputs are always required.
    pub fn output(mut self, mut field: Field) -> Self {
        field.kind = FieldKind::Output;
        field.required = true;
        self.outputs.push(field);
        self
    }

    /// Validate and freeze the contract
    pub fn build(self) -> Result<Arc<Contract>> {
        if self.name.trim().is_empty() {
            return Err(Error::contract("contract name must not be empty"));
        }
        if self.inputs.is_empty() {
            return Err(Error::contract(format!(
                "contract `{}` needs at least one input field",
                self.name
            )));
        }
        if self.outputs.is_empty() {
            return Err(Error::contract(format!(
                "contract `{}` needs at least one output field",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for field in self.inputs.iter().chain(self.outputs.iter()) {
            if field.name.trim().is_empty() {
                return Err(Error::field(format!(
                    "contract `{}` has a field with an empty name",
                    self.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Error::contract(format!(
                    "contract `{}` declares field `{}` twice",
                    self.name, field.name
                )));
            }
            if let Some(domain) = &field.domain {
                if domain.is_empty() {
                    return Err(Error::field(format!(
                        "field `{}` has an empty value domain",
                        field.name
                    )));
                }
            }
        }

        Ok(Arc::new(Contract {
            name: self.name,
            instructions: self.instructions,
            inputs: self.inputs,
            outputs: self.outputs,
        }))
    }
}

// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Field definitions for contracts

use serde::{Deserialize, Serialize};

/// Which side of a contract a field lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Input field
    Input,
    /// Output field
    Output,
}

/// A typed field of a [`Contract`](crate::Contract).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    /// Field name
    pub name: String,

    /// Human-readable guidance for the LM
    #[serde(default)]
    pub desc: String,

    /// Display prefix used when rendering prompts
    pub prefix: String,

    /// Input or output
    pub kind: FieldKind,

    /// Allowed values, when the field is constrained to an enumeration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Vec<String>>,

    /// Whether the field must be present. Outputs are always required.
    #[serde(default = "default_required")]
    pub required: bool,

    /// Minimum length in characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_len: Option<usize>,

    /// Maximum length in characters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_len: Option<usize>,
}

fn default_required() -> bool {
    true
}

impl Field {
    /// Create a new field
    pub fn new(name: impl Into<String>, desc: impl Into<String>, kind: FieldKind) -> Self {
        let name = name.into();
        let prefix = Self::infer_prefix(&name);

        Self {
            name,
            desc: desc.into(),
            prefix,
            kind,
            domain: None,
            required: true,
            min_len: None,
            max_len: None,
        }
    }

    /// Create an input field
    pub fn input(name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self::new(name, desc, FieldKind::Input)
    }

    /// Create an output field
    pub fn output(name: impl Into<String>, desc: impl Into<String>) -> Self {
        Self::new(name, desc, FieldKind::Output)
    }

    /// Restrict the field to a fixed set of values
    pub fn one_of<I, S>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.domain = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Mark an input as optional
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    /// Set character length bounds
    pub fn with_len(mut self, min: Option<usize>, max: Option<usize>) -> Self {
        self.min_len = min;
        self.max_len = max;
        self
    }

    /// Set the prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Check a value against the domain and length bounds.
    ///
    /// Returns a human-readable reason on rejection.
    pub fn check(&self, value: &str) -> Result<(), String> {
        if let Some(domain) = &self.domain {
            if !domain.iter().any(|allowed| allowed == value) {
                return Err(format!(
                    "`{}` must be one of [{}], got {:?}",
                    self.name,
                    domain.join(", "),
                    value
                ));
            }
        }

        let len = value.chars().count();
        if let Some(min) = self.min_len {
            if len < min {
                return Err(format!(
                    "`{}` is {} chars, minimum is {}",
                    self.name, len, min
                ));
            }
        }
        if let Some(max) = self.max_len {
            if len > max {
                return Err(format!(
                    "`{}` is {} chars, maximum is {}",
                    self.name, len, max
                ));
            }
        }

        Ok(())
    }

    /// Infer prefix from field name (`review_text` / `reviewText` -> `Review Text`)
    fn infer_prefix(name: &str) -> String {
        let mut result = String::with_capacity(name.len() + 5);
        let mut prev_lower = false;
        let mut capitalize = true;

        for ch in name.chars() {
            if ch == '_' || ch == '-' {
                if !result.is_empty() {
                    result.push(' ');
                }
                capitalize = true;
                prev_lower = false;
                continue;
            }

            if ch.is_uppercase() && prev_lower {
                result.push(' ');
            }

            if capitalize {
                result.extend(ch.to_uppercase());
                capitalize = false;
            } else {
                result.push(ch);
            }

            prev_lower = ch.is_lowercase();
        }

        result
    }
}

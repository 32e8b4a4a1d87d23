// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Demonstrations: worked input/output pairs shown to the LM

use crate::types::{canonical_json, Values};
use serde::{Deserialize, Serialize};

/// One worked example attached to a step
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Demonstration {
    /// Input values
    pub inputs: Values,
    /// Output values
    pub outputs: Values,
}

impl Demonstration {
    /// Create a demonstration
    pub fn new(inputs: Values, outputs: Values) -> Self {
        Self { inputs, outputs }
    }

    /// Serialized inputs, used to de-duplicate demonstrations
    pub fn input_key(&self) -> String {
        canonical_json(&self.inputs)
    }
}

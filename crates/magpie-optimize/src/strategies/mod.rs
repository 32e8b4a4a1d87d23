// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Built-in strategies
//!
//! - [`LabeledFewShot`]: demonstrations copied from labeled examples
//! - [`BootstrapFewShot`]: demonstrations harvested from successful traces
//! - [`InstructionSearch`]: proposed instruction rewrites, demos held fixed
//! - [`Reflective`]: critique of failures folded into a revised instruction

pub mod bootstrap;
pub mod instruction;
pub mod labeled;
pub mod reflective;

pub use bootstrap::{BootstrapConfig, BootstrapFewShot};
pub use instruction::{InstructionConfig, InstructionSearch};
pub use labeled::{LabeledConfig, LabeledFewShot, Selection};
pub use reflective::{Reflective, ReflectiveConfig};

use magpie::{Demonstration, Example, Step, Values};

/// Project a labeled example onto a step's contract.
///
/// Returns `None` when a required input or any output is missing.
pub(crate) fn demo_for_step(step: &Step, example: &Example) -> Option<Demonstration> {
    let contract = step.contract();
    let mut inputs = Values::new();
    for field in contract.inputs() {
        match example.get(&field.name) {
            Some(value) => {
                inputs.insert(field.name.clone(), value.to_string());
            }
            None if field.required => return None,
            None => {}
        }
    }
    let mut outputs = Values::new();
    for field in contract.outputs() {
        let value = example
            .get_expected(&field.name)
            .or_else(|| example.get_input(&field.name))?;
        outputs.insert(field.name.clone(), value.to_string());
    }
    Some(Demonstration::new(inputs, outputs))
}

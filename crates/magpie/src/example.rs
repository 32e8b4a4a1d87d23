// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Training and evaluation examples

use crate::error::{Error, Result};
use crate::types::Values;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::ops::Index;
use std::sync::Arc;

/// A labeled example for training or evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Example {
    /// Stable identifier, used to keep splits disjoint
    pub id: String,

    /// Input fields
    pub inputs: Values,

    /// Expected output fields
    pub expected: Values,
}

impl Example {
    /// Create a new example
    pub fn new(id: impl Into<String>, inputs: Values, expected: Values) -> Self {
        Self {
            id: id.into(),
            inputs,
            expected,
        }
    }

    /// Get an input field
    pub fn get_input(&self, key: &str) -> Option<&str> {
        self.inputs.get(key).map(String::as_str)
    }

    /// Get an expected output field
    pub fn get_expected(&self, key: &str) -> Option<&str> {
        self.expected.get(key).map(String::as_str)
    }

    /// Look a field up in inputs first, then in expected outputs
    pub fn get(&self, key: &str) -> Option<&str> {
        self.get_input(key).or_else(|| self.get_expected(key))
    }
}

/// An ordered, immutable, cheaply clonable sequence of examples.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataset {
    examples: Arc<[Example]>,
}

impl Dataset {
    /// Create a dataset from examples
    pub fn new(examples: impl Into<Vec<Example>>) -> Self {
        Self {
            examples: Arc::from(examples.into()),
        }
    }

    /// Number of examples
    #[inline]
    pub fn len(&self) -> usize {
        self.examples.len()
    }

    /// Whether the dataset is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// Iterate examples in order
    pub fn iter(&self) -> std::slice::Iter<'_, Example> {
        self.examples.iter()
    }

    /// Borrow the examples as a slice
    pub fn as_slice(&self) -> &[Example] {
        &self.examples
    }

    /// Get an example by index
    pub fn get(&self, index: usize) -> Option<&Example> {
        self.examples.get(index)
    }

    /// Split into `[0, mid)` and `[mid, len)`.
    pub fn split_at(&self, mid: usize) -> Result<(Dataset, Dataset)> {
        if mid > self.len() {
            return Err(Error::config(format!(
                "split point {} exceeds dataset length {}",
                mid,
                self.len()
            )));
        }
        let (left, right) = self.examples.split_at(mid);
        Ok((Dataset::new(left.to_vec()), Dataset::new(right.to_vec())))
    }

    /// Split keeping `fraction` of the examples (rounded down) in the first part.
    pub fn split_fraction(&self, fraction: f64) -> Result<(Dataset, Dataset)> {
        if !(0.0..=1.0).contains(&fraction) {
            return Err(Error::config(format!(
                "split fraction must be in [0, 1], got {}",
                fraction
            )));
        }
        let mid = (self.len() as f64 * fraction).floor() as usize;
        self.split_at(mid)
    }

    /// True when no example id appears in both datasets.
    pub fn is_disjoint_from(&self, other: &Dataset) -> bool {
        let ids: HashSet<&str> = self.iter().map(|e| e.id.as_str()).collect();
        other.iter().all(|e| !ids.contains(e.id.as_str()))
    }
}

impl Index<usize> for Dataset {
    type Output = Example;

    fn index(&self, index: usize) -> &Example {
        &self.examples[index]
    }
}

impl<'a> IntoIterator for &'a Dataset {
    type Item = &'a Example;
    type IntoIter = std::slice::Iter<'a, Example>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<Example> for Dataset {
    fn from_iter<T: IntoIterator<Item = Example>>(iter: T) -> Self {
        Dataset::new(iter.into_iter().collect::<Vec<_>>())
    }
}

impl From<Vec<Example>> for Dataset {
    fn from(examples: Vec<Example>) -> Self {
        Dataset::new(examples)
    }
}

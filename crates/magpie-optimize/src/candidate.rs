// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Candidate pipelines and their provenance

use magpie::Pipeline;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a candidate, unique within one search
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CandidateId(pub u64);

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Hands out candidate ids. Id 0 is the baseline.
#[derive(Debug, Default)]
pub struct IdGen {
    next: AtomicU64,
}

impl IdGen {
    /// Create a generator starting at 0
    pub fn new() -> Self {
        Self::default()
    }

    /// Next unused id
    pub fn next_id(&self) -> CandidateId {
        CandidateId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Where a candidate came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// Candidate id
    pub id: CandidateId,
    /// Candidate it was derived from; `None` for the baseline
    pub parent: Option<CandidateId>,
    /// Name of the producing strategy
    pub strategy: String,
    /// Generation index (0 is the baseline)
    pub generation: usize,
    /// Free-form description of the change
    pub note: String,
}

/// A pipeline variant under consideration.
///
/// The pipeline is a deep copy; changing it never affects its parent.
pub struct Candidate {
    /// The variant
    pub pipeline: Box<dyn Pipeline>,
    /// Origin
    pub provenance: Provenance,
}

impl Candidate {
    /// The unmodified starting pipeline
    pub fn baseline(pipeline: &dyn Pipeline, ids: &IdGen) -> Self {
        Self {
            pipeline: pipeline.clone_pipeline(),
            provenance: Provenance {
                id: ids.next_id(),
                parent: None,
                strategy: "baseline".to_string(),
                generation: 0,
                note: String::new(),
            },
        }
    }

    /// Deep-copy `parent` into a new candidate. The caller edits the copy.
    pub fn derive(
        parent: &Candidate,
        ids: &IdGen,
        strategy: &str,
        generation: usize,
        note: impl Into<String>,
    ) -> Self {
        Self {
            pipeline: parent.pipeline.clone_pipeline(),
            provenance: Provenance {
                id: ids.next_id(),
                parent: Some(parent.provenance.id),
                strategy: strategy.to_string(),
                generation,
                note: note.into(),
            },
        }
    }

    /// Candidate id
    pub fn id(&self) -> CandidateId {
        self.provenance.id
    }

    /// Demonstrations across all steps
    pub fn total_demos(&self) -> usize {
        self.pipeline.total_demos()
    }
}

impl Clone for Candidate {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone_pipeline(),
            provenance: self.provenance.clone(),
        }
    }
}

impl fmt::Debug for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Candidate")
            .field("pipeline", &self.pipeline.name())
            .field("provenance", &self.provenance)
            .finish()
    }
}

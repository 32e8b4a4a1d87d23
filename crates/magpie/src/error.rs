// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Error types for magpie

use crate::guard::StepFailure;
use thiserror::Error;

/// Result type alias for magpie operations
pub type Result<T> = core::result::Result<T, Error>;

/// Main error type for magpie.
///
/// Per-example failures (a step that exhausted its retries, a malformed
/// input) surface as [`Error::Step`] or [`Error::Validation`] and are
/// absorbed by the evaluation harness. Only harness-level faults
/// ([`Error::is_harness_fault`]) are meant to reach the caller of a search.
#[derive(Error, Debug)]
pub enum Error {
    /// Contract construction errors
    #[error("Contract error: {0}")]
    Contract(String),

    /// Field-related errors
    #[error("Field error: {0}")]
    Field(String),

    /// Input or output values rejected by a contract
    #[error("Validation error: {0}")]
    Validation(String),

    /// A step gave up after the quality guard's fallback fired
    #[error("Step `{step}` failed: {failure}")]
    Step {
        /// Name of the failing step
        step: String,
        /// Sentinel failure produced by the guard
        failure: StepFailure,
    },

    /// Pipeline glue errors (unknown step, bad wiring)
    #[error("Pipeline error: {0}")]
    Pipeline(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// The dataset handed to the harness had no examples
    #[error("Dataset is empty")]
    EmptyDataset,

    /// Work was stopped by a cancellation request
    #[error("Cancelled")]
    Cancelled,

    /// Persistence errors (schema mismatch, unknown step)
    #[error("Persistence error: {0}")]
    Persist(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a contract error
    pub fn contract(msg: impl Into<String>) -> Self {
        Self::Contract(msg.into())
    }

    /// Create a field error
    pub fn field(msg: impl Into<String>) -> Self {
        Self::Field(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a pipeline error
    pub fn pipeline(msg: impl Into<String>) -> Self {
        Self::Pipeline(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a persistence error
    pub fn persist(msg: impl Into<String>) -> Self {
        Self::Persist(msg.into())
    }

    /// Create a step failure error
    pub fn step(step: impl Into<String>, failure: StepFailure) -> Self {
        Self::Step {
            step: step.into(),
            failure,
        }
    }

    /// Faults that must stop an evaluation before any LM call is made.
    #[inline]
    pub fn is_harness_fault(&self) -> bool {
        matches!(self, Self::Config(_) | Self::EmptyDataset | Self::Contract(_))
    }

    /// Whether this error came from cancellation, directly or via a step.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Step { failure, .. } => failure.is_cancelled(),
            _ => false,
        }
    }

    /// Get the error category for logging.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Contract(_) => "contract",
            Self::Field(_) => "field",
            Self::Validation(_) => "validation",
            Self::Step { failure, .. } => failure.kind.as_str(),
            Self::Pipeline(_) => "pipeline",
            Self::Config(_) => "config",
            Self::EmptyDataset => "empty_dataset",
            Self::Cancelled => "cancelled",
            Self::Persist(_) => "persist",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
            Self::Other(_) => "other",
        }
    }
}

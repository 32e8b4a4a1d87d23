// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! # Magpie - Declarative LM Pipeline Core
//!
//! Data model and execution layer for pipelines of language-model steps.
//! Optimizers (in `magpie-optimize`) tune the instruction and demonstrations
//! of each [`Step`]; this crate runs pipelines, validates what goes in and
//! out of the LM, retries what is worth retrying and records what happened.
//!
//! ## Architecture
//!
//! - **Contracts**: immutable, typed input/output schemas ([`Contract`])
//! - **Steps**: a contract plus a strategy, an instruction and demonstrations
//! - **Pipelines**: opaque glue over steps, deep-clonable per candidate
//! - **Trace recording**: every step call goes through [`RunContext::call`],
//!   which applies the [`QualityGuard`] and appends a [`TraceEvent`]
//!
//! ## Quick Start
//!
//! ```ignore
//! use magpie::prelude::*;
//!
//! let contract = Contract::parse("qa", "question -> answer")?;
//! let pipeline = Chain::single(Step::new("answer", contract));
//! let lm = Arc::new(MockLm::new(|req| Ok(values([("answer", "42")]))));
//!
//! let recording = TraceRecorder::new(lm).record(&pipeline, &values([("question", "?")])).await;
//! assert_eq!(recording.trace.len(), 1);
//! ```

#![warn(missing_docs)]
#![allow(clippy::new_ret_no_self)]
#![allow(clippy::type_complexity)]

pub mod cancel;
pub mod contract;
pub mod demo;
pub mod error;
pub mod example;
pub mod field;
pub mod guard;
pub mod lm;
pub mod persist;
pub mod pipeline;
pub mod step;
pub mod trace;
pub mod types;

pub use cancel::{CancelHandle, CancelToken};
pub use contract::{Contract, ContractBuilder};
pub use demo::Demonstration;
pub use error::{Error, Result};
pub use example::{Dataset, Example};
pub use field::{Field, FieldKind};
pub use guard::{FailureKind, GuardPolicy, QualityGuard, StepFailure};
pub use lm::{
    CallOptions, Lm, LmError, LmErrorKind, LmOutput, LmRequest, MockLm, Usage, UsageMeter,
    UsageSnapshot,
};
pub use persist::ProgramState;
pub use pipeline::{Chain, Pipeline};
pub use step::{Step, StepStrategy};
pub use trace::{Recording, RunContext, StepOutcome, Trace, TraceEvent, TraceRecorder};
pub use types::{values, Values};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        values, CallOptions, CancelHandle, CancelToken, Chain, Contract, Dataset,
        Demonstration, Error, Example, Field, GuardPolicy, Lm, LmError, MockLm, Pipeline,
        QualityGuard, Result, RunContext, Step, StepStrategy, Trace, TraceRecorder, Values,
    };
    pub use std::sync::Arc;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

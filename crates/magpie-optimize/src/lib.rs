// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Pipeline optimization for Magpie
//!
//! A [`SearchController`] scores the starting pipeline on a validation
//! split, then repeatedly asks a [`Strategy`] for candidate variants,
//! scores them on the same split, and keeps the best one until its budget
//! runs out.
//!
//! ## Example
//!
//! ```ignore
//! let controller = SearchController::new(lm, Arc::new(ExactMatch::new()))
//!     .with_config(SearchConfig::from_yaml_str(yaml)?);
//! let mut strategy = BootstrapFewShot::new(BootstrapConfig::default());
//! let outcome = controller.search(&pipeline, &train, &validation, &mut strategy).await?;
//! ProgramState::capture(outcome.best.as_ref()).save("program.json")?;
//! ```

#![warn(missing_docs)]

pub mod budget;
pub mod candidate;
pub mod capability;
pub mod config;
pub mod controller;
pub mod rng;
pub mod strategies;
pub mod strategy;

pub use budget::{BudgetConfig, BudgetTracker, CostModel, StopReason};
pub use candidate::{Candidate, CandidateId, IdGen, Provenance};
pub use capability::{
    parse_numbered_list, Critic, FailureCase, InstructionProposer, LmCritic, LmProposer,
    ProposalRequest,
};
pub use config::SearchConfig;
pub use controller::{CandidateReport, SearchController, SearchOutcome, SearchState};
pub use rng::Rng;
pub use strategies::{
    BootstrapConfig, BootstrapFewShot, InstructionConfig, InstructionSearch, LabeledConfig,
    LabeledFewShot, Reflective, ReflectiveConfig, Selection,
};
pub use strategy::{ProposeContext, RemainingBudget, Strategy};

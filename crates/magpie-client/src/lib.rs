// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! LM client abstraction for Magpie

#![warn(missing_docs)]

pub mod adapter;
pub mod lm;
pub mod pool;
pub mod provider;
pub mod request;
pub mod response;

pub use adapter::{ChatAdapter, ChatConfig};
pub use lm::{CompletionLm, LmConfig};
pub use pool::{LmPool, PooledLm};
pub use provider::{FnProvider, Provider, ProviderType};
pub use request::{CompletionRequest, Message};
pub use response::{Completion, FINISH_CONTENT_FILTER};

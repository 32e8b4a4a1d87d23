// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Provider abstraction for different LM backends.
//!
//! Magpie ships no network client. Backends implement [`Provider`] and are
//! wrapped in a [`CompletionLm`](crate::CompletionLm), which turns step
//! requests into chat messages and replies back into field values.

use crate::request::CompletionRequest;
use crate::response::Completion;
use async_trait::async_trait;
use magpie::LmError;
use serde::{Deserialize, Serialize};

/// Type of LM provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    /// OpenAI
    OpenAI,
    /// Anthropic
    Anthropic,
    /// Local model
    Local,
    /// Custom provider
    Custom,
}

/// Provider trait for text-completion backends
#[async_trait]
pub trait Provider: Send + Sync {
    /// Complete a request.
    ///
    /// Providers that only have an error string should build the error with
    /// [`LmError::classify`].
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LmError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Provider backed by a closure, for tests and local stubs
pub struct FnProvider<F> {
    f: F,
}

impl<F> FnProvider<F>
where
    F: Fn(&CompletionRequest) -> Result<Completion, LmError> + Send + Sync,
{
    /// Create a provider from a closure
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Provider for FnProvider<F>
where
    F: Fn(&CompletionRequest) -> Result<Completion, LmError> + Send + Sync,
{
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, LmError> {
        (self.f)(request)
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Custom
    }
}

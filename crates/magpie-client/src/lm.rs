// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Language model client on top of a [`Provider`].
//!
//! Configuration is fixed when the client is built. Per-call overrides
//! travel on each request as [`CallOptions`] and are resolved explicitly;
//! there is no ambient "current LM" state.

use crate::adapter::ChatAdapter;
use crate::provider::Provider;
use crate::request::CompletionRequest;
use async_trait::async_trait;
use magpie::{CallOptions, Lm, LmError, LmOutput, LmRequest, Usage};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Configuration for LM client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LmConfig {
    /// Model name
    pub model: String,

    /// Temperature
    pub temperature: f32,

    /// Max tokens
    pub max_tokens: u32,
}

impl Default for LmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4".to_string(),
            temperature: 0.0,
            max_tokens: 4000,
        }
    }
}

impl LmConfig {
    /// Create a config for a model
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    /// Set the temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set max tokens
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Apply per-call overrides, returning `(temperature, max_tokens)`.
    pub fn resolve(&self, options: &CallOptions) -> (f32, u32) {
        (
            options.temperature.unwrap_or(self.temperature),
            options.max_tokens.unwrap_or(self.max_tokens),
        )
    }
}

/// Concrete LM: chat formatting + provider call + reply parsing
pub struct CompletionLm<P: Provider> {
    config: LmConfig,
    provider: P,
    adapter: ChatAdapter,
}

impl<P: Provider> CompletionLm<P> {
    /// Create a new LM client
    pub fn new(config: LmConfig, provider: P) -> Self {
        Self {
            config,
            provider,
            adapter: ChatAdapter::default(),
        }
    }

    /// Use a different adapter
    pub fn with_adapter(mut self, adapter: ChatAdapter) -> Self {
        self.adapter = adapter;
        self
    }

    /// Get configuration
    pub fn config(&self) -> &LmConfig {
        &self.config
    }

    /// Build the provider request for a step request
    pub fn completion_request(&self, request: &LmRequest) -> CompletionRequest {
        let (temperature, max_tokens) = self.config.resolve(&request.options);
        CompletionRequest {
            model: self.config.model.clone(),
            messages: self.adapter.format(request),
            temperature,
            max_tokens,
        }
    }
}

#[async_trait]
impl<P: Provider> Lm for CompletionLm<P> {
    async fn invoke(&self, request: &LmRequest) -> Result<LmOutput, LmError> {
        let completion_request = self.completion_request(request);
        let completion = self.provider.complete(&completion_request).await?;

        if completion.was_filtered() {
            return Err(LmError::safety("reply stopped by provider content filter"));
        }

        let values = self.adapter.parse(&completion.text, request)?;
        let usage = completion.usage.unwrap_or_else(|| {
            Usage::new(
                (completion_request.transcript().len() as u64).div_ceil(4),
                (completion.text.len() as u64).div_ceil(4),
            )
        });
        debug!(
            model = %completion.model,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            "completion parsed"
        );

        Ok(LmOutput::new(values).with_usage(usage))
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

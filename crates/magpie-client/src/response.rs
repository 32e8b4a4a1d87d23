// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Completion response types

use magpie::Usage;
use serde::{Deserialize, Serialize};

/// Finish reason reported when a provider's safety filter cut the reply
pub const FINISH_CONTENT_FILTER: &str = "content_filter";

/// Response from a text-completion provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text
    pub text: String,

    /// Token usage
    pub usage: Option<Usage>,

    /// Model that generated the response
    pub model: String,

    /// Finish reason
    pub finish_reason: Option<String>,
}

impl Completion {
    /// Create a new response
    pub fn new(text: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: None,
            model: model.into(),
            finish_reason: None,
        }
    }

    /// Add usage stats
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Set finish reason
    pub fn with_finish_reason(mut self, reason: impl Into<String>) -> Self {
        self.finish_reason = Some(reason.into());
        self
    }

    /// Whether the provider's content filter stopped the reply
    pub fn was_filtered(&self) -> bool {
        self.finish_reason.as_deref() == Some(FINISH_CONTENT_FILTER)
    }
}

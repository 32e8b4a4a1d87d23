// Copyright © 2025 lituus-io <spicyzhug@gmail.com>
// All Rights Reserved.
// Licensed under PolyForm Noncommercial 1.0.0

//! Cache key generation

use magpie::{CallOptions, Demonstration, LmRequest, StepStrategy, Values};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A cache key for LM requests.
///
/// The digest covers the serialized contract, instruction, demonstrations,
/// inputs and strategy. Any difference in one of them is a different key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    /// Model name
    pub model: String,

    /// SHA-256 of the canonical request, hex encoded
    pub digest: String,

    /// Temperature override (multiplied by 1000 for integer comparison)
    pub temperature_x1000: Option<u32>,

    /// Completion length override
    pub max_tokens: Option<u32>,
}

#[derive(Serialize)]
struct KeyMaterial<'a> {
    contract: String,
    instruction: &'a str,
    demos: &'a [Demonstration],
    inputs: &'a Values,
    strategy: &'a StepStrategy,
}

impl CacheKey {
    /// Create from request data
    pub fn from_request(model: &str, request: &LmRequest) -> Self {
        let material = KeyMaterial {
            contract: request.contract.fingerprint(),
            instruction: &request.instruction,
            demos: &request.demos,
            inputs: &request.inputs,
            strategy: &request.strategy,
        };
        // Every field is a string, sequence or sorted map, so this cannot fail.
        let bytes = serde_json::to_vec(&material).unwrap_or_default();

        Self::new(model, &bytes, request.options)
    }

    fn new(model: &str, canonical: &[u8], options: CallOptions) -> Self {
        Self {
            model: model.to_string(),
            digest: hex::encode(Sha256::digest(canonical)),
            temperature_x1000: options.temperature.map(|t| (t * 1000.0) as u32),
            max_tokens: options.max_tokens,
        }
    }

    /// Convert to string for logging or file-based storage
    pub fn as_storage_key(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.model,
            self.digest,
            self.temperature_x1000.map(|t| t.to_string()).unwrap_or_default(),
            self.max_tokens.map(|t| t.to_string()).unwrap_or_default()
        )
    }
}

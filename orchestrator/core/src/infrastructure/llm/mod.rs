// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Inference adapters - Anti-Corruption Layer implementations of
// `InferenceProvider`.

pub mod openai;

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::llm::{GenerationOptions, GenerationResponse, InferenceError, InferenceProvider};
use crate::domain::node_config::{resolve_secret, InferenceConfig};

pub use openai::OpenAICompatibleInference;

/// Stand-in used when no endpoint is configured. Every call fails, so agents
/// degrade with `dependency_failure` and the coordinator falls back.
pub struct UnconfiguredInference;

#[async_trait]
impl InferenceProvider for UnconfiguredInference {
    async fn generate(
        &self,
        _prompt: &str,
        _options: &GenerationOptions,
    ) -> Result<GenerationResponse, InferenceError> {
        Err(InferenceError::Unconfigured)
    }

    async fn health_check(&self) -> Result<(), InferenceError> {
        Err(InferenceError::Unconfigured)
    }
}

/// Build the provider described by config.
pub fn from_config(config: Option<&InferenceConfig>) -> anyhow::Result<Arc<dyn InferenceProvider>> {
    match config {
        Some(config) => {
            let api_key = config.api_key.as_deref().map(resolve_secret).transpose()?;
            Ok(Arc::new(OpenAICompatibleInference::new(
                config.endpoint.clone(),
                api_key,
                config.model.clone(),
            )))
        }
        None => {
            tracing::warn!("No inference endpoint configured; agents will run degraded");
            Ok(Arc::new(UnconfiguredInference))
        }
    }
}

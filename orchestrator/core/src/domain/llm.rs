// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Inference service interface.
//!
//! The reasoning backend is a black box to the swarm: a prompt goes in,
//! structured text and a latency come out. Adapters live in
//! `infrastructure/llm/`; agents only ever reach them through a
//! [`crate::infrastructure::dependency_guard::DependencyGuard`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::domain::dependency::DependencyError;

#[async_trait]
pub trait InferenceProvider: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerationOptions,
    ) -> Result<GenerationResponse, InferenceError>;

    async fn health_check(&self) -> Result<(), InferenceError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub max_tokens: Option<u32>,

    /// 0.0 keeps recommendations reproducible.
    pub temperature: Option<f32>,

    /// Role-specific instructions sent ahead of the prompt.
    pub system: Option<String>,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            max_tokens: Some(1024),
            temperature: Some(0.0),
            system: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub usage: TokenUsage,
    pub model: String,
    pub latency: Duration,
    pub finish_reason: FinishReason,
}

#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    Length,
    ContentFilter,
}

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Inference service throttled the request")]
    Throttled,

    #[error("Inference service error: {0}")]
    Provider(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("No inference endpoint configured")]
    Unconfigured,
}

impl From<InferenceError> for DependencyError {
    fn from(err: InferenceError) -> Self {
        match err {
            InferenceError::InvalidResponse(detail) => DependencyError::Malformed(detail),
            other => DependencyError::Transient(other.to_string()),
        }
    }
}

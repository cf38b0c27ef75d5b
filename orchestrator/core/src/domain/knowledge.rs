// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Read-only historical precedent store queried by Diagnosis and Prediction.
//! An empty result is a valid answer, not an error.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::dependency::DependencyError;

/// A past incident and what fixed it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Precedent {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    /// Action that resolved the precedent.
    pub action: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Ids of causally related precedents.
    #[serde(default)]
    pub related: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPrecedent {
    pub precedent: Precedent,
    pub similarity: f64,
}

#[async_trait]
pub trait KnowledgeBase: Send + Sync {
    /// Most similar precedents first, at most `limit`.
    async fn similar(&self, query: &str, limit: usize) -> Result<Vec<ScoredPrecedent>, KnowledgeError>;

    async fn get(&self, id: &str) -> Result<Option<Precedent>, KnowledgeError>;
}

#[derive(Debug, thiserror::Error)]
pub enum KnowledgeError {
    #[error("Knowledge base unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt precedent record: {0}")]
    Corrupt(String),
}

impl From<KnowledgeError> for DependencyError {
    fn from(err: KnowledgeError) -> Self {
        match err {
            KnowledgeError::Unavailable(detail) => DependencyError::Transient(detail),
            KnowledgeError::Corrupt(detail) => DependencyError::Malformed(detail),
        }
    }
}

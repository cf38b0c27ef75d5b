// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Runtime Contract
//!
//! Uniform execution contract shared by the five swarm roles. An agent takes
//! an immutable [`IncidentContext`] snapshot, a hard [`Deadline`] and a
//! cancellation token, and always returns an [`AgentOutcome`]: either a full
//! [`AgentRecommendation`] or a [`DegradedRecommendation`] carrying a
//! [`ReasonCode`]. Agents never surface faults to the coordinator.
//!
//! Concrete role agents live in the `vigil-swarm` crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio_util::sync::CancellationToken;

use crate::domain::consensus::{ConsensusDecision, QuarantineReason};
use crate::domain::dependency::CircuitState;
use crate::domain::incident::{IncidentId, Severity};

type HmacSha256 = Hmac<Sha256>;

/// Upper bound on the confidence a degraded outcome may claim.
pub const MAX_DEGRADED_CONFIDENCE: f64 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Detection,
    Diagnosis,
    Prediction,
    Resolution,
    Communication,
}

impl AgentRole {
    pub const ALL: [AgentRole; 5] = [
        AgentRole::Detection,
        AgentRole::Diagnosis,
        AgentRole::Prediction,
        AgentRole::Resolution,
        AgentRole::Communication,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Detection => "detection",
            AgentRole::Diagnosis => "diagnosis",
            AgentRole::Prediction => "prediction",
            AgentRole::Resolution => "resolution",
            AgentRole::Communication => "communication",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentRole::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown agent role '{}'", s))
    }
}

/// A full-confidence proposal from one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecommendation {
    pub role: AgentRole,
    pub action: String,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
    pub produced_at: DateTime<Utc>,
    /// Event store version of the snapshot this was computed against.
    pub dependency_version: u64,
    /// Hex HMAC-SHA256 over [`AgentRecommendation::signing_payload`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl AgentRecommendation {
    pub fn new(
        role: AgentRole,
        action: impl Into<String>,
        confidence: f64,
        evidence: Vec<String>,
        dependency_version: u64,
    ) -> Self {
        Self {
            role,
            action: action.into(),
            confidence,
            evidence,
            produced_at: Utc::now(),
            dependency_version,
            signature: None,
        }
    }

    /// Canonical bytes covered by the signature.
    pub fn signing_payload(&self) -> Vec<u8> {
        serde_json::to_vec(&(
            self.role,
            &self.action,
            self.confidence,
            &self.evidence,
            self.produced_at.to_rfc3339(),
            self.dependency_version,
        ))
        .unwrap_or_default()
    }

    pub fn sign(&mut self, key: &[u8]) {
        self.signature = compute_mac(key, &self.signing_payload()).map(hex::encode);
    }

    pub fn signed(mut self, key: &[u8]) -> Self {
        self.sign(key);
        self
    }

    /// Constant-time check of the attached signature.
    pub fn verify_signature(&self, key: &[u8]) -> bool {
        let Some(signature) = self.signature.as_deref() else {
            return false;
        };
        let Ok(provided) = hex::decode(signature) else {
            return false;
        };
        match compute_mac(key, &self.signing_payload()) {
            Some(expected) => expected.ct_eq(&provided).into(),
            None => false,
        }
    }
}

fn compute_mac(key: &[u8], payload: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key).ok()?;
    mac.update(payload);
    Some(mac.finalize().into_bytes().to_vec())
}

/// Why an agent could not produce a full recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    CircuitOpen,
    RateLimited,
    Timeout,
    DeadlineExceeded,
    MalformedPayload,
    DependencyFailure,
    Cancelled,
    NoRecommendation,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::CircuitOpen => "circuit_open",
            ReasonCode::RateLimited => "rate_limited",
            ReasonCode::Timeout => "timeout",
            ReasonCode::DeadlineExceeded => "deadline_exceeded",
            ReasonCode::MalformedPayload => "malformed_payload",
            ReasonCode::DependencyFailure => "dependency_failure",
            ReasonCode::Cancelled => "cancelled",
            ReasonCode::NoRecommendation => "no_recommendation",
        }
    }
}

/// Low-confidence, explicitly flagged outcome used instead of failing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradedRecommendation {
    pub role: AgentRole,
    pub reason: ReasonCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_action: Option<String>,
    pub confidence: f64,
    pub detail: String,
    pub produced_at: DateTime<Utc>,
    pub dependency_version: u64,
}

impl DegradedRecommendation {
    pub fn new(role: AgentRole, reason: ReasonCode, detail: impl Into<String>, dependency_version: u64) -> Self {
        Self {
            role,
            reason,
            fallback_action: None,
            confidence: 0.0,
            detail: detail.into(),
            produced_at: Utc::now(),
            dependency_version,
        }
    }

    /// Attach a heuristic action; confidence is capped at [`MAX_DEGRADED_CONFIDENCE`].
    pub fn with_fallback(mut self, action: impl Into<String>, confidence: f64) -> Self {
        self.fallback_action = Some(action.into());
        self.confidence = confidence.clamp(0.0, MAX_DEGRADED_CONFIDENCE);
        self
    }
}

/// Tagged union every agent returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AgentOutcome {
    Recommended(AgentRecommendation),
    Degraded(DegradedRecommendation),
}

impl AgentOutcome {
    pub fn role(&self) -> AgentRole {
        match self {
            AgentOutcome::Recommended(r) => r.role,
            AgentOutcome::Degraded(d) => d.role,
        }
    }

    /// The action this outcome votes for, if any.
    pub fn action(&self) -> Option<&str> {
        match self {
            AgentOutcome::Recommended(r) => Some(r.action.as_str()),
            AgentOutcome::Degraded(d) => d.fallback_action.as_deref(),
        }
    }

    pub fn confidence(&self) -> f64 {
        match self {
            AgentOutcome::Recommended(r) => r.confidence,
            AgentOutcome::Degraded(d) => d.confidence,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, AgentOutcome::Degraded(_))
    }

    pub fn reason(&self) -> Option<ReasonCode> {
        match self {
            AgentOutcome::Recommended(_) => None,
            AgentOutcome::Degraded(d) => Some(d.reason),
        }
    }
}

/// Immutable snapshot handed to each agent of a level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentContext {
    pub incident_id: IncidentId,
    pub severity: Severity,
    pub title: String,
    pub business_impact: Option<String>,
    pub logs: Vec<String>,
    pub metrics: BTreeMap<String, f64>,
    pub prior_outcomes: Vec<AgentOutcome>,
    pub decision: Option<ConsensusDecision>,
    pub dependency_version: u64,
}

impl IncidentContext {
    pub fn outcome_of(&self, role: AgentRole) -> Option<&AgentOutcome> {
        self.prior_outcomes.iter().find(|o| o.role() == role)
    }
}

/// Local resource bounds every agent enforces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLimits {
    /// Log lines beyond this are deterministically sampled.
    #[serde(default = "default_max_log_lines")]
    pub max_log_lines: usize,

    #[serde(default = "default_max_correlation_depth")]
    pub max_correlation_depth: usize,

    #[serde(default = "default_max_prompt_bytes")]
    pub max_prompt_bytes: usize,

    #[serde(default = "default_knowledge_results")]
    pub knowledge_results: usize,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_log_lines: default_max_log_lines(),
            max_correlation_depth: default_max_correlation_depth(),
            max_prompt_bytes: default_max_prompt_bytes(),
            knowledge_results: default_knowledge_results(),
        }
    }
}

fn default_max_log_lines() -> usize {
    400
}

fn default_max_correlation_depth() -> usize {
    3
}

fn default_max_prompt_bytes() -> usize {
    16 * 1024
}

fn default_knowledge_results() -> usize {
    5
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("agent deadline exceeded")]
pub struct DeadlineExceeded;

/// Hard wall-clock deadline passed down from the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: tokio::time::Instant,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: tokio::time::Instant::now() + budget,
        }
    }

    pub fn at(instant: tokio::time::Instant) -> Self {
        Self { at: instant }
    }

    pub fn instant(&self) -> tokio::time::Instant {
        self.at
    }

    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(tokio::time::Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        tokio::time::Instant::now() >= self.at
    }

    /// Run `fut` to completion or fail once the deadline passes. No partial
    /// output survives an expiry.
    pub async fn run<F>(self, fut: F) -> Result<F::Output, DeadlineExceeded>
    where
        F: std::future::Future,
    {
        tokio::time::timeout_at(self.at, fut)
            .await
            .map_err(|_| DeadlineExceeded)
    }
}

/// The uniform agent contract.
#[async_trait]
pub trait Agent: Send + Sync {
    fn role(&self) -> AgentRole;

    async fn execute(
        &self,
        context: Arc<IncidentContext>,
        deadline: Deadline,
        cancel: CancellationToken,
    ) -> AgentOutcome;
}

/// Health summary for one role within one incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentHealth {
    pub role: AgentRole,
    pub circuit_state: CircuitState,
    pub consecutive_failures: u32,
    pub last_latency_ms: Option<u64>,
    pub quarantined: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quarantine_reason: Option<QuarantineReason>,
}

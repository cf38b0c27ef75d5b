// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # External Dependency Vocabulary
//!
//! Every outbound call leaves the swarm through exactly one
//! [`crate::infrastructure::dependency_guard::DependencyGuard`], keyed by a
//! [`DependencyId`]. This module holds the identity, the priority classes the
//! rate limiter understands, the breaker state machine labels and the error
//! type every guarded call returns.
//!
//! | Dependency | Identity |
//! |------------|----------|
//! | Inference service, per agent role | `inference:<role>` |
//! | Knowledge base | `knowledge-base` |
//! | Notification channel | `notify:<channel>` |

use crate::domain::agent::{AgentRole, ReasonCode};
use crate::domain::incident::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Stable identity of an external dependency.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyId(String);

impl DependencyId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn inference(role: AgentRole) -> Self {
        Self(format!("inference:{}", role.as_str()))
    }

    pub fn knowledge_base() -> Self {
        Self("knowledge-base".to_string())
    }

    pub fn notification(channel: &str) -> Self {
        Self(format!("notify:{}", channel))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Priority class used by the token bucket in front of each breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallPriority {
    High,
    Normal,
    Low,
}

impl CallPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallPriority::High => "high",
            CallPriority::Normal => "normal",
            CallPriority::Low => "low",
        }
    }
}

impl From<Severity> for CallPriority {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::Sev1 | Severity::Sev2 => CallPriority::High,
            Severity::Sev3 => CallPriority::Normal,
            Severity::Sev4 => CallPriority::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

/// Breaker tuning for one dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures in CLOSED that trip the breaker.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// How long OPEN rejects calls before admitting trials.
    #[serde(default = "default_cooldown", with = "humantime_serde")]
    pub cooldown: Duration,

    /// Trial calls admitted in HALF_OPEN; this many successes close it.
    #[serde(default = "default_half_open_trials")]
    pub half_open_trials: u32,

    /// Per-call timeout enforced inside the guard.
    #[serde(default = "default_call_timeout", with = "humantime_serde")]
    pub call_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown: default_cooldown(),
            half_open_trials: default_half_open_trials(),
            call_timeout: default_call_timeout(),
        }
    }
}

/// Token bucket tuning for one dependency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Fraction of the bucket NORMAL traffic may consume.
    #[serde(default = "default_normal_share")]
    pub normal_share: f64,

    /// Fraction of the bucket LOW traffic may consume.
    #[serde(default = "default_low_share")]
    pub low_share: f64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_requests_per_second(),
            burst: default_burst(),
            normal_share: default_normal_share(),
            low_share: default_low_share(),
        }
    }
}

/// The breaker+limiter pair for one dependency.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Errors surfaced by a guarded dependency call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DependencyError {
    #[error("Rate limit exhausted for {dependency}")]
    RateLimited { dependency: DependencyId },

    #[error("Circuit open for {dependency}")]
    CircuitOpen { dependency: DependencyId },

    #[error("Call to {dependency} timed out after {after_ms}ms")]
    Timeout { dependency: DependencyId, after_ms: u64 },

    #[error("Transient dependency failure: {0}")]
    Transient(String),

    #[error("Malformed dependency payload: {0}")]
    Malformed(String),
}

impl DependencyError {
    /// Whether the breaker should count this outcome as a failure.
    /// Rejections produced by the guard itself never do.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            DependencyError::Timeout { .. }
                | DependencyError::Transient(_)
                | DependencyError::Malformed(_)
        )
    }

    pub fn reason_code(&self) -> ReasonCode {
        match self {
            DependencyError::RateLimited { .. } => ReasonCode::RateLimited,
            DependencyError::CircuitOpen { .. } => ReasonCode::CircuitOpen,
            DependencyError::Timeout { .. } => ReasonCode::Timeout,
            DependencyError::Transient(_) => ReasonCode::DependencyFailure,
            DependencyError::Malformed(_) => ReasonCode::MalformedPayload,
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown() -> Duration {
    Duration::from_secs(30)
}

fn default_half_open_trials() -> u32 {
    2
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_requests_per_second() -> u32 {
    10
}

fn default_burst() -> u32 {
    20
}

fn default_normal_share() -> f64 {
    0.75
}

fn default_low_share() -> f64 {
    0.5
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependency_ids_are_keyed_by_role_and_channel() {
        assert_eq!(DependencyId::inference(AgentRole::Diagnosis).as_str(), "inference:diagnosis");
        assert_eq!(DependencyId::notification("pager").as_str(), "notify:pager");
        assert_eq!(DependencyId::knowledge_base().to_string(), "knowledge-base");
    }

    #[test]
    fn test_guard_rejections_do_not_count_as_failures() {
        let dep = DependencyId::knowledge_base();
        assert!(!DependencyError::RateLimited { dependency: dep.clone() }.counts_as_failure());
        assert!(!DependencyError::CircuitOpen { dependency: dep.clone() }.counts_as_failure());
        assert!(DependencyError::Timeout { dependency: dep, after_ms: 10 }.counts_as_failure());
        assert!(DependencyError::Malformed("bad".into()).counts_as_failure());
    }

    #[test]
    fn test_severity_maps_to_priority() {
        assert_eq!(CallPriority::from(Severity::Sev1), CallPriority::High);
        assert_eq!(CallPriority::from(Severity::Sev3), CallPriority::Normal);
        assert_eq!(CallPriority::from(Severity::Sev4), CallPriority::Low);
    }
}

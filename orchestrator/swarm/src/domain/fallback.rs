// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Heuristic fallback actions for roles that come back degraded.
//!
//! The last action a role recommended successfully is preferred; otherwise
//! the configured static heuristic applies. Confidence of a fallback is
//! always capped at [`MAX_DEGRADED_CONFIDENCE`].

use dashmap::DashMap;
use vigil_core::domain::agent::{AgentOutcome, AgentRole, DegradedRecommendation, ReasonCode, MAX_DEGRADED_CONFIDENCE};
use vigil_core::domain::node_config::FallbackConfig;

pub struct FallbackCache {
    config: FallbackConfig,
    last_success: DashMap<AgentRole, String>,
}

impl FallbackCache {
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            config,
            last_success: DashMap::new(),
        }
    }

    pub fn record_success(&self, role: AgentRole, action: &str) {
        self.last_success.insert(role, action.to_string());
    }

    pub fn action_for(&self, role: AgentRole) -> Option<String> {
        self.last_success
            .get(&role)
            .map(|a| a.value().clone())
            .or_else(|| self.config.actions.get(&role).cloned())
    }

    /// Attach a fallback action to a degraded outcome that has none.
    /// Cancelled outcomes are left alone; the operator asked them to stop.
    pub fn complete(&self, outcome: AgentOutcome) -> AgentOutcome {
        match outcome {
            AgentOutcome::Recommended(rec) => {
                self.record_success(rec.role, &rec.action);
                AgentOutcome::Recommended(rec)
            }
            AgentOutcome::Degraded(degraded)
                if degraded.fallback_action.is_none() && degraded.reason != ReasonCode::Cancelled =>
            {
                AgentOutcome::Degraded(self.apply(degraded))
            }
            other => other,
        }
    }

    fn apply(&self, degraded: DegradedRecommendation) -> DegradedRecommendation {
        match self.action_for(degraded.role) {
            Some(action) => degraded.with_fallback(action, self.config.confidence.min(MAX_DEGRADED_CONFIDENCE)),
            None => degraded,
        }
    }
}

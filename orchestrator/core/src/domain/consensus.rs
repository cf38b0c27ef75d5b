// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Consensus vocabulary shared by the engine (in `vigil-swarm`), the event
//! stream and observers.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::agent::AgentRole;

/// The two voting rounds of an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsensusRound {
    /// Runs after Diagnosis and Prediction.
    Analysis,
    /// Ratifies the Resolution agent's plan before communication.
    Resolution,
}

impl ConsensusRound {
    pub fn participants(&self) -> &'static [AgentRole] {
        match self {
            ConsensusRound::Analysis => &[
                AgentRole::Detection,
                AgentRole::Diagnosis,
                AgentRole::Prediction,
            ],
            ConsensusRound::Resolution => &[
                AgentRole::Detection,
                AgentRole::Diagnosis,
                AgentRole::Prediction,
                AgentRole::Resolution,
            ],
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConsensusRound::Analysis => "analysis",
            ConsensusRound::Resolution => "resolution",
        }
    }
}

/// One role's contribution to a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleVote {
    pub role: AgentRole,
    pub action: Option<String>,
    pub confidence: f64,
    /// Weight after normalization over the round's participants.
    pub weight: f64,
    /// `weight * confidence` when counted, else 0.
    pub contribution: f64,
    pub counted: bool,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QuarantineReason {
    /// Confidence out of range, empty action, or mismatched role.
    Malformed { detail: String },
    /// Missing or invalid HMAC while signatures are required.
    InvalidSignature,
    /// Contradicts every peer and deviates beyond `k` standard deviations.
    Outlier { z_score: f64, embedding_distance: f64 },
}

impl QuarantineReason {
    pub fn label(&self) -> &'static str {
        match self {
            QuarantineReason::Malformed { .. } => "malformed",
            QuarantineReason::InvalidSignature => "invalid_signature",
            QuarantineReason::Outlier { .. } => "outlier",
        }
    }
}

/// Why an incident was handed to humans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EscalationReason {
    /// Quarantined plus non-responsive roles exceed `floor((n-1)/3)`.
    QuorumLost { faulty: usize, tolerated: usize },
    InsufficientWeight { surviving: f64, required: f64 },
    NoConsensus { best_score: f64, threshold: f64 },
    /// Every agent of a level came back without a usable action.
    AgentsExhausted { level: usize },
    OperatorAbort { operator: String },
}

impl EscalationReason {
    pub fn label(&self) -> &'static str {
        match self {
            EscalationReason::QuorumLost { .. } => "quorum_lost",
            EscalationReason::InsufficientWeight { .. } => "insufficient_weight",
            EscalationReason::NoConsensus { .. } => "no_consensus",
            EscalationReason::AgentsExhausted { .. } => "agents_exhausted",
            EscalationReason::OperatorAbort { .. } => "operator_abort",
        }
    }
}

/// Result of one consensus round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusDecision {
    pub round: ConsensusRound,
    pub action: Option<String>,
    pub score: f64,
    pub votes: Vec<RoleVote>,
    /// Combined score per candidate action.
    pub scores: BTreeMap<String, f64>,
    pub quarantined: Vec<AgentRole>,
    pub reached: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationReason>,
    pub dependency_version: u64,
}

/// Tuning for the consensus engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusConfig {
    #[serde(default = "default_weights")]
    pub weights: BTreeMap<AgentRole, f64>,

    /// Minimum combined score of the winning action.
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f64,

    /// Minimum share of normalized participant weight that must survive quarantine.
    #[serde(default = "default_quorum_weight")]
    pub quorum_weight: f64,

    /// Standard deviations beyond which a contradicting vote is an outlier.
    #[serde(default = "default_outlier_k")]
    pub outlier_k: f64,

    #[serde(default = "default_std_floor")]
    pub std_floor: f64,

    /// Valid votes required before outlier detection applies.
    #[serde(default = "default_min_peers")]
    pub min_peers: usize,

    #[serde(default)]
    pub require_signatures: bool,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            weights: default_weights(),
            acceptance_threshold: default_acceptance_threshold(),
            quorum_weight: default_quorum_weight(),
            outlier_k: default_outlier_k(),
            std_floor: default_std_floor(),
            min_peers: default_min_peers(),
            require_signatures: false,
        }
    }
}

impl ConsensusConfig {
    pub fn weight(&self, role: AgentRole) -> f64 {
        self.weights.get(&role).copied().unwrap_or(0.0)
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some((role, w)) = self
            .weights
            .iter()
            .find(|(_, w)| !w.is_finite() || **w < 0.0)
        {
            return Err(format!("weight for {} must be a non-negative number, got {}", role, w));
        }
        for round in [ConsensusRound::Analysis, ConsensusRound::Resolution] {
            let total: f64 = round.participants().iter().map(|r| self.weight(*r)).sum();
            if total <= 0.0 {
                return Err(format!("{} round has zero total weight", round.as_str()));
            }
        }
        for (name, value) in [
            ("acceptance_threshold", self.acceptance_threshold),
            ("quorum_weight", self.quorum_weight),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{} must be within [0, 1], got {}", name, value));
            }
        }
        if self.outlier_k <= 0.0 || self.std_floor <= 0.0 {
            return Err("outlier_k and std_floor must be positive".to_string());
        }
        Ok(())
    }
}

fn default_weights() -> BTreeMap<AgentRole, f64> {
    BTreeMap::from([
        (AgentRole::Diagnosis, 0.4),
        (AgentRole::Prediction, 0.3),
        (AgentRole::Detection, 0.2),
        (AgentRole::Resolution, 0.1),
        (AgentRole::Communication, 0.0),
    ])
}

fn default_acceptance_threshold() -> f64 {
    0.5
}

fn default_quorum_weight() -> f64 {
    0.5
}

fn default_outlier_k() -> f64 {
    2.0
}

fn default_std_floor() -> f64 {
    0.05
}

fn default_min_peers() -> usize {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ConsensusConfig::default().validate().is_ok());
    }

    #[test]
    fn test_negative_weight_is_rejected() {
        let mut config = ConsensusConfig::default();
        config.weights.insert(AgentRole::Detection, -0.1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolution_round_includes_resolution_role() {
        assert!(ConsensusRound::Resolution
            .participants()
            .contains(&AgentRole::Resolution));
        assert!(!ConsensusRound::Analysis
            .participants()
            .contains(&AgentRole::Resolution));
    }
}

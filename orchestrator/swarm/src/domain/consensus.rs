// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Consensus Engine
//!
//! Combines the latest outcome of each participating role into one
//! [`ConsensusDecision`]. Evaluation is a pure function of its inputs:
//!
//! 1. **Screening**: malformed or badly signed recommendations are
//!    quarantined.
//! 2. **Outliers**: with at least `min_peers` valid votes, a vote whose
//!    action contradicts every peer and whose confidence sits more than
//!    `outlier_k` standard deviations from the peer mean is quarantined.
//! 3. **Tolerance**: with `n` participants, `f = floor((n - 1) / 3)`. More
//!    than `f` quarantined or non-responsive roles escalate with
//!    `QuorumLost`; surviving weight under `quorum_weight` escalates with
//!    `InsufficientWeight`.
//! 4. **Scoring**: each action scores the sum of normalized weight times
//!    confidence over counted votes. The best action must reach
//!    `acceptance_threshold`, else `NoConsensus`.
//!
//! Ties are broken by action name so the outcome never depends on map order.

use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};
use vigil_core::domain::agent::{AgentOutcome, AgentRecommendation, AgentRole};
use vigil_core::domain::consensus::{
    ConsensusConfig, ConsensusDecision, ConsensusRound, EscalationReason, QuarantineReason, RoleVote,
};

/// Decision plus the roles this evaluation newly quarantined.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub decision: ConsensusDecision,
    pub newly_quarantined: Vec<(AgentRole, QuarantineReason)>,
}

pub struct ConsensusEngine {
    config: ConsensusConfig,
    signing_keys: HashMap<AgentRole, Vec<u8>>,
}

/// A vote that passed screening.
struct Candidate {
    role: AgentRole,
    action: String,
    confidence: f64,
    degraded: bool,
}

impl ConsensusEngine {
    pub fn new(config: ConsensusConfig) -> Self {
        Self {
            config,
            signing_keys: HashMap::new(),
        }
    }

    pub fn with_signing_keys(mut self, keys: impl IntoIterator<Item = (AgentRole, Vec<u8>)>) -> Self {
        self.signing_keys = keys.into_iter().collect();
        self
    }

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    /// Evaluate a round over its standard participants.
    pub fn decide(
        &self,
        round: ConsensusRound,
        outcomes: &BTreeMap<AgentRole, AgentOutcome>,
        quarantined: &BTreeMap<AgentRole, QuarantineReason>,
        dependency_version: u64,
    ) -> Evaluation {
        self.evaluate(round, round.participants(), outcomes, quarantined, dependency_version)
    }

    /// Evaluate over an explicit participant set.
    pub fn evaluate(
        &self,
        round: ConsensusRound,
        participants: &[AgentRole],
        outcomes: &BTreeMap<AgentRole, AgentOutcome>,
        quarantined: &BTreeMap<AgentRole, QuarantineReason>,
        dependency_version: u64,
    ) -> Evaluation {
        let total_weight: f64 = participants.iter().map(|r| self.config.weight(*r)).sum();
        let normalized = |role: AgentRole| {
            if total_weight > 0.0 {
                self.config.weight(role) / total_weight
            } else {
                0.0
            }
        };

        let mut newly_quarantined: Vec<(AgentRole, QuarantineReason)> = Vec::new();
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut non_responsive = 0usize;

        for &role in participants {
            if quarantined.contains_key(&role) {
                continue;
            }
            match outcomes.get(&role) {
                None => non_responsive += 1,
                Some(AgentOutcome::Degraded(degraded)) => match &degraded.fallback_action {
                    Some(action) => candidates.push(Candidate {
                        role,
                        action: action.clone(),
                        confidence: degraded.confidence,
                        degraded: true,
                    }),
                    None => non_responsive += 1,
                },
                Some(AgentOutcome::Recommended(rec)) => match self.screen(role, rec) {
                    Ok(()) => candidates.push(Candidate {
                        role,
                        action: rec.action.clone(),
                        confidence: rec.confidence,
                        degraded: false,
                    }),
                    Err(reason) => newly_quarantined.push((role, reason)),
                },
            }
        }

        for (role, reason) in self.find_outliers(&candidates) {
            candidates.retain(|c| c.role != role);
            newly_quarantined.push((role, reason));
        }
        newly_quarantined.sort_by_key(|(role, _)| *role);

        for (role, reason) in &newly_quarantined {
            warn!(role = %role, round = round.as_str(), reason = reason.label(), "Quarantining agent");
            metrics::counter!("vigil_quarantines_total", "reason" => reason.label()).increment(1);
        }

        let counted: BTreeMap<AgentRole, &Candidate> = candidates.iter().map(|c| (c.role, c)).collect();
        let votes: Vec<RoleVote> = participants
            .iter()
            .map(|&role| {
                let weight = normalized(role);
                match counted.get(&role) {
                    Some(c) => RoleVote {
                        role,
                        action: Some(c.action.clone()),
                        confidence: c.confidence,
                        weight,
                        contribution: weight * c.confidence,
                        counted: true,
                        degraded: c.degraded,
                    },
                    None => RoleVote {
                        role,
                        action: outcomes.get(&role).and_then(|o| o.action()).map(str::to_string),
                        confidence: outcomes.get(&role).map(|o| o.confidence()).unwrap_or(0.0),
                        weight,
                        contribution: 0.0,
                        counted: false,
                        degraded: outcomes.get(&role).is_some_and(|o| o.is_degraded()),
                    },
                }
            })
            .collect();

        let mut scores: BTreeMap<String, f64> = BTreeMap::new();
        for vote in votes.iter().filter(|v| v.counted) {
            if let Some(action) = &vote.action {
                *scores.entry(action.clone()).or_insert(0.0) += vote.contribution;
            }
        }
        let best = scores
            .iter()
            .fold(None::<(&String, f64)>, |best, (action, score)| match best {
                Some((_, top)) if *score <= top => best,
                _ => Some((action, *score)),
            })
            .map(|(action, score)| (action.clone(), score));

        let all_quarantined: Vec<AgentRole> = participants
            .iter()
            .copied()
            .filter(|r| quarantined.contains_key(r) || newly_quarantined.iter().any(|(q, _)| q == r))
            .collect();

        let n = participants.len();
        let tolerated = n.saturating_sub(1) / 3;
        let faulty = all_quarantined.len() + non_responsive;
        let surviving: f64 = votes.iter().filter(|v| v.counted).map(|v| v.weight).sum();
        let best_score = best.as_ref().map(|(_, s)| *s).unwrap_or(0.0);

        let escalation = if faulty > tolerated {
            Some(EscalationReason::QuorumLost { faulty, tolerated })
        } else if surviving + f64::EPSILON < self.config.quorum_weight {
            Some(EscalationReason::InsufficientWeight {
                surviving,
                required: self.config.quorum_weight,
            })
        } else if best_score + f64::EPSILON < self.config.acceptance_threshold {
            Some(EscalationReason::NoConsensus {
                best_score,
                threshold: self.config.acceptance_threshold,
            })
        } else {
            None
        };

        let reached = escalation.is_none();
        let outcome = escalation.as_ref().map(|e| e.label()).unwrap_or("reached");
        metrics::counter!("vigil_consensus_rounds_total", "round" => round.as_str(), "outcome" => outcome)
            .increment(1);
        info!(
            round = round.as_str(),
            outcome,
            best_score,
            faulty,
            tolerated,
            surviving_weight = surviving,
            "Consensus evaluated"
        );

        Evaluation {
            decision: ConsensusDecision {
                round,
                action: if reached { best.map(|(a, _)| a) } else { None },
                score: best_score,
                votes,
                scores,
                quarantined: all_quarantined,
                reached,
                escalation,
                dependency_version,
            },
            newly_quarantined,
        }
    }

    fn screen(&self, role: AgentRole, rec: &AgentRecommendation) -> Result<(), QuarantineReason> {
        if rec.role != role {
            return Err(QuarantineReason::Malformed {
                detail: format!("recommendation from {} filed under {}", rec.role, role),
            });
        }
        if !rec.confidence.is_finite() || !(0.0..=1.0).contains(&rec.confidence) {
            return Err(QuarantineReason::Malformed {
                detail: format!("confidence {} outside [0, 1]", rec.confidence),
            });
        }
        if rec.action.trim().is_empty() {
            return Err(QuarantineReason::Malformed {
                detail: "empty action".to_string(),
            });
        }

        match (self.signing_keys.get(&role), rec.signature.is_some()) {
            (Some(key), true) if !rec.verify_signature(key) => Err(QuarantineReason::InvalidSignature),
            (None, true) if self.config.require_signatures => Err(QuarantineReason::InvalidSignature),
            (_, false) if self.config.require_signatures => Err(QuarantineReason::InvalidSignature),
            _ => Ok(()),
        }
    }

    /// Votes contradicting every peer with a confidence beyond `outlier_k`
    /// standard deviations of the peer mean. Only full recommendations are
    /// judged; degraded fallbacks still count as peers.
    fn find_outliers(&self, candidates: &[Candidate]) -> Vec<(AgentRole, QuarantineReason)> {
        if candidates.len() < self.config.min_peers.max(2) {
            return Vec::new();
        }

        candidates
            .iter()
            .filter(|c| !c.degraded)
            .filter_map(|candidate| {
                let peers: Vec<&Candidate> = candidates.iter().filter(|p| p.role != candidate.role).collect();
                if peers.iter().any(|p| p.action == candidate.action) {
                    return None;
                }

                let count = peers.len() as f64;
                let mean = peers.iter().map(|p| p.confidence).sum::<f64>() / count;
                let variance = peers.iter().map(|p| (p.confidence - mean).powi(2)).sum::<f64>() / count;
                let std = variance.sqrt().max(self.config.std_floor);
                let z_score = (candidate.confidence - mean).abs() / std;
                if z_score <= self.config.outlier_k {
                    return None;
                }

                // Vectors are confidence * one-hot(action); actions differ, so
                // each distance is the hypotenuse of the two confidences.
                let embedding_distance = peers
                    .iter()
                    .map(|p| (candidate.confidence.powi(2) + p.confidence.powi(2)).sqrt())
                    .sum::<f64>()
                    / count;

                Some((
                    candidate.role,
                    QuarantineReason::Outlier {
                        z_score,
                        embedding_distance,
                    },
                ))
            })
            .collect()
    }
}

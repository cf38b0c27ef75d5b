// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::collections::BTreeMap;
use vigil_core::domain::agent::{AgentOutcome, AgentRecommendation, AgentRole};
use vigil_core::domain::consensus::{ConsensusConfig, ConsensusRound, EscalationReason, QuarantineReason};
use vigil_swarm::ConsensusEngine;

fn vote(role: AgentRole, action: &str, confidence: f64) -> (AgentRole, AgentOutcome) {
    (
        role,
        AgentOutcome::Recommended(AgentRecommendation::new(role, action, confidence, vec![], 9)),
    )
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

#[test]
fn test_conflicting_votes_resolve_by_weight() {
    let engine = ConsensusEngine::new(ConsensusConfig::default());
    let outcomes = BTreeMap::from([
        vote(AgentRole::Diagnosis, "A", 0.9),
        vote(AgentRole::Prediction, "B", 0.8),
        vote(AgentRole::Detection, "A", 0.7),
        vote(AgentRole::Resolution, "A", 0.6),
    ]);

    let eval = engine.decide(ConsensusRound::Resolution, &outcomes, &BTreeMap::new(), 9);
    let decision = eval.decision;

    assert!(eval.newly_quarantined.is_empty());
    assert!(decision.reached);
    assert_eq!(decision.action.as_deref(), Some("A"));
    assert!(close(decision.scores["A"], 0.56));
    assert!(close(decision.scores["B"], 0.24));
    assert!(close(decision.score, 0.56));
    assert_eq!(decision.dependency_version, 9);
}

#[test]
fn test_confident_contrarian_is_quarantined_and_round_recomputed() {
    let engine = ConsensusEngine::new(ConsensusConfig::default());
    let outcomes = BTreeMap::from([
        vote(AgentRole::Detection, "X", 0.99),
        vote(AgentRole::Diagnosis, "A", 0.8),
        vote(AgentRole::Prediction, "A", 0.82),
        vote(AgentRole::Resolution, "A", 0.78),
        vote(AgentRole::Communication, "A", 0.81),
    ]);

    let eval = engine.evaluate(
        ConsensusRound::Resolution,
        &AgentRole::ALL,
        &outcomes,
        &BTreeMap::new(),
        12,
    );

    assert_eq!(eval.newly_quarantined.len(), 1);
    let (role, reason) = &eval.newly_quarantined[0];
    assert_eq!(*role, AgentRole::Detection);
    let QuarantineReason::Outlier {
        z_score,
        embedding_distance,
    } = reason
    else {
        panic!("expected an outlier quarantine, got {:?}", reason);
    };
    assert!(*z_score > 2.0);
    assert!(*embedding_distance > 0.99);

    let decision = eval.decision;
    assert!(decision.reached);
    assert_eq!(decision.action.as_deref(), Some("A"));
    assert!(close(decision.score, 0.4 * 0.8 + 0.3 * 0.82 + 0.1 * 0.78));
    assert!(!decision.scores.contains_key("X"));
    assert_eq!(decision.quarantined, vec![AgentRole::Detection]);
    let detection = decision.votes.iter().find(|v| v.role == AgentRole::Detection).unwrap();
    assert!(!detection.counted);
    assert_eq!(detection.contribution, 0.0);
}

#[test]
fn test_three_voter_analysis_round_is_screened() {
    let engine = ConsensusEngine::new(ConsensusConfig::default());
    let outcomes = BTreeMap::from([
        vote(AgentRole::Detection, "X", 0.99),
        vote(AgentRole::Diagnosis, "A", 0.8),
        vote(AgentRole::Prediction, "A", 0.82),
    ]);

    let eval = engine.decide(ConsensusRound::Analysis, &outcomes, &BTreeMap::new(), 4);

    assert_eq!(eval.newly_quarantined.len(), 1);
    assert_eq!(eval.newly_quarantined[0].0, AgentRole::Detection);
    assert!(matches!(eval.newly_quarantined[0].1, QuarantineReason::Outlier { .. }));
    assert_eq!(
        eval.decision.escalation,
        Some(EscalationReason::QuorumLost { faulty: 1, tolerated: 0 })
    );
}

#[test]
fn test_contrarian_within_spread_is_kept() {
    let engine = ConsensusEngine::new(ConsensusConfig::default());
    let outcomes = BTreeMap::from([
        vote(AgentRole::Detection, "X", 0.7),
        vote(AgentRole::Diagnosis, "A", 0.9),
        vote(AgentRole::Prediction, "A", 0.5),
        vote(AgentRole::Resolution, "A", 0.6),
        vote(AgentRole::Communication, "A", 0.8),
    ]);

    let eval = engine.evaluate(ConsensusRound::Resolution, &AgentRole::ALL, &outcomes, &BTreeMap::new(), 3);
    assert!(eval.newly_quarantined.is_empty());
    assert!(eval.decision.scores.contains_key("X"));
}

#[test]
fn test_five_roles_tolerate_exactly_one_fault() {
    let engine = ConsensusEngine::new(ConsensusConfig::default());
    let outcomes = BTreeMap::from([
        vote(AgentRole::Detection, "A", 0.8),
        vote(AgentRole::Diagnosis, "A", 0.8),
        vote(AgentRole::Prediction, "A", 0.8),
        vote(AgentRole::Resolution, "A", 0.8),
        vote(AgentRole::Communication, "A", 0.8),
    ]);
    let malformed = || QuarantineReason::Malformed {
        detail: "earlier round".into(),
    };

    let one = BTreeMap::from([(AgentRole::Prediction, malformed())]);
    let decision = engine
        .evaluate(ConsensusRound::Resolution, &AgentRole::ALL, &outcomes, &one, 5)
        .decision;
    assert!(decision.reached);
    assert_eq!(decision.action.as_deref(), Some("A"));
    assert!(close(decision.score, (0.4 + 0.2 + 0.1) * 0.8));

    let two = BTreeMap::from([(AgentRole::Prediction, malformed()), (AgentRole::Detection, malformed())]);
    let decision = engine
        .evaluate(ConsensusRound::Resolution, &AgentRole::ALL, &outcomes, &two, 5)
        .decision;
    assert!(!decision.reached);
    assert!(decision.action.is_none());
    assert_eq!(
        decision.escalation,
        Some(EscalationReason::QuorumLost { faulty: 2, tolerated: 1 })
    );
}

#[test]
fn test_missing_outcome_counts_as_non_responsive() {
    let engine = ConsensusEngine::new(ConsensusConfig::default());
    let outcomes = BTreeMap::from([
        vote(AgentRole::Detection, "A", 0.9),
        vote(AgentRole::Diagnosis, "A", 0.9),
    ]);
    let decision = engine
        .decide(ConsensusRound::Analysis, &outcomes, &BTreeMap::new(), 2)
        .decision;
    assert_eq!(
        decision.escalation,
        Some(EscalationReason::QuorumLost { faulty: 1, tolerated: 0 })
    );
}

#[test]
fn test_low_scores_end_without_consensus() {
    let engine = ConsensusEngine::new(ConsensusConfig::default());
    let outcomes = BTreeMap::from([
        vote(AgentRole::Detection, "A", 0.3),
        vote(AgentRole::Diagnosis, "B", 0.35),
        vote(AgentRole::Prediction, "C", 0.4),
    ]);
    let decision = engine
        .decide(ConsensusRound::Analysis, &outcomes, &BTreeMap::new(), 2)
        .decision;
    assert!(!decision.reached);
    assert!(decision.quarantined.is_empty());
    assert!(matches!(decision.escalation, Some(EscalationReason::NoConsensus { .. })));
}

#[test]
fn test_evaluation_is_deterministic() {
    let engine = ConsensusEngine::new(ConsensusConfig::default());
    let outcomes = BTreeMap::from([
        vote(AgentRole::Detection, "A", 0.6),
        vote(AgentRole::Diagnosis, "B", 0.6),
        vote(AgentRole::Prediction, "A", 0.4),
    ]);
    let first = engine.decide(ConsensusRound::Analysis, &outcomes, &BTreeMap::new(), 1);
    let second = engine.decide(ConsensusRound::Analysis, &outcomes, &BTreeMap::new(), 1);
    assert_eq!(first, second);
}

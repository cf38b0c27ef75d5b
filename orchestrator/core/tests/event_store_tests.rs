// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Integration tests for the in-memory event store and incident replay.
//!
//! - concurrent appends at the same version: exactly one wins
//! - different incidents never contend
//! - replaying the same stream twice yields identical state

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Barrier;
use vigil_core::application::{EventLog, NoopPublisher};
use vigil_core::domain::agent::{AgentOutcome, AgentRecommendation, AgentRole, DegradedRecommendation, ReasonCode};
use vigil_core::domain::events::{verify_chain, EventKind};
use vigil_core::domain::incident::{Incident, IncidentId, IncidentReport, IncidentState, Severity};
use vigil_core::domain::repository::{EventStore, EventStoreError};
use vigil_core::infrastructure::InMemoryEventStore;

fn report() -> IncidentReport {
    let mut metrics = BTreeMap::new();
    metrics.insert("error_rate".to_string(), 0.137);
    metrics.insert("p99_latency_ms".to_string(), 2450.0);
    IncidentReport {
        title: "Payments API 5xx spike".into(),
        severity: Severity::Sev1,
        business_impact: Some("card checkout failing".into()),
        logs: vec!["upstream connect error".into(), "retry budget exhausted".into()],
        metrics,
        source: Some("alertmanager".into()),
    }
}

fn transition(from: IncidentState, to: IncidentState) -> EventKind {
    EventKind::IncidentStateChanged {
        from,
        to,
        reason: None,
        history: vec![],
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_appends_at_same_version_exactly_one_wins() {
    let store = Arc::new(InMemoryEventStore::new());
    let id = IncidentId::new();
    store
        .append(
            &id,
            0,
            EventKind::IncidentOpened {
                report: report(),
                operator: "oncall".into(),
            },
        )
        .await
        .unwrap();

    let barrier = Arc::new(Barrier::new(2));
    let mut handles = Vec::new();
    for _ in 0..2 {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            store
                .append(&id, 1, transition(IncidentState::New, IncidentState::Detecting))
                .await
        }));
    }

    let mut wins = 0;
    let mut conflicts = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(event) => {
                assert_eq!(event.sequence, 2);
                wins += 1;
            }
            Err(EventStoreError::VersionConflict { expected, actual, .. }) => {
                assert_eq!((expected, actual), (1, 2));
                conflicts += 1;
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!((wins, conflicts), (1, 1));

    let events = store.read(&id).await.unwrap();
    assert_eq!(events.len(), 2);
    assert!(verify_chain(&id, &events).is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_independent_incidents_do_not_conflict() {
    let store = Arc::new(InMemoryEventStore::new());
    let mut handles = Vec::new();
    for _ in 0..16 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let id = IncidentId::new();
            store
                .append(
                    &id,
                    0,
                    EventKind::IncidentOpened {
                        report: report(),
                        operator: "oncall".into(),
                    },
                )
                .await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().sequence, 1);
    }
    assert_eq!(store.incident_ids().await.unwrap().len(), 16);
}

#[tokio::test]
async fn test_replay_is_idempotent() {
    let log = EventLog::new(Arc::new(InMemoryEventStore::new()), Arc::new(NoopPublisher));
    let opened = log.open(report(), "oncall").await.unwrap();
    let id = opened.incident_id;

    let recommendation = AgentRecommendation::new(
        AgentRole::Detection,
        "rollback_deploy",
        0.82,
        vec!["error rate tracks deploy 4f2a".into()],
        1,
    );
    let degraded = DegradedRecommendation::new(AgentRole::Prediction, ReasonCode::Timeout, String::from("deadline"), 1)
        .with_fallback(String::from("monitor_closely"), 0.2);
    let kinds = vec![
        transition(IncidentState::New, IncidentState::Detecting),
        EventKind::AgentRecommended { recommendation },
        EventKind::AgentDegraded { degraded },
        transition(IncidentState::Detecting, IncidentState::Analyzing),
    ];
    for (offset, kind) in kinds.into_iter().enumerate() {
        log.append(&id, 1 + offset as u64, kind).await.unwrap();
    }

    let events = log.read(&id).await.unwrap();
    let first = Incident::replay(&events).unwrap();
    let second = Incident::replay(&events).unwrap();
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );

    assert_eq!(first.state, IncidentState::Analyzing);
    assert_eq!(first.version(), 5);
    assert!(matches!(
        first.outcomes.get(&AgentRole::Detection),
        Some(AgentOutcome::Recommended(_))
    ));
    assert!(first.degraded.contains(&AgentRole::Prediction));
}

#[tokio::test]
async fn test_illegal_transition_in_stream_fails_replay() {
    let store = InMemoryEventStore::new();
    let id = IncidentId::new();
    store
        .append(
            &id,
            0,
            EventKind::IncidentOpened {
                report: report(),
                operator: "oncall".into(),
            },
        )
        .await
        .unwrap();
    store
        .append(&id, 1, transition(IncidentState::New, IncidentState::Resolved))
        .await
        .unwrap();

    let events = store.read(&id).await.unwrap();
    assert!(Incident::replay(&events).is_err());
}

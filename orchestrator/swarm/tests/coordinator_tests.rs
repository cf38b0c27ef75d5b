// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use vigil_core::application::event_log::{EventLog, NoopPublisher};
use vigil_core::domain::agent::{
    Agent, AgentOutcome, AgentRecommendation, AgentRole, Deadline, DegradedRecommendation, IncidentContext,
    ReasonCode,
};
use vigil_core::domain::consensus::{ConsensusConfig, ConsensusRound, EscalationReason, QuarantineReason};
use vigil_core::domain::events::EventKind;
use vigil_core::domain::incident::{IncidentId, IncidentReport, IncidentState, Severity};
use vigil_core::domain::node_config::{CoordinatorConfig, DependenciesConfig, FallbackConfig, RoleTimeouts};
use vigil_core::infrastructure::{GuardRegistry, InMemoryEventStore};
use vigil_swarm::application::{AbortOutcome, AdminCommands, AdminError, CoordinatorError};
use vigil_swarm::{ConsensusEngine, DependencyGraph, SwarmCoordinator};

enum Behaviour {
    Recommend(&'static str, f64),
    Fail,
    /// Ignores both the deadline and cancellation.
    Hang,
}

struct ScriptedAgent {
    role: AgentRole,
    behaviour: Behaviour,
    calls: AtomicU32,
    started: Arc<Notify>,
}

impl ScriptedAgent {
    fn new(role: AgentRole, behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            role,
            behaviour,
            calls: AtomicU32::new(0),
            started: Arc::new(Notify::new()),
        })
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn role(&self) -> AgentRole {
        self.role
    }

    async fn execute(&self, context: Arc<IncidentContext>, _deadline: Deadline, _cancel: CancellationToken) -> AgentOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.started.notify_one();
        match self.behaviour {
            Behaviour::Recommend(action, confidence) => AgentOutcome::Recommended(AgentRecommendation::new(
                self.role,
                action,
                confidence,
                vec![],
                context.dependency_version,
            )),
            Behaviour::Fail => AgentOutcome::Degraded(DegradedRecommendation::new(
                self.role,
                ReasonCode::DependencyFailure,
                "HTTP 503",
                context.dependency_version,
            )),
            Behaviour::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                AgentOutcome::Recommended(AgentRecommendation::new(self.role, "too_late", 1.0, vec![], 0))
            }
        }
    }
}

struct Harness {
    log: Arc<EventLog>,
    coordinator: Arc<SwarmCoordinator>,
    agents: HashMap<AgentRole, Arc<ScriptedAgent>>,
}

fn harness(behaviours: Vec<(AgentRole, Behaviour)>, config: CoordinatorConfig) -> Harness {
    harness_on(Arc::new(EventLog::new(Arc::new(InMemoryEventStore::new()), Arc::new(NoopPublisher))), behaviours, config)
}

fn harness_on(log: Arc<EventLog>, behaviours: Vec<(AgentRole, Behaviour)>, config: CoordinatorConfig) -> Harness {
    let agents: HashMap<AgentRole, Arc<ScriptedAgent>> = behaviours
        .into_iter()
        .map(|(role, behaviour)| (role, ScriptedAgent::new(role, behaviour)))
        .collect();
    let dyn_agents: HashMap<AgentRole, Arc<dyn Agent>> = agents
        .iter()
        .map(|(role, agent)| (*role, Arc::clone(agent) as Arc<dyn Agent>))
        .collect();
    let coordinator = SwarmCoordinator::new(
        Arc::clone(&log),
        dyn_agents,
        ConsensusEngine::new(ConsensusConfig::default()),
        DependencyGraph::standard().unwrap(),
        config,
        Arc::new(GuardRegistry::new(DependenciesConfig::default())),
    )
    .unwrap();
    Harness {
        log,
        coordinator: Arc::new(coordinator),
        agents,
    }
}

fn agreeing() -> Vec<(AgentRole, Behaviour)> {
    vec![
        (AgentRole::Detection, Behaviour::Recommend("rollback_deploy", 0.95)),
        (AgentRole::Diagnosis, Behaviour::Recommend("rollback_deploy", 0.8)),
        (AgentRole::Prediction, Behaviour::Recommend("rollback_deploy", 0.95)),
        (AgentRole::Resolution, Behaviour::Recommend("rollback_deploy", 0.9)),
        (AgentRole::Communication, Behaviour::Recommend("notify_stakeholders", 1.0)),
    ]
}

fn report() -> IncidentReport {
    IncidentReport {
        title: "Checkout p99 latency above SLO".into(),
        severity: Severity::Sev2,
        business_impact: Some("orders delayed".into()),
        logs: vec!["deploy 4f2a rolled out".into()],
        metrics: Default::default(),
        source: None,
    }
}

async fn open(log: &EventLog) -> IncidentId {
    log.open(report(), "alice").await.unwrap().incident_id
}

#[tokio::test]
async fn test_incident_runs_to_resolution() {
    let h = harness(agreeing(), CoordinatorConfig::default());
    let id = open(&h.log).await;

    let incident = h.coordinator.run_incident(id).await.unwrap();

    assert_eq!(incident.state, IncidentState::Resolved);
    assert_eq!(incident.completed_levels.iter().copied().collect::<Vec<_>>(), vec![0, 1, 2, 3]);
    for round in [ConsensusRound::Analysis, ConsensusRound::Resolution] {
        let decision = &incident.decisions[&round];
        assert!(decision.reached);
        assert_eq!(decision.action.as_deref(), Some("rollback_deploy"));
    }
    assert!(incident.badge().is_none());
    assert!(!h.coordinator.is_running(&id));

    // Replaying the stored stream yields the same aggregate.
    assert_eq!(h.log.load(&id).await.unwrap(), incident);
}

#[tokio::test]
async fn test_levels_see_earlier_outcomes() {
    let h = harness(agreeing(), CoordinatorConfig::default());
    let id = open(&h.log).await;
    h.coordinator.run_incident(id).await.unwrap();

    let events = h.log.read(&id).await.unwrap();
    let resolution = events
        .iter()
        .find_map(|e| match &e.kind {
            EventKind::AgentRecommended { recommendation } if recommendation.role == AgentRole::Resolution => {
                Some(recommendation.clone())
            }
            _ => None,
        })
        .unwrap();
    let analysis_decided_at = events
        .iter()
        .find(|e| matches!(e.kind, EventKind::ConsensusReached { .. }))
        .unwrap()
        .sequence;
    assert!(resolution.dependency_version > analysis_decided_at);
}

#[tokio::test(start_paused = true)]
async fn test_timed_out_role_gets_fallback_action() {
    let mut behaviours = agreeing();
    behaviours[1] = (AgentRole::Diagnosis, Behaviour::Hang);
    let config = CoordinatorConfig {
        role_timeouts: RoleTimeouts::uniform(Duration::from_secs(1)),
        ..CoordinatorConfig::default()
    };
    let h = harness(behaviours, config);
    let id = open(&h.log).await;

    let incident = h.coordinator.run_incident(id).await.unwrap();

    let AgentOutcome::Degraded(diagnosis) = &incident.outcomes[&AgentRole::Diagnosis] else {
        panic!("diagnosis should be degraded");
    };
    assert_eq!(diagnosis.reason, ReasonCode::Timeout);
    assert_eq!(diagnosis.fallback_action.as_deref(), Some("collect_diagnostics"));
    assert!(diagnosis.confidence <= 0.25);
    assert_eq!(incident.state, IncidentState::Resolved);
    assert!(incident.degraded.contains(&AgentRole::Diagnosis));
}

#[tokio::test]
async fn test_level_without_any_action_escalates() {
    let mut behaviours = agreeing();
    behaviours[0] = (AgentRole::Detection, Behaviour::Fail);
    let config = CoordinatorConfig {
        fallback: FallbackConfig {
            actions: Default::default(),
            confidence: 0.2,
        },
        ..CoordinatorConfig::default()
    };
    let h = harness(behaviours, config);
    let id = open(&h.log).await;

    let incident = h.coordinator.run_incident(id).await.unwrap();

    assert_eq!(incident.state, IncidentState::Escalated);
    assert_eq!(incident.escalation, Some(EscalationReason::AgentsExhausted { level: 0 }));
    assert_eq!(h.agents[&AgentRole::Diagnosis].calls.load(Ordering::SeqCst), 0);
}

fn quarantines(events: &[vigil_core::domain::events::IncidentEvent]) -> Vec<(AgentRole, ConsensusRound, QuarantineReason)> {
    events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::AgentQuarantined { role, round, reason } => Some((*role, *round, reason.clone())),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_outlier_is_quarantined_on_the_stream() {
    let mut behaviours = agreeing();
    behaviours[0] = (AgentRole::Detection, Behaviour::Recommend("A", 0.8));
    behaviours[1] = (AgentRole::Diagnosis, Behaviour::Recommend("A", 0.82));
    behaviours[2] = (AgentRole::Prediction, Behaviour::Recommend("A", 0.78));
    behaviours[3] = (AgentRole::Resolution, Behaviour::Recommend("X", 0.99));
    let h = harness(behaviours, CoordinatorConfig::default());
    let id = open(&h.log).await;

    let incident = h.coordinator.run_incident(id).await.unwrap();

    let quarantines = quarantines(&h.log.read(&id).await.unwrap());
    assert_eq!(quarantines.len(), 1);
    assert_eq!(quarantines[0].0, AgentRole::Resolution);
    assert_eq!(quarantines[0].1, ConsensusRound::Resolution);
    assert!(matches!(quarantines[0].2, QuarantineReason::Outlier { .. }));

    let decision = &incident.decisions[&ConsensusRound::Resolution];
    assert!(decision.reached);
    assert_eq!(decision.action.as_deref(), Some("A"));
    assert!((decision.score - 0.722).abs() < 1e-9);
    assert_eq!(incident.state, IncidentState::Resolved);
    assert!(incident.is_quarantined(AgentRole::Resolution));
}

#[tokio::test]
async fn test_analysis_contrarian_is_quarantined_before_resolution() {
    let mut behaviours = agreeing();
    behaviours[0] = (AgentRole::Detection, Behaviour::Recommend("X", 0.99));
    behaviours[1] = (AgentRole::Diagnosis, Behaviour::Recommend("A", 0.8));
    behaviours[2] = (AgentRole::Prediction, Behaviour::Recommend("A", 0.82));
    let h = harness(behaviours, CoordinatorConfig::default());
    let id = open(&h.log).await;

    let incident = h.coordinator.run_incident(id).await.unwrap();

    let quarantines = quarantines(&h.log.read(&id).await.unwrap());
    assert_eq!(quarantines.len(), 1);
    assert_eq!(quarantines[0].0, AgentRole::Detection);
    assert_eq!(quarantines[0].1, ConsensusRound::Analysis);
    assert!(matches!(quarantines[0].2, QuarantineReason::Outlier { .. }));

    // Three analysis voters tolerate no fault.
    assert_eq!(incident.state, IncidentState::Escalated);
    assert_eq!(
        incident.escalation,
        Some(EscalationReason::QuorumLost { faulty: 1, tolerated: 0 })
    );
    assert!(!incident.decisions.contains_key(&ConsensusRound::Resolution));
    assert_eq!(h.agents[&AgentRole::Resolution].calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_abort_cancels_in_flight_agents() {
    let mut behaviours = agreeing();
    behaviours[0] = (AgentRole::Detection, Behaviour::Hang);
    let h = harness(behaviours, CoordinatorConfig::default());
    let id = open(&h.log).await;

    let started = Arc::clone(&h.agents[&AgentRole::Detection].started);
    let coordinator = Arc::clone(&h.coordinator);
    let run = tokio::spawn(async move { coordinator.run_incident(id).await });
    started.notified().await;

    assert_eq!(h.coordinator.abort(id, "bob").await.unwrap(), AbortOutcome::Signalled);
    let incident = run.await.unwrap().unwrap();

    assert_eq!(incident.state, IncidentState::Escalated);
    assert_eq!(
        incident.escalation,
        Some(EscalationReason::OperatorAbort {
            operator: "bob".into()
        })
    );
    assert_eq!(incident.outcomes[&AgentRole::Detection].reason(), Some(ReasonCode::Cancelled));

    let events = h.log.read(&id).await.unwrap();
    let last = events.last().unwrap();
    let EventKind::IncidentStateChanged { history, .. } = &last.kind else {
        panic!("last event should be the escalation");
    };
    assert_eq!(history.len() as u64, last.sequence - 1);
}

#[tokio::test]
async fn test_abort_of_idle_incident_escalates_directly() {
    let h = harness(agreeing(), CoordinatorConfig::default());
    let id = open(&h.log).await;

    assert_eq!(h.coordinator.abort(id, "carol").await.unwrap(), AbortOutcome::Escalated);
    assert_eq!(h.log.load(&id).await.unwrap().state, IncidentState::Escalated);
    assert!(matches!(
        h.coordinator.abort(id, "carol").await,
        Err(CoordinatorError::NotActive { .. })
    ));
}

#[tokio::test]
async fn test_restart_resumes_after_last_checkpoint() {
    let log = Arc::new(EventLog::new(Arc::new(InMemoryEventStore::new()), Arc::new(NoopPublisher)));
    let id = open(&log).await;
    log.append(
        &id,
        1,
        EventKind::IncidentStateChanged {
            from: IncidentState::New,
            to: IncidentState::Detecting,
            reason: None,
            history: vec![],
        },
    )
    .await
    .unwrap();
    log.append(
        &id,
        2,
        EventKind::AgentRecommended {
            recommendation: AgentRecommendation::new(AgentRole::Detection, "rollback_deploy", 0.9, vec![], 2),
        },
    )
    .await
    .unwrap();
    log.append(
        &id,
        3,
        EventKind::LevelCheckpointed {
            level: 0,
            roles: vec![AgentRole::Detection],
        },
    )
    .await
    .unwrap();

    let h = harness_on(Arc::clone(&log), agreeing(), CoordinatorConfig::default());
    let incident = h.coordinator.run_incident(id).await.unwrap();

    assert_eq!(incident.state, IncidentState::Resolved);
    assert_eq!(h.agents[&AgentRole::Detection].calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.agents[&AgentRole::Diagnosis].calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_second_run_of_same_incident_is_refused() {
    let mut behaviours = agreeing();
    behaviours[0] = (AgentRole::Detection, Behaviour::Hang);
    let h = harness(behaviours, CoordinatorConfig::default());
    let id = open(&h.log).await;

    let started = Arc::clone(&h.agents[&AgentRole::Detection].started);
    let coordinator = Arc::clone(&h.coordinator);
    let run = tokio::spawn(async move { coordinator.run_incident(id).await });
    started.notified().await;

    assert!(matches!(
        h.coordinator.run_incident(id).await,
        Err(CoordinatorError::AlreadyRunning(_))
    ));
    run.abort();
}

#[tokio::test]
async fn test_reset_agents_lifts_quarantine() {
    let h = harness(agreeing(), CoordinatorConfig::default());
    let admin = AdminCommands::new(Arc::clone(&h.coordinator));
    let id = open(&h.log).await;
    h.log
        .append(
            &id,
            1,
            EventKind::AgentQuarantined {
                role: AgentRole::Detection,
                round: ConsensusRound::Analysis,
                reason: QuarantineReason::InvalidSignature,
            },
        )
        .await
        .unwrap();

    let released = admin.reset_agents(id, "dave").await.unwrap();

    assert_eq!(released, vec![AgentRole::Detection]);
    let incident = h.log.load(&id).await.unwrap();
    assert!(incident.quarantined.is_empty());
    let health = h.coordinator.agent_health(id).await.unwrap();
    assert_eq!(health.len(), 5);
    assert!(health.iter().all(|h| !h.quarantined));
}

#[tokio::test]
async fn test_reset_agents_refuses_finished_incident() {
    let h = harness(agreeing(), CoordinatorConfig::default());
    let admin = AdminCommands::new(Arc::clone(&h.coordinator));
    let id = open(&h.log).await;
    h.coordinator.run_incident(id).await.unwrap();
    let version = h.log.load(&id).await.unwrap().version();

    assert!(matches!(
        admin.reset_agents(id, "dave").await,
        Err(AdminError::Coordinator(CoordinatorError::NotActive {
            state: IncidentState::Resolved,
            ..
        }))
    ));
    assert_eq!(h.log.load(&id).await.unwrap().version(), version);
}

#[tokio::test]
async fn test_trigger_rejects_blank_operator_and_title() {
    let h = harness(agreeing(), CoordinatorConfig::default());
    let admin = AdminCommands::new(Arc::clone(&h.coordinator));

    assert!(admin.trigger_incident(report(), "  ").await.is_err());
    let mut blank = report();
    blank.title = String::new();
    assert!(admin.trigger_incident(blank, "erin").await.is_err());
    assert!(h.log.incident_ids().await.unwrap().is_empty());
}

#[test]
fn test_graph_must_cover_every_agent() {
    let log = Arc::new(EventLog::new(Arc::new(InMemoryEventStore::new()), Arc::new(NoopPublisher)));
    let result = SwarmCoordinator::new(
        log,
        HashMap::new(),
        ConsensusEngine::new(ConsensusConfig::default()),
        DependencyGraph::standard().unwrap(),
        CoordinatorConfig::default(),
        Arc::new(GuardRegistry::new(DependenciesConfig::default())),
    );
    assert!(matches!(result, Err(CoordinatorError::MissingAgent(AgentRole::Detection))));
}

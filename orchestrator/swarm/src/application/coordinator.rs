// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Coordinator
//!
//! Drives one incident through its state machine, level by level:
//!
//! ```text
//! NEW -> DETECTING (level 0) -> ANALYZING (level 1) -> CONSENSUS (analysis round)
//!     -> RESOLVING (level 2 + resolution round) -> COMMUNICATING (level 3) -> RESOLVED
//! ```
//!
//! The coordinator is the single writer of an incident's stream. All state is
//! rebuilt by replay; the only thing kept in memory is the cancellation handle
//! of each in-flight run. Every step is idempotent against the replayed
//! state, so a restarted run resumes from the first level without a
//! `LevelCheckpointed` event.
//!
//! Roles of a level run as spawned tasks. Each has a supervisor enforcing the
//! role timeout and the operator's cancellation grace; a role that misses its
//! deadline is recorded as degraded with a fallback action.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use vigil_core::application::event_log::{EventLog, EventLogError};
use vigil_core::domain::agent::{
    Agent, AgentHealth, AgentOutcome, AgentRole, Deadline, DegradedRecommendation, IncidentContext, ReasonCode,
};
use vigil_core::domain::consensus::{ConsensusRound, EscalationReason};
use vigil_core::domain::dependency::{CircuitState, DependencyId};
use vigil_core::domain::events::{EventKind, IncidentEvent};
use vigil_core::domain::fault::FaultKind;
use vigil_core::domain::incident::{Incident, IncidentId, IncidentState};
use vigil_core::domain::node_config::CoordinatorConfig;
use vigil_core::domain::repository::EventStoreError;
use vigil_core::infrastructure::dependency_guard::GuardRegistry;

use crate::domain::consensus::ConsensusEngine;
use crate::domain::fallback::FallbackCache;
use crate::domain::graph::{DependencyGraph, GraphError};

/// Incident state active while each execution level runs.
const LEVEL_STATES: [IncidentState; 4] = [
    IncidentState::Detecting,
    IncidentState::Analyzing,
    IncidentState::Resolving,
    IncidentState::Communicating,
];

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Log(#[from] EventLogError),

    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("Invalid dependency graph: {0}")]
    Graph(#[from] GraphError),

    #[error("Dependency graph must have {expected} levels, found {found}")]
    UnsupportedGraph { expected: usize, found: usize },

    #[error("No agent registered for role {0}")]
    MissingAgent(AgentRole),

    #[error("Incident {0} is already being coordinated")]
    AlreadyRunning(IncidentId),

    #[error("Incident {incident_id} is {state} and can no longer change")]
    NotActive { incident_id: IncidentId, state: IncidentState },

    #[error("Gave up on {incident_id} after {attempts} conflicting appends")]
    RetriesExhausted { incident_id: IncidentId, attempts: u32 },
}

impl CoordinatorError {
    pub fn fault_kind(&self) -> Option<FaultKind> {
        match self {
            CoordinatorError::Store(e) | CoordinatorError::Log(EventLogError::Store(e)) => Some(FaultKind::from(e)),
            CoordinatorError::RetriesExhausted { .. } => Some(FaultKind::VersionConflict),
            _ => None,
        }
    }
}

/// Cancellation handle of one in-flight run.
struct RunHandle {
    cancel: CancellationToken,
    aborted_by: Mutex<Option<String>>,
}

impl RunHandle {
    fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            aborted_by: Mutex::new(None),
        }
    }

    fn abort(&self, operator: &str) {
        self.aborted_by.lock().get_or_insert_with(|| operator.to_string());
        self.cancel.cancel();
    }

    fn aborted_by(&self) -> Option<String> {
        if self.cancel.is_cancelled() {
            Some(self.aborted_by.lock().clone().unwrap_or_else(|| "unknown".to_string()))
        } else {
            None
        }
    }
}

/// Result of an operator abort request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortOutcome {
    /// The running coordinator was signalled and will escalate.
    Signalled,
    /// No run was in flight; the escalation was recorded directly.
    Escalated,
}

pub struct SwarmCoordinator {
    log: Arc<EventLog>,
    agents: HashMap<AgentRole, Arc<dyn Agent>>,
    engine: ConsensusEngine,
    fallback: FallbackCache,
    graph: DependencyGraph,
    config: CoordinatorConfig,
    guards: Arc<GuardRegistry>,
    running: DashMap<IncidentId, Arc<RunHandle>>,
}

impl SwarmCoordinator {
    pub fn new(
        log: Arc<EventLog>,
        agents: HashMap<AgentRole, Arc<dyn Agent>>,
        engine: ConsensusEngine,
        graph: DependencyGraph,
        config: CoordinatorConfig,
        guards: Arc<GuardRegistry>,
    ) -> Result<Self, CoordinatorError> {
        if graph.levels().len() != LEVEL_STATES.len() {
            return Err(CoordinatorError::UnsupportedGraph {
                expected: LEVEL_STATES.len(),
                found: graph.levels().len(),
            });
        }
        if let Some(role) = graph.roles().find(|role| !agents.contains_key(role)) {
            return Err(CoordinatorError::MissingAgent(*role));
        }
        Ok(Self {
            fallback: FallbackCache::new(config.fallback.clone()),
            log,
            agents,
            engine,
            graph,
            config,
            guards,
            running: DashMap::new(),
        })
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub fn guards(&self) -> &Arc<GuardRegistry> {
        &self.guards
    }

    pub fn is_running(&self, incident_id: &IncidentId) -> bool {
        self.running.contains_key(incident_id)
    }

    /// Drive an incident until it is resolved or escalated. Safe to call
    /// again after a crash; completed levels are not re-executed.
    pub async fn run_incident(&self, incident_id: IncidentId) -> Result<Incident, CoordinatorError> {
        let handle = Arc::new(RunHandle::new());
        match self.running.entry(incident_id) {
            Entry::Occupied(_) => return Err(CoordinatorError::AlreadyRunning(incident_id)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&handle));
            }
        }
        metrics::gauge!("vigil_incidents_in_flight").increment(1.0);

        let result = self.drive(incident_id, &handle).await;

        self.running.remove(&incident_id);
        metrics::gauge!("vigil_incidents_in_flight").decrement(1.0);
        match &result {
            Ok(incident) => {
                info!(incident_id = %incident_id, state = %incident.state, "Incident run finished");
                metrics::counter!("vigil_incidents_finished_total", "state" => incident.state.as_str()).increment(1);
            }
            Err(e) => error!(incident_id = %incident_id, error = %e, "Incident run failed"),
        }
        result
    }

    /// Resume every incident left active by a previous process.
    pub async fn resume_active(self: &Arc<Self>) -> Result<Vec<IncidentId>, CoordinatorError> {
        let mut resumed = Vec::new();
        for incident_id in self.log.incident_ids().await? {
            let incident = match self.log.load(&incident_id).await {
                Ok(incident) => incident,
                Err(e) => {
                    warn!(incident_id = %incident_id, error = %e, "Skipping unreadable incident");
                    continue;
                }
            };
            if !incident.state.is_active() || self.is_running(&incident_id) {
                continue;
            }
            info!(incident_id = %incident_id, state = %incident.state, "Resuming incident");
            let coordinator = Arc::clone(self);
            tokio::spawn(async move {
                let _ = coordinator.run_incident(incident_id).await;
            });
            resumed.push(incident_id);
        }
        Ok(resumed)
    }

    /// Stop an incident and hand it to humans. A running incident is
    /// signalled; agents get `cancel_grace` to return.
    pub async fn abort(&self, incident_id: IncidentId, operator: &str) -> Result<AbortOutcome, CoordinatorError> {
        if let Some(handle) = self.running.get(&incident_id) {
            info!(incident_id = %incident_id, operator, "Operator abort signalled");
            handle.abort(operator);
            return Ok(AbortOutcome::Signalled);
        }

        let mut incident = self.log.load(&incident_id).await?;
        if !incident.state.is_active() {
            return Err(CoordinatorError::NotActive {
                incident_id,
                state: incident.state,
            });
        }
        info!(incident_id = %incident_id, operator, "Operator abort of idle incident");
        self.escalate(
            &mut incident,
            EscalationReason::OperatorAbort {
                operator: operator.to_string(),
            },
        )
        .await?;
        Ok(AbortOutcome::Escalated)
    }

    /// Breaker and quarantine view of every role for one incident.
    pub async fn agent_health(&self, incident_id: IncidentId) -> Result<Vec<AgentHealth>, CoordinatorError> {
        let incident = self.log.load(&incident_id).await?;
        Ok(AgentRole::ALL
            .into_iter()
            .map(|role| {
                let snapshot = self.guards.snapshot(&DependencyId::inference(role));
                let quarantine_reason = incident.quarantined.get(&role).cloned();
                AgentHealth {
                    role,
                    circuit_state: snapshot.as_ref().map(|s| s.state).unwrap_or(CircuitState::Closed),
                    consecutive_failures: snapshot.as_ref().map(|s| s.consecutive_failures).unwrap_or(0),
                    last_latency_ms: snapshot.and_then(|s| s.last_latency_ms),
                    quarantined: quarantine_reason.is_some(),
                    quarantine_reason,
                }
            })
            .collect())
    }

    async fn drive(&self, incident_id: IncidentId, handle: &RunHandle) -> Result<Incident, CoordinatorError> {
        let mut incident = self.log.load(&incident_id).await?;
        info!(incident_id = %incident_id, state = %incident.state, version = incident.version(), "Coordinating incident");

        loop {
            if !incident.state.is_active() {
                return Ok(incident);
            }
            if let Some(operator) = handle.aborted_by() {
                self.escalate(&mut incident, EscalationReason::OperatorAbort { operator }).await?;
                continue;
            }

            match incident.state {
                IncidentState::New => {
                    self.transition(&mut incident, IncidentState::Detecting).await?;
                }
                IncidentState::Detecting => {
                    if self.complete_level(&mut incident, 0, handle).await? {
                        self.transition(&mut incident, IncidentState::Analyzing).await?;
                    }
                }
                IncidentState::Analyzing => {
                    if self.complete_level(&mut incident, 1, handle).await? {
                        self.transition(&mut incident, IncidentState::Consensus).await?;
                    }
                }
                IncidentState::Consensus => {
                    if self.consensus_round(&mut incident, ConsensusRound::Analysis).await? {
                        self.transition(&mut incident, IncidentState::Resolving).await?;
                    }
                }
                IncidentState::Resolving => {
                    if self.complete_level(&mut incident, 2, handle).await?
                        && self.consensus_round(&mut incident, ConsensusRound::Resolution).await?
                    {
                        self.transition(&mut incident, IncidentState::Communicating).await?;
                    }
                }
                IncidentState::Communicating => {
                    if self.complete_level(&mut incident, 3, handle).await? {
                        self.transition(&mut incident, IncidentState::Resolved).await?;
                    }
                }
                IncidentState::Resolved | IncidentState::Escalated | IncidentState::Closed => {
                    return Ok(incident);
                }
            }
        }
    }

    /// Run a level unless already checkpointed. Returns false when the
    /// incident escalated instead of advancing.
    async fn complete_level(
        &self,
        incident: &mut Incident,
        level: usize,
        handle: &RunHandle,
    ) -> Result<bool, CoordinatorError> {
        let roles = self.graph.levels()[level].clone();

        if incident.completed_levels.contains(&level) {
            debug!(incident_id = %incident.id, level, "Level already checkpointed");
        } else {
            let started = Instant::now();
            let outcomes = self.execute_level(incident, &roles, &handle.cancel).await;
            for outcome in outcomes {
                let kind = match outcome {
                    AgentOutcome::Recommended(recommendation) => EventKind::AgentRecommended { recommendation },
                    AgentOutcome::Degraded(degraded) => EventKind::AgentDegraded { degraded },
                };
                self.append(incident, |_| Some(kind.clone())).await?;
            }
            let checkpoint = EventKind::LevelCheckpointed {
                level,
                roles: roles.clone(),
            };
            self.append(incident, |_| Some(checkpoint.clone())).await?;
            metrics::histogram!("vigil_level_seconds", "level" => level.to_string())
                .record(started.elapsed().as_secs_f64());
            info!(incident_id = %incident.id, level, state = %LEVEL_STATES[level], "Level checkpointed");
        }

        if let Some(operator) = handle.aborted_by() {
            self.escalate(incident, EscalationReason::OperatorAbort { operator }).await?;
            return Ok(false);
        }
        let usable = roles
            .iter()
            .filter(|role| !incident.is_quarantined(**role))
            .filter_map(|role| incident.outcomes.get(role))
            .any(|outcome| outcome.action().is_some());
        if !usable {
            warn!(incident_id = %incident.id, level, "Every agent of the level came back empty");
            self.escalate(incident, EscalationReason::AgentsExhausted { level }).await?;
            return Ok(false);
        }
        Ok(true)
    }

    /// Run every non-quarantined role of a level concurrently against one
    /// snapshot. Never fails; late or broken agents become degraded outcomes.
    async fn execute_level(
        &self,
        incident: &Incident,
        roles: &[AgentRole],
        cancel: &CancellationToken,
    ) -> Vec<AgentOutcome> {
        let context = Arc::new(incident.snapshot());
        let supervisors = roles
            .iter()
            .filter(|role| !incident.is_quarantined(**role))
            .filter_map(|role| self.agents.get(role))
            .map(|agent| self.supervise(Arc::clone(agent), Arc::clone(&context), cancel.clone()));

        join_all(supervisors)
            .await
            .into_iter()
            .map(|outcome| {
                let outcome = self.fallback.complete(outcome);
                let label = match &outcome {
                    AgentOutcome::Recommended(_) => "recommended",
                    AgentOutcome::Degraded(d) => d.reason.as_str(),
                };
                metrics::counter!("vigil_agent_outcomes_total", "role" => outcome.role().as_str(), "outcome" => label)
                    .increment(1);
                outcome
            })
            .collect()
    }

    async fn supervise(
        &self,
        agent: Arc<dyn Agent>,
        context: Arc<IncidentContext>,
        cancel: CancellationToken,
    ) -> AgentOutcome {
        let role = agent.role();
        let version = context.dependency_version;
        let budget = self.config.role_timeouts.for_role(role);
        let deadline = Deadline::after(budget);

        let mut task = tokio::spawn({
            let cancel = cancel.clone();
            async move { agent.execute(context, deadline, cancel).await }
        });

        tokio::select! {
            biased;
            joined = &mut task => match joined {
                Ok(outcome) if outcome.role() == role => outcome,
                Ok(outcome) => {
                    warn!(role = %role, reported = %outcome.role(), "Agent reported the wrong role");
                    degraded(role, ReasonCode::MalformedPayload, "agent reported a different role", version)
                }
                Err(e) => {
                    error!(role = %role, error = %e, "Agent task failed");
                    degraded(role, ReasonCode::DependencyFailure, format!("agent task failed: {}", e), version)
                }
            },
            _ = tokio::time::sleep_until(deadline.instant()) => {
                task.abort();
                warn!(role = %role, timeout_ms = budget.as_millis() as u64, "Agent timed out");
                degraded(role, ReasonCode::Timeout, format!("no answer within {:?}", budget), version)
            }
            _ = cancel.cancelled() => {
                match tokio::time::timeout(self.config.cancel_grace, &mut task).await {
                    Ok(Ok(outcome)) if outcome.role() == role => outcome,
                    _ => {
                        task.abort();
                        debug!(role = %role, "Agent abandoned after cancellation grace");
                        degraded(role, ReasonCode::Cancelled, "abandoned after operator abort", version)
                    }
                }
            }
        }
    }

    /// Evaluate a round unless already decided. Newly quarantined roles are
    /// recorded before the decision. Returns false on escalation.
    async fn consensus_round(&self, incident: &mut Incident, round: ConsensusRound) -> Result<bool, CoordinatorError> {
        if !incident.decisions.contains_key(&round) {
            let evaluation = self
                .engine
                .decide(round, &incident.outcomes, &incident.quarantined, incident.version());

            for (role, reason) in evaluation.newly_quarantined {
                debug!(incident_id = %incident.id, role = %role, reason = reason.label(), "Recording quarantine");
                self.append(incident, |_| {
                    Some(EventKind::AgentQuarantined {
                        role,
                        round,
                        reason: reason.clone(),
                    })
                })
                .await?;
            }

            let decision = evaluation.decision;
            info!(
                incident_id = %incident.id,
                round = round.as_str(),
                reached = decision.reached,
                action = decision.action.as_deref().unwrap_or("-"),
                score = decision.score,
                "Consensus evaluated"
            );
            let kind = if decision.reached {
                EventKind::ConsensusReached { decision }
            } else {
                EventKind::ConsensusFailed { decision }
            };
            self.append(incident, |_| Some(kind.clone())).await?;
        }

        let Some(decision) = incident.decisions.get(&round) else {
            return Ok(false);
        };
        if decision.reached {
            return Ok(true);
        }
        let reason = decision.escalation.clone().unwrap_or(EscalationReason::NoConsensus {
            best_score: decision.score,
            threshold: self.engine.config().acceptance_threshold,
        });
        self.escalate(incident, reason).await?;
        Ok(false)
    }

    async fn transition(&self, incident: &mut Incident, to: IncidentState) -> Result<(), CoordinatorError> {
        let from = incident.state;
        let appended = self
            .append(incident, |current| {
                (current.state == from && from.can_transition_to(to)).then(|| EventKind::IncidentStateChanged {
                    from,
                    to,
                    reason: None,
                    history: Vec::new(),
                })
            })
            .await?;
        if appended.is_some() {
            debug!(incident_id = %incident.id, from = %from, to = %to, "State changed");
        }
        Ok(())
    }

    /// Move an active incident to `Escalated`, attaching every recorded
    /// sequence for human review.
    async fn escalate(&self, incident: &mut Incident, reason: EscalationReason) -> Result<(), CoordinatorError> {
        let label = reason.label();
        let appended = self
            .append(incident, |current| {
                current.state.is_active().then(|| EventKind::IncidentStateChanged {
                    from: current.state,
                    to: IncidentState::Escalated,
                    reason: Some(reason.clone()),
                    history: current.events.clone(),
                })
            })
            .await?;
        if appended.is_some() {
            warn!(incident_id = %incident.id, reason = label, "Incident escalated to human review");
            metrics::counter!("vigil_escalations_total", "reason" => label).increment(1);
        }
        Ok(())
    }

    /// Append the event `build` derives from the current state, rereading
    /// and rebuilding on version conflicts. `build` returning `None` means
    /// the event no longer applies. `incident` tracks the stream on success.
    pub(crate) async fn append<F>(
        &self,
        incident: &mut Incident,
        build: F,
    ) -> Result<Option<IncidentEvent>, CoordinatorError>
    where
        F: Fn(&Incident) -> Option<EventKind>,
    {
        let mut attempts = 0;
        loop {
            let Some(kind) = build(incident) else {
                return Ok(None);
            };
            match self.log.append(&incident.id, incident.version(), kind).await {
                Ok(event) => {
                    incident.apply(&event).map_err(EventLogError::from)?;
                    return Ok(Some(event));
                }
                Err(EventStoreError::VersionConflict { expected, actual, .. }) => {
                    attempts += 1;
                    if attempts > self.config.max_append_retries {
                        return Err(CoordinatorError::RetriesExhausted {
                            incident_id: incident.id,
                            attempts,
                        });
                    }
                    debug!(incident_id = %incident.id, expected, actual, attempts, "Version conflict, rereading");
                    *incident = self.log.load(&incident.id).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn degraded(role: AgentRole, reason: ReasonCode, detail: impl Into<String>, version: u64) -> AgentOutcome {
    AgentOutcome::Degraded(DegradedRecommendation::new(role, reason, detail, version))
}


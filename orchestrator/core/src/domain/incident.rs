// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Incident Aggregate
//!
//! An [`Incident`] is never stored directly. It is rebuilt from its event
//! stream by [`Incident::replay`], and every field below is a pure function of
//! that stream. `apply` reads no clocks and draws no randomness, so replaying
//! the same events twice yields identical state.
//!
//! ## Lifecycle
//!
//! ```text
//! NEW -> DETECTING -> ANALYZING -> CONSENSUS -> RESOLVING -> COMMUNICATING -> RESOLVED
//!            \            \            \            \              \
//!             +------------+------------+------------+--------------+--> ESCALATED
//!
//! RESOLVED | ESCALATED -> CLOSED
//! ```

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::agent::{AgentOutcome, AgentRole, IncidentContext};
use crate::domain::consensus::{ConsensusDecision, ConsensusRound, EscalationReason, QuarantineReason};
use crate::domain::events::{EventKind, IncidentEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(pub Uuid);

impl IncidentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for IncidentId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IncidentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Sev1,
    Sev2,
    Sev3,
    Sev4,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Sev1 => "sev1",
            Severity::Sev2 => "sev2",
            Severity::Sev3 => "sev3",
            Severity::Sev4 => "sev4",
        }
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sev1" | "1" | "critical" => Ok(Severity::Sev1),
            "sev2" | "2" | "high" => Ok(Severity::Sev2),
            "sev3" | "3" | "medium" => Ok(Severity::Sev3),
            "sev4" | "4" | "low" => Ok(Severity::Sev4),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentState {
    New,
    Detecting,
    Analyzing,
    Consensus,
    Resolving,
    Communicating,
    Resolved,
    Escalated,
    Closed,
}

impl IncidentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentState::New => "NEW",
            IncidentState::Detecting => "DETECTING",
            IncidentState::Analyzing => "ANALYZING",
            IncidentState::Consensus => "CONSENSUS",
            IncidentState::Resolving => "RESOLVING",
            IncidentState::Communicating => "COMMUNICATING",
            IncidentState::Resolved => "RESOLVED",
            IncidentState::Escalated => "ESCALATED",
            IncidentState::Closed => "CLOSED",
        }
    }

    /// States in which the coordinator still drives the incident.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            IncidentState::New
                | IncidentState::Detecting
                | IncidentState::Analyzing
                | IncidentState::Consensus
                | IncidentState::Resolving
                | IncidentState::Communicating
        )
    }

    pub fn can_transition_to(&self, next: IncidentState) -> bool {
        use IncidentState::*;
        match (self, next) {
            (New, Detecting)
            | (Detecting, Analyzing)
            | (Analyzing, Consensus)
            | (Consensus, Resolving)
            | (Resolving, Communicating)
            | (Communicating, Resolved)
            | (Resolved, Closed)
            | (Escalated, Closed) => true,
            (from, Escalated) => from.is_active(),
            _ => false,
        }
    }
}

impl fmt::Display for IncidentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of `triggerIncident`; also the body of `IncidentOpened`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentReport {
    pub title: String,
    pub severity: Severity,
    /// Opaque to the swarm; forwarded to agents untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub business_impact: Option<String>,
    #[serde(default)]
    pub logs: Vec<String>,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Observer-facing badge derived from events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusBadge {
    Degraded,
    Escalated,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReplayError {
    #[error("Incident has no events")]
    Empty,

    #[error("First event must open the incident, found {0}")]
    NotOpened(&'static str),

    #[error("Event stream for {expected} contains event for {found}")]
    ForeignEvent { expected: IncidentId, found: IncidentId },

    #[error("Sequence gap: expected {expected}, found {found}")]
    SequenceGap { expected: u64, found: u64 },

    #[error("Illegal transition {from} -> {to} at sequence {sequence}")]
    IllegalTransition {
        from: IncidentState,
        to: IncidentState,
        sequence: u64,
    },
}

/// Event-sourced incident state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: IncidentId,
    pub report: IncidentReport,
    pub opened_by: String,
    pub state: IncidentState,
    /// Sequence numbers of every applied event, in order.
    pub events: Vec<u64>,
    pub outcomes: BTreeMap<AgentRole, AgentOutcome>,
    pub quarantined: BTreeMap<AgentRole, QuarantineReason>,
    pub decisions: BTreeMap<ConsensusRound, ConsensusDecision>,
    /// Indices of execution levels whose checkpoint has been committed.
    pub completed_levels: BTreeSet<usize>,
    pub escalation: Option<EscalationReason>,
    pub degraded: BTreeSet<AgentRole>,
}

impl Incident {
    pub fn replay(events: &[IncidentEvent]) -> Result<Self, ReplayError> {
        let (first, rest) = events.split_first().ok_or(ReplayError::Empty)?;
        let mut incident = match &first.kind {
            EventKind::IncidentOpened { report, operator } => Incident {
                id: first.incident_id,
                report: report.clone(),
                opened_by: operator.clone(),
                state: IncidentState::New,
                events: vec![first.sequence],
                outcomes: BTreeMap::new(),
                quarantined: BTreeMap::new(),
                decisions: BTreeMap::new(),
                completed_levels: BTreeSet::new(),
                escalation: None,
                degraded: BTreeSet::new(),
            },
            other => return Err(ReplayError::NotOpened(other.event_type())),
        };
        if first.sequence != 1 {
            return Err(ReplayError::SequenceGap {
                expected: 1,
                found: first.sequence,
            });
        }
        for event in rest {
            incident.apply(event)?;
        }
        Ok(incident)
    }

    pub fn apply(&mut self, event: &IncidentEvent) -> Result<(), ReplayError> {
        if event.incident_id != self.id {
            return Err(ReplayError::ForeignEvent {
                expected: self.id,
                found: event.incident_id,
            });
        }
        let expected = self.version() + 1;
        if event.sequence != expected {
            return Err(ReplayError::SequenceGap {
                expected,
                found: event.sequence,
            });
        }

        match &event.kind {
            EventKind::IncidentOpened { .. } => {
                return Err(ReplayError::NotOpened("IncidentOpened"));
            }
            EventKind::IncidentStateChanged { from, to, reason, .. } => {
                if *from != self.state || !self.state.can_transition_to(*to) {
                    return Err(ReplayError::IllegalTransition {
                        from: self.state,
                        to: *to,
                        sequence: event.sequence,
                    });
                }
                self.state = *to;
                if *to == IncidentState::Escalated {
                    self.escalation = reason.clone();
                }
            }
            EventKind::AgentRecommended { recommendation } => {
                self.degraded.remove(&recommendation.role);
                self.outcomes.insert(
                    recommendation.role,
                    AgentOutcome::Recommended(recommendation.clone()),
                );
            }
            EventKind::AgentDegraded { degraded } => {
                self.degraded.insert(degraded.role);
                self.outcomes
                    .insert(degraded.role, AgentOutcome::Degraded(degraded.clone()));
            }
            EventKind::AgentQuarantined { role, reason, .. } => {
                self.quarantined.insert(*role, reason.clone());
            }
            EventKind::ConsensusReached { decision } | EventKind::ConsensusFailed { decision } => {
                self.decisions.insert(decision.round, decision.clone());
            }
            EventKind::LevelCheckpointed { level, .. } => {
                self.completed_levels.insert(*level);
            }
            EventKind::AgentsReset { roles, .. } => {
                for role in roles {
                    self.quarantined.remove(role);
                }
            }
        }
        self.events.push(event.sequence);
        Ok(())
    }

    /// Store version this state was rebuilt from.
    pub fn version(&self) -> u64 {
        self.events.len() as u64
    }

    pub fn severity(&self) -> Severity {
        self.report.severity
    }

    pub fn is_quarantined(&self, role: AgentRole) -> bool {
        self.quarantined.contains_key(&role)
    }

    pub fn latest_decision(&self) -> Option<&ConsensusDecision> {
        self.decisions.values().next_back()
    }

    pub fn badge(&self) -> Option<StatusBadge> {
        if self.state == IncidentState::Escalated {
            Some(StatusBadge::Escalated)
        } else if !self.degraded.is_empty() || !self.quarantined.is_empty() {
            Some(StatusBadge::Degraded)
        } else {
            None
        }
    }

    /// Immutable snapshot handed to the agents of one level.
    pub fn snapshot(&self) -> IncidentContext {
        IncidentContext {
            incident_id: self.id,
            severity: self.report.severity,
            title: self.report.title.clone(),
            business_impact: self.report.business_impact.clone(),
            logs: self.report.logs.clone(),
            metrics: self.report.metrics.clone(),
            prior_outcomes: self.outcomes.values().cloned().collect(),
            decision: self.latest_decision().cloned(),
            dependency_version: self.version(),
        }
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Request and response bodies shared by the daemon and its client.

use serde::{Deserialize, Serialize};

use vigil_core::domain::agent::AgentRole;
use vigil_core::domain::incident::{Incident, IncidentId, IncidentReport, StatusBadge};
use vigil_swarm::application::AbortOutcome;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRequest {
    pub operator: String,
    pub report: IncidentReport,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerResponse {
    pub incident_id: IncidentId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperatorRequest {
    pub operator: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetResponse {
    pub incident_id: IncidentId,
    pub reset: Vec<AgentRole>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbortStatus {
    /// A running coordinator was cancelled and will escalate.
    Signalled,
    /// Nothing was running; the escalation was recorded directly.
    Escalated,
}

impl From<AbortOutcome> for AbortStatus {
    fn from(outcome: AbortOutcome) -> Self {
        match outcome {
            AbortOutcome::Signalled => AbortStatus::Signalled,
            AbortOutcome::Escalated => AbortStatus::Escalated,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbortResponse {
    pub incident_id: IncidentId,
    pub status: AbortStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckRequest {
    pub sequence: u64,
}

/// Replayed incident plus what only the daemon knows about it.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentView {
    pub incident: Incident,
    pub version: u64,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<StatusBadge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Operator entry points. Every command is logged with the operator's name
//! and recorded as an event on the incident's stream.

use std::sync::Arc;
use tracing::{error, info};

use vigil_core::domain::agent::AgentRole;
use vigil_core::domain::dependency::DependencyId;
use vigil_core::domain::events::EventKind;
use vigil_core::domain::incident::{IncidentId, IncidentReport};

use super::coordinator::{AbortOutcome, CoordinatorError, SwarmCoordinator};

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("Invalid incident report: {0}")]
    InvalidReport(String),

    #[error("Operator name must not be empty")]
    MissingOperator,

    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

pub struct AdminCommands {
    coordinator: Arc<SwarmCoordinator>,
}

impl AdminCommands {
    pub fn new(coordinator: Arc<SwarmCoordinator>) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &Arc<SwarmCoordinator> {
        &self.coordinator
    }

    /// Open an incident and start coordinating it in the background.
    pub async fn trigger_incident(&self, report: IncidentReport, operator: &str) -> Result<IncidentId, AdminError> {
        let operator = checked_operator(operator)?;
        validate_report(&report)?;

        let opened = self
            .coordinator
            .log()
            .open(report, operator)
            .await
            .map_err(CoordinatorError::from)?;
        let incident_id = opened.incident_id;
        info!(incident_id = %incident_id, operator, "Incident triggered");
        metrics::counter!("vigil_incidents_triggered_total").increment(1);

        let coordinator = Arc::clone(&self.coordinator);
        tokio::spawn(async move {
            if let Err(e) = coordinator.run_incident(incident_id).await {
                error!(incident_id = %incident_id, error = %e, "Background incident run ended with an error");
            }
        });
        Ok(incident_id)
    }

    /// Lift every quarantine of an incident and reset the inference breakers
    /// of all roles. Returns the roles released from quarantine. Resolved,
    /// closed and escalated incidents are refused.
    pub async fn reset_agents(&self, incident_id: IncidentId, operator: &str) -> Result<Vec<AgentRole>, AdminError> {
        let operator = checked_operator(operator)?;
        let mut incident = self
            .coordinator
            .log()
            .load(&incident_id)
            .await
            .map_err(CoordinatorError::from)?;

        let appended = self
            .coordinator
            .append(&mut incident, |current| {
                current.state.is_active().then(|| EventKind::AgentsReset {
                    operator: operator.to_string(),
                    roles: current.quarantined.keys().copied().collect(),
                })
            })
            .await?;
        let Some(event) = appended else {
            return Err(CoordinatorError::NotActive {
                incident_id,
                state: incident.state,
            }
            .into());
        };
        let released = match event.kind {
            EventKind::AgentsReset { roles, .. } => roles,
            _ => Vec::new(),
        };

        for role in AgentRole::ALL {
            self.coordinator.guards().reset(&DependencyId::inference(role));
        }
        info!(incident_id = %incident_id, operator, released = ?released, "Agents reset");
        Ok(released)
    }

    pub async fn abort(&self, incident_id: IncidentId, operator: &str) -> Result<AbortOutcome, AdminError> {
        let operator = checked_operator(operator)?;
        Ok(self.coordinator.abort(incident_id, operator).await?)
    }
}

fn checked_operator(operator: &str) -> Result<&str, AdminError> {
    let operator = operator.trim();
    if operator.is_empty() {
        return Err(AdminError::MissingOperator);
    }
    Ok(operator)
}

fn validate_report(report: &IncidentReport) -> Result<(), AdminError> {
    if report.title.trim().is_empty() {
        return Err(AdminError::InvalidReport("title must not be empty".into()));
    }
    if let Some((name, value)) = report.metrics.iter().find(|(_, v)| !v.is_finite()) {
        return Err(AdminError::InvalidReport(format!("metric {} is not a finite number: {}", name, value)));
    }
    Ok(())
}

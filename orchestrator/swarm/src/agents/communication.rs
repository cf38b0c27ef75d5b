// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use vigil_core::domain::agent::{
    Agent, AgentOutcome, AgentRecommendation, AgentRole, Deadline, DegradedRecommendation, IncidentContext,
    ReasonCode,
};
use vigil_core::domain::dependency::CallPriority;
use vigil_core::domain::incident::IncidentState;
use vigil_core::domain::notification::Notification;
use vigil_core::infrastructure::notification::GuardedChannel;

pub const NOTIFY_ACTION: &str = "notify_stakeholders";

/// Tells stakeholders what the swarm decided. Uses notification channels
/// instead of inference; confidence is the share of channels reached.
pub struct CommunicationAgent {
    channels: Vec<Arc<GuardedChannel>>,
}

impl CommunicationAgent {
    pub fn new(channels: Vec<Arc<GuardedChannel>>) -> Self {
        Self { channels }
    }

    fn notification(context: &IncidentContext) -> Notification {
        let action = context
            .decision
            .as_ref()
            .filter(|d| d.reached)
            .and_then(|d| d.action.clone());
        let body = match &action {
            Some(action) => format!("Swarm is executing {} for: {}", action, context.title),
            None => format!("Swarm has no agreed action yet for: {}", context.title),
        };
        Notification {
            incident_id: context.incident_id,
            severity: context.severity,
            state: IncidentState::Communicating,
            subject: format!("[{}] {}", context.severity.as_str().to_uppercase(), context.title),
            body,
            action,
        }
    }

    fn degraded(context: &IncidentContext, reason: ReasonCode, detail: impl Into<String>) -> AgentOutcome {
        AgentOutcome::Degraded(DegradedRecommendation::new(
            AgentRole::Communication,
            reason,
            detail,
            context.dependency_version,
        ))
    }
}

#[async_trait]
impl Agent for CommunicationAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Communication
    }

    async fn execute(&self, context: Arc<IncidentContext>, deadline: Deadline, cancel: CancellationToken) -> AgentOutcome {
        if self.channels.is_empty() {
            return AgentOutcome::Recommended(AgentRecommendation::new(
                AgentRole::Communication,
                NOTIFY_ACTION,
                1.0,
                vec!["no channels configured".to_string()],
                context.dependency_version,
            ));
        }

        let notification = Self::notification(&context);
        let priority = CallPriority::from(context.severity);
        let dispatch = join_all(self.channels.iter().map(|channel| {
            let notification = &notification;
            async move { (channel.name().to_string(), channel.notify(notification, priority).await) }
        }));

        let results = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Self::degraded(&context, ReasonCode::Cancelled, "cancelled by operator");
            }
            results = deadline.run(dispatch) => match results {
                Ok(results) => results,
                Err(_) => return Self::degraded(&context, ReasonCode::DeadlineExceeded, "role deadline passed"),
            },
        };

        let total = results.len();
        let mut evidence = Vec::with_capacity(total);
        let mut failure = None;
        for (name, result) in results {
            match result {
                Ok(true) => evidence.push(format!("{}: delivered", name)),
                Ok(false) => evidence.push(format!("{}: duplicate suppressed", name)),
                Err(e) => {
                    warn!(incident_id = %context.incident_id, channel = %name, error = %e, "Notification failed");
                    failure = Some(e);
                }
            }
        }

        if evidence.is_empty() {
            let reason = failure.as_ref().map(|e| e.reason_code()).unwrap_or(ReasonCode::DependencyFailure);
            return Self::degraded(&context, reason, format!("all {} channels failed", total));
        }
        AgentOutcome::Recommended(AgentRecommendation::new(
            AgentRole::Communication,
            NOTIFY_ACTION,
            evidence.len() as f64 / total as f64,
            evidence,
            context.dependency_version,
        ))
    }
}

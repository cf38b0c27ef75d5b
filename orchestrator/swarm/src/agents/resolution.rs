// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vigil_core::domain::agent::{Agent, AgentOutcome, AgentRole, Deadline, IncidentContext};

use super::{InferenceBackend, RESPONSE_FORMAT};

pub const SYSTEM_PROMPT: &str = "You are the Resolution agent of an incident response swarm. \
Turn the agreed analysis into one concrete, reversible remediation step.";

/// Plans the remediation the analysis round agreed on.
pub struct ResolutionAgent {
    backend: InferenceBackend,
}

impl ResolutionAgent {
    pub fn new(backend: InferenceBackend) -> Self {
        Self { backend }
    }

    fn prompt(&self, context: &IncidentContext) -> String {
        let mut prompt = self.backend.describe_incident(context);
        match &context.decision {
            Some(decision) if decision.reached => {
                let _ = writeln!(
                    prompt,
                    "The swarm agreed on {} with score {:.2}.",
                    decision.action.as_deref().unwrap_or("-"),
                    decision.score
                );
            }
            _ => prompt.push_str("The swarm has not agreed on an analysis.\n"),
        }
        let findings: Vec<&AgentOutcome> = context
            .prior_outcomes
            .iter()
            .filter(|o| o.role() != AgentRole::Resolution)
            .collect();
        if !findings.is_empty() {
            prompt.push_str("Findings:\n");
            for outcome in findings {
                let _ = writeln!(
                    prompt,
                    "  {}: {} ({:.2}{})",
                    outcome.role(),
                    outcome.action().unwrap_or("none"),
                    outcome.confidence(),
                    if outcome.is_degraded() { ", degraded" } else { "" }
                );
            }
        }
        prompt.push_str("\nWhich remediation should be executed now?\n");
        prompt.push_str(RESPONSE_FORMAT);
        prompt
    }
}

#[async_trait]
impl Agent for ResolutionAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Resolution
    }

    async fn execute(&self, context: Arc<IncidentContext>, deadline: Deadline, cancel: CancellationToken) -> AgentOutcome {
        let prompt = self.prompt(&context);
        self.backend.recommend(&context, prompt, deadline, &cancel).await
    }
}

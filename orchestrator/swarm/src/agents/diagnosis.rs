// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use std::fmt::Write as _;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vigil_core::domain::agent::{Agent, AgentOutcome, AgentRole, Deadline, IncidentContext, ReasonCode};
use vigil_core::domain::knowledge::{KnowledgeBase, Precedent};
use vigil_core::infrastructure::dependency_guard::DependencyGuard;

use super::{describe_precedents, gather_precedents, InferenceBackend, RESPONSE_FORMAT};

pub const SYSTEM_PROMPT: &str = "You are the Diagnosis agent of an incident response swarm. \
Identify the most likely root cause using the signals, the detection finding and similar past incidents, \
and name the action that addresses it.";

/// Root-cause analysis. Looks up similar precedents, follows their causal
/// links, then asks the model.
pub struct DiagnosisAgent {
    backend: InferenceBackend,
    knowledge: Arc<dyn KnowledgeBase>,
    knowledge_guard: Arc<DependencyGuard>,
}

impl DiagnosisAgent {
    pub fn new(backend: InferenceBackend, knowledge: Arc<dyn KnowledgeBase>, knowledge_guard: Arc<DependencyGuard>) -> Self {
        Self {
            backend,
            knowledge,
            knowledge_guard,
        }
    }

    fn prompt(&self, context: &IncidentContext, precedents: &[Precedent]) -> String {
        let mut prompt = self.backend.describe_incident(context);
        match context.outcome_of(AgentRole::Detection).and_then(|o| o.action().map(|a| (a, o.confidence()))) {
            Some((action, confidence)) => {
                let _ = writeln!(prompt, "Detection proposed {} (confidence {:.2}).", action, confidence);
            }
            None => prompt.push_str("Detection produced no usable finding.\n"),
        }
        describe_precedents(&mut prompt, precedents);
        prompt.push_str("\nWhat is the root cause, and which action addresses it?\n");
        prompt.push_str(RESPONSE_FORMAT);
        prompt
    }
}

#[async_trait]
impl Agent for DiagnosisAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Diagnosis
    }

    async fn execute(&self, context: Arc<IncidentContext>, deadline: Deadline, cancel: CancellationToken) -> AgentOutcome {
        let precedents = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return self.backend.degraded(&context, ReasonCode::Cancelled, "cancelled by operator");
            }
            found = gather_precedents(
                self.knowledge.as_ref(),
                &self.knowledge_guard,
                &context,
                self.backend.limits(),
                deadline,
                true,
            ) => found,
        };
        let prompt = self.prompt(&context, &precedents);
        self.backend.recommend(&context, prompt, deadline, &cancel).await
    }
}

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

pub const SYSTEM_PROMPT: &str = "You are the Prediction agent of an incident response swarm. \
Project how the incident evolves if left alone, estimate the blast radius, \
and name the action that best limits further impact.";

/// Impact forecasting. Uses direct precedents only; no correlation walk.
pub struct PredictionAgent {
    backend: InferenceBackend,
    knowledge: Arc<dyn KnowledgeBase>,
    knowledge_guard: Arc<DependencyGuard>,
}

impl PredictionAgent {
    pub fn new(backend: InferenceBackend, knowledge: Arc<dyn KnowledgeBase>, knowledge_guard: Arc<DependencyGuard>) -> Self {
        Self {
            backend,
            knowledge,
            knowledge_guard,
        }
    }

    fn prompt(&self, context: &IncidentContext, precedents: &[Precedent]) -> String {
        let mut prompt = self.backend.describe_incident(context);
        if let Some(outcome) = context.outcome_of(AgentRole::Detection) {
            if let Some(action) = outcome.action() {
                let _ = writeln!(prompt, "Detection proposed {} (confidence {:.2}).", action, outcome.confidence());
            }
        }
        describe_precedents(&mut prompt, precedents);
        prompt.push_str("\nHow will this develop over the next hour without intervention, and what limits the damage?\n");
        prompt.push_str(RESPONSE_FORMAT);
        prompt
    }
}

#[async_trait]
impl Agent for PredictionAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Prediction
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
                false,
            ) => found,
        };
        let prompt = self.prompt(&context, &precedents);
        self.backend.recommend(&context, prompt, deadline, &cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::{backend, context, Scripted};
    use std::time::Duration;
    use vigil_core::domain::dependency::{DependencyId, GuardConfig};
    use vigil_core::domain::knowledge::{KnowledgeError, ScoredPrecedent};
    use vigil_core::infrastructure::InMemoryKnowledgeBase;

    struct Unreachable;

    #[async_trait]
    impl KnowledgeBase for Unreachable {
        async fn similar(&self, _query: &str, _limit: usize) -> Result<Vec<ScoredPrecedent>, KnowledgeError> {
            Err(KnowledgeError::Unavailable("connection refused".into()))
        }

        async fn get(&self, _id: &str) -> Result<Option<Precedent>, KnowledgeError> {
            Err(KnowledgeError::Unavailable("connection refused".into()))
        }
    }

    fn kb_guard() -> Arc<DependencyGuard> {
        Arc::new(DependencyGuard::new(DependencyId::knowledge_base(), &GuardConfig::default()))
    }

    #[tokio::test]
    async fn test_related_precedents_are_not_followed() {
        let provider = Scripted::replying(r#"{"action": "shed_load", "confidence": 0.7}"#);
        let knowledge = InMemoryKnowledgeBase::new(vec![
            Precedent {
                id: "INC-1".into(),
                title: "Checkout latency spike".into(),
                summary: String::new(),
                action: "shed_load".into(),
                tags: vec![],
                related: vec!["INC-2".into()],
            },
            Precedent {
                id: "INC-2".into(),
                title: "Payment gateway brownout".into(),
                summary: String::new(),
                action: "failover_gateway".into(),
                tags: vec![],
                related: vec![],
            },
        ]);
        let agent = PredictionAgent::new(
            backend(AgentRole::Prediction, provider.clone()),
            Arc::new(knowledge),
            kb_guard(),
        );

        let outcome = agent
            .execute(Arc::new(context()), Deadline::after(Duration::from_secs(5)), CancellationToken::new())
            .await;

        assert_eq!(outcome.action(), Some("shed_load"));
        let prompt = provider.prompts.lock()[0].clone();
        assert!(prompt.contains("[INC-1]"));
        assert!(!prompt.contains("INC-2]"));
    }

    #[tokio::test]
    async fn test_knowledge_base_outage_still_recommends() {
        let provider = Scripted::replying(r#"{"action": "shed_load", "confidence": 0.6}"#);
        let agent = PredictionAgent::new(
            backend(AgentRole::Prediction, provider.clone()),
            Arc::new(Unreachable),
            kb_guard(),
        );

        let outcome = agent
            .execute(Arc::new(context()), Deadline::after(Duration::from_secs(5)), CancellationToken::new())
            .await;

        assert_eq!(outcome.action(), Some("shed_load"));
        assert!(provider.prompts.lock()[0].contains("No similar precedents on record."));
    }
}

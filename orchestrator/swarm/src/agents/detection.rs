// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use vigil_core::domain::agent::{Agent, AgentOutcome, AgentRole, Deadline, IncidentContext};

use super::{InferenceBackend, RESPONSE_FORMAT};

pub const SYSTEM_PROMPT: &str = "You are the Detection agent of an incident response swarm. \
Confirm whether the signals describe a real incident, classify it and name the first containment action.";

/// First responder: classifies the raw signals. Inference only.
pub struct DetectionAgent {
    backend: InferenceBackend,
}

impl DetectionAgent {
    pub fn new(backend: InferenceBackend) -> Self {
        Self { backend }
    }

    fn prompt(&self, context: &IncidentContext) -> String {
        let mut prompt = self.backend.describe_incident(context);
        prompt.push_str("\nIs this a genuine incident, and what should be done first?\n");
        prompt.push_str(RESPONSE_FORMAT);
        prompt
    }
}

#[async_trait]
impl Agent for DetectionAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Detection
    }

    async fn execute(&self, context: Arc<IncidentContext>, deadline: Deadline, cancel: CancellationToken) -> AgentOutcome {
        let prompt = self.prompt(&context);
        self.backend.recommend(&context, prompt, deadline, &cancel).await
    }
}

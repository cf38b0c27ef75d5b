// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Agents
//!
//! The five role agents plus the plumbing they share:
//!
//! | Item | Purpose |
//! |------|---------|
//! | [`InferenceBackend`] | guarded, deadline-bound, cancellable inference call producing an [`AgentOutcome`] |
//! | [`sample_logs`] | deterministic stride sampling bounded by `max_log_lines` |
//! | [`bound_prompt`] | truncate prompts to `max_prompt_bytes` on a char boundary |
//! | [`parse_recommendation`] | extract the `{action, confidence, evidence}` payload |
//! | [`correlate`] | breadth-first walk of related precedents up to `max_correlation_depth` |
//!
//! Agents never return errors. Every failure is folded into a
//! [`DegradedRecommendation`] with a [`ReasonCode`].

pub mod communication;
pub mod detection;
pub mod diagnosis;
pub mod prediction;
pub mod resolution;

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::fmt::Write as _;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use vigil_core::domain::agent::{
    Agent, AgentLimits, AgentOutcome, AgentRecommendation, AgentRole, Deadline, DegradedRecommendation,
    IncidentContext, ReasonCode,
};
use vigil_core::domain::dependency::{CallPriority, DependencyError, DependencyId};
use vigil_core::domain::knowledge::{KnowledgeBase, Precedent};
use vigil_core::domain::llm::{GenerationOptions, InferenceProvider};
use vigil_core::domain::node_config::{AgentsConfig, InferenceConfig};
use vigil_core::infrastructure::dependency_guard::{DependencyGuard, GuardRegistry};
use vigil_core::infrastructure::notification::GuardedChannel;

pub use communication::CommunicationAgent;
pub use detection::DetectionAgent;
pub use diagnosis::DiagnosisAgent;
pub use prediction::PredictionAgent;
pub use resolution::ResolutionAgent;

/// Keep at most `max` lines using a fixed stride. The first and last line
/// always survive; the same input always yields the same sample.
pub fn sample_logs(logs: &[String], max: usize) -> Vec<String> {
    if logs.len() <= max {
        return logs.to_vec();
    }
    match max {
        0 => Vec::new(),
        1 => vec![logs[logs.len() - 1].clone()],
        _ => {
            let last = logs.len() - 1;
            (0..max)
                .map(|i| &logs[i * last / (max - 1)])
                .cloned()
                .collect()
        }
    }
}

/// Truncate to at most `max_bytes`, never splitting a character.
pub fn bound_prompt(mut prompt: String, max_bytes: usize) -> String {
    if prompt.len() > max_bytes {
        let mut cut = max_bytes;
        while !prompt.is_char_boundary(cut) {
            cut -= 1;
        }
        prompt.truncate(cut);
    }
    prompt
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParsedRecommendation {
    pub action: String,
    pub confidence: f64,
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Parse the model's answer, accepting a bare object or one inside a fenced
/// code block.
pub fn parse_recommendation(text: &str) -> Result<ParsedRecommendation, String> {
    let body = extract_json(text).ok_or_else(|| "no JSON object in response".to_string())?;
    let parsed: ParsedRecommendation =
        serde_json::from_str(body).map_err(|e| format!("invalid recommendation payload: {}", e))?;
    if parsed.action.trim().is_empty() {
        return Err("empty action".to_string());
    }
    if !parsed.confidence.is_finite() || !(0.0..=1.0).contains(&parsed.confidence) {
        return Err(format!("confidence {} outside [0, 1]", parsed.confidence));
    }
    Ok(parsed)
}

fn extract_json(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```") {
        let after = &text[start + 3..];
        let after = after.strip_prefix("json").unwrap_or(after);
        if let Some(end) = after.find("```") {
            let fenced = after[..end].trim();
            if fenced.starts_with('{') {
                return Some(fenced);
            }
        }
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Breadth-first walk from `seeds` along `related` links, bounded by `depth`.
/// Unknown ids are skipped; a failing lookup ends the walk with what was
/// collected so far.
pub async fn correlate(
    knowledge: &dyn KnowledgeBase,
    guard: &DependencyGuard,
    priority: CallPriority,
    seeds: Vec<Precedent>,
    depth: usize,
) -> Vec<Precedent> {
    let mut visited: BTreeSet<String> = seeds.iter().map(|p| p.id.clone()).collect();
    let mut queue: VecDeque<(String, usize)> = seeds
        .iter()
        .flat_map(|p| p.related.iter().map(|id| (id.clone(), 1)))
        .collect();
    let mut found = seeds;

    while let Some((id, level)) = queue.pop_front() {
        if level > depth || !visited.insert(id.clone()) {
            continue;
        }
        let lookup = guard.call(priority, || knowledge.get(&id)).await;
        match lookup {
            Ok(Some(precedent)) => {
                queue.extend(precedent.related.iter().map(|r| (r.clone(), level + 1)));
                found.push(precedent);
            }
            Ok(None) => {}
            Err(e) => {
                debug!(precedent = %id, error = %e, "Correlation walk stopped");
                break;
            }
        }
    }
    found
}

/// Similar precedents for the incident, optionally expanded along `related`
/// links. Knowledge base trouble yields fewer precedents, never a failure.
pub async fn gather_precedents(
    knowledge: &dyn KnowledgeBase,
    guard: &DependencyGuard,
    context: &IncidentContext,
    limits: &AgentLimits,
    deadline: Deadline,
    walk: bool,
) -> Vec<Precedent> {
    let priority = CallPriority::from(context.severity);
    let lookup = async {
        let seeds = match guard
            .call(priority, || knowledge.similar(&context.title, limits.knowledge_results))
            .await
        {
            Ok(scored) => scored.into_iter().map(|s| s.precedent).collect(),
            Err(e) => {
                debug!(incident_id = %context.incident_id, error = %e, "Knowledge base lookup failed");
                return Vec::new();
            }
        };
        if walk {
            correlate(knowledge, guard, priority, seeds, limits.max_correlation_depth).await
        } else {
            seeds
        }
    };
    deadline.run(lookup).await.unwrap_or_default()
}

pub(crate) fn describe_precedents(prompt: &mut String, precedents: &[Precedent]) {
    if precedents.is_empty() {
        prompt.push_str("No similar precedents on record.\n");
        return;
    }
    prompt.push_str("Similar precedents:\n");
    for p in precedents {
        let _ = writeln!(prompt, "  [{}] {} -> {}", p.id, p.title, p.action);
    }
}

/// Shared inference path of every reasoning role.
pub struct InferenceBackend {
    role: AgentRole,
    provider: Arc<dyn InferenceProvider>,
    guard: Arc<DependencyGuard>,
    options: GenerationOptions,
    signing_key: Option<Vec<u8>>,
    limits: AgentLimits,
}

impl InferenceBackend {
    pub fn new(
        role: AgentRole,
        provider: Arc<dyn InferenceProvider>,
        guard: Arc<DependencyGuard>,
        options: GenerationOptions,
        limits: AgentLimits,
    ) -> Self {
        Self {
            role,
            provider,
            guard,
            options,
            signing_key: None,
            limits,
        }
    }

    pub fn with_signing_key(mut self, key: Option<Vec<u8>>) -> Self {
        self.signing_key = key;
        self
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn limits(&self) -> &AgentLimits {
        &self.limits
    }

    pub fn degraded(&self, context: &IncidentContext, reason: ReasonCode, detail: impl Into<String>) -> AgentOutcome {
        AgentOutcome::Degraded(DegradedRecommendation::new(
            self.role,
            reason,
            detail,
            context.dependency_version,
        ))
    }

    /// Common header every role prompt starts with.
    pub fn describe_incident(&self, context: &IncidentContext) -> String {
        let mut prompt = String::new();
        let _ = writeln!(
            prompt,
            "Incident {} [{}]: {}",
            context.incident_id,
            context.severity.as_str(),
            context.title
        );
        if let Some(impact) = &context.business_impact {
            let _ = writeln!(prompt, "Business impact: {}", impact);
        }
        if !context.metrics.is_empty() {
            prompt.push_str("Metrics:\n");
            for (name, value) in &context.metrics {
                let _ = writeln!(prompt, "  {} = {}", name, value);
            }
        }
        let logs = sample_logs(&context.logs, self.limits.max_log_lines);
        if !logs.is_empty() {
            prompt.push_str("Logs:\n");
            for line in logs {
                let _ = writeln!(prompt, "  {}", line);
            }
        }
        prompt
    }

    /// Ask the model, parse its answer and sign the result. Bounded by the
    /// deadline; abandons the call if `cancel` fires.
    pub async fn recommend(
        &self,
        context: &IncidentContext,
        prompt: String,
        deadline: Deadline,
        cancel: &CancellationToken,
    ) -> AgentOutcome {
        let prompt = bound_prompt(prompt, self.limits.max_prompt_bytes);
        let priority = CallPriority::from(context.severity);
        // An unparseable answer is a failed call as far as the breaker is concerned.
        let call = self.guard.call(priority, || async {
            let response = self
                .provider
                .generate(&prompt, &self.options)
                .await
                .map_err(DependencyError::from)?;
            let parsed = parse_recommendation(&response.text).map_err(DependencyError::Malformed)?;
            Ok::<_, DependencyError>((response, parsed))
        });

        let (response, parsed) = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return self.degraded(context, ReasonCode::Cancelled, "cancelled by operator");
            }
            result = deadline.run(call) => match result {
                Err(_) => return self.degraded(context, ReasonCode::DeadlineExceeded, "role deadline passed"),
                Ok(Err(e)) => return self.degraded(context, e.reason_code(), e.to_string()),
                Ok(Ok(answer)) => answer,
            },
        };

        metrics::histogram!("vigil_agent_inference_seconds", "role" => self.role.as_str())
            .record(response.latency.as_secs_f64());
        let recommendation = AgentRecommendation::new(
            self.role,
            parsed.action,
            parsed.confidence,
            parsed.evidence,
            context.dependency_version,
        );
        AgentOutcome::Recommended(match &self.signing_key {
            Some(key) => recommendation.signed(key),
            None => recommendation,
        })
    }
}

/// Everything needed to build the standard set of agents.
pub struct AgentDeps {
    pub provider: Arc<dyn InferenceProvider>,
    pub inference: Option<InferenceConfig>,
    pub knowledge: Arc<dyn KnowledgeBase>,
    pub channels: Vec<Arc<GuardedChannel>>,
    pub guards: Arc<GuardRegistry>,
    pub agents: AgentsConfig,
}

/// Build one agent per role, each with its own guarded inference dependency.
pub fn standard_agents(deps: &AgentDeps) -> HashMap<AgentRole, Arc<dyn Agent>> {
    let options = GenerationOptions {
        max_tokens: deps.inference.as_ref().map(|i| i.max_tokens),
        temperature: deps.inference.as_ref().map(|i| i.temperature),
        system: None,
    };
    let backend = |role: AgentRole, system: &str| {
        InferenceBackend::new(
            role,
            Arc::clone(&deps.provider),
            deps.guards.guard(&DependencyId::inference(role)),
            GenerationOptions {
                system: Some(system.to_string()),
                ..options.clone()
            },
            deps.agents.limits.clone(),
        )
        .with_signing_key(deps.agents.signing_keys.get(&role).map(|k| k.as_bytes().to_vec()))
    };
    let kb_guard = deps.guards.guard(&DependencyId::knowledge_base());

    let mut agents: HashMap<AgentRole, Arc<dyn Agent>> = HashMap::new();
    agents.insert(
        AgentRole::Detection,
        Arc::new(DetectionAgent::new(backend(AgentRole::Detection, detection::SYSTEM_PROMPT))),
    );
    agents.insert(
        AgentRole::Diagnosis,
        Arc::new(DiagnosisAgent::new(
            backend(AgentRole::Diagnosis, diagnosis::SYSTEM_PROMPT),
            Arc::clone(&deps.knowledge),
            Arc::clone(&kb_guard),
        )),
    );
    agents.insert(
        AgentRole::Prediction,
        Arc::new(PredictionAgent::new(
            backend(AgentRole::Prediction, prediction::SYSTEM_PROMPT),
            Arc::clone(&deps.knowledge),
            kb_guard,
        )),
    );
    agents.insert(
        AgentRole::Resolution,
        Arc::new(ResolutionAgent::new(backend(AgentRole::Resolution, resolution::SYSTEM_PROMPT))),
    );
    agents.insert(
        AgentRole::Communication,
        Arc::new(CommunicationAgent::new(deps.channels.clone())),
    );
    agents
}

/// The JSON contract appended to every reasoning prompt.
pub(crate) const RESPONSE_FORMAT: &str = "Respond with a single JSON object: \
{\"action\": \"<snake_case_action>\", \"confidence\": <0.0-1.0>, \"evidence\": [\"<short reference>\"]}";


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_logs_keeps_first_and_last() {
        let logs: Vec<String> = (0..1000).map(|i| format!("line {}", i)).collect();
        let sample = sample_logs(&logs, 5);
        assert_eq!(sample, vec!["line 0", "line 249", "line 499", "line 749", "line 999"]);
        assert_eq!(sample_logs(&logs, 5), sample);
        assert_eq!(sample_logs(&logs[..3], 5).len(), 3);
    }

    #[test]
    fn test_bound_prompt_respects_char_boundaries() {
        let prompt = "é".repeat(10);
        let bounded = bound_prompt(prompt, 5);
        assert_eq!(bounded.len(), 4);
        assert_eq!(bounded, "éé");
    }

    #[test]
    fn test_parse_fenced_and_bare_payloads() {
        let fenced = "Here you go:\n```json\n{\"action\": \"rollback_deploy\", \"confidence\": 0.8, \"evidence\": [\"deploy 4f2a\"]}\n```";
        let parsed = parse_recommendation(fenced).unwrap();
        assert_eq!(parsed.action, "rollback_deploy");
        assert_eq!(parsed.evidence, vec!["deploy 4f2a"]);

        let bare = "{\"action\": \"scale_out\", \"confidence\": 0.4}";
        assert_eq!(parse_recommendation(bare).unwrap().confidence, 0.4);
    }

    #[tokio::test]
    async fn test_unparseable_answer_counts_against_breaker() {
        use std::time::Duration;
        use vigil_core::domain::dependency::GuardConfig;

        let role = AgentRole::Diagnosis;
        let guard = Arc::new(DependencyGuard::new(DependencyId::inference(role), &GuardConfig::default()));
        let backend = InferenceBackend::new(
            role,
            testing::Scripted::replying("I think you should roll back"),
            Arc::clone(&guard),
            GenerationOptions::default(),
            AgentLimits::default(),
        );

        let outcome = backend
            .recommend(
                &testing::context(),
                "diagnose".into(),
                Deadline::after(Duration::from_secs(5)),
                &CancellationToken::new(),
            )
            .await;

        assert_eq!(outcome.reason(), Some(ReasonCode::MalformedPayload));
        assert_eq!(guard.breaker().snapshot().consecutive_failures, 1);
    }

    #[test]
    fn test_parse_rejects_bad_payloads() {
        assert!(parse_recommendation("I think you should roll back").is_err());
        assert!(parse_recommendation("{\"action\": \"\", \"confidence\": 0.4}").is_err());
        assert!(parse_recommendation("{\"action\": \"x\", \"confidence\": 1.4}").is_err());
        assert!(parse_recommendation("{\"confidence\": 0.4}").is_err());
    }
}

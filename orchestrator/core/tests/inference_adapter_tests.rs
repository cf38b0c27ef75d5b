// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! OpenAI-compatible adapter against a mock HTTP server, including the way its
//! failures reach the circuit breaker through a dependency guard.

use std::time::Duration;
use vigil_core::domain::agent::AgentRole;
use vigil_core::domain::dependency::{
    BreakerConfig, CallPriority, CircuitState, DependencyError, DependencyId, GuardConfig, RateLimitConfig,
};
use vigil_core::domain::llm::{FinishReason, GenerationOptions, InferenceError, InferenceProvider};
use vigil_core::infrastructure::llm::OpenAICompatibleInference;
use vigil_core::infrastructure::DependencyGuard;

const COMPLETION: &str = r#"{
    "choices": [{
        "message": {"role": "assistant", "content": "{\"action\":\"rollback_deploy\",\"confidence\":0.8}"},
        "finish_reason": "stop"
    }],
    "usage": {"prompt_tokens": 120, "completion_tokens": 14, "total_tokens": 134}
}"#;

#[tokio::test]
async fn test_generate_sends_system_prompt_and_parses_usage() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/v1/chat/completions")
        .match_header("authorization", "Bearer sk-test")
        .match_body(mockito::Matcher::PartialJsonString(
            r#"{"model":"triage-small","messages":[{"role":"system","content":"You are Diagnosis."}]}"#.into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(COMPLETION)
        .create_async()
        .await;

    let provider = OpenAICompatibleInference::new(
        format!("{}/v1", server.url()),
        Some("sk-test".into()),
        "triage-small".into(),
    );
    let options = GenerationOptions {
        system: Some("You are Diagnosis.".into()),
        ..GenerationOptions::default()
    };
    let response = provider.generate("what broke?", &options).await.unwrap();

    mock.assert_async().await;
    assert!(response.text.contains("rollback_deploy"));
    assert_eq!(response.usage.total_tokens, 134);
    assert_eq!(response.finish_reason, FinishReason::Stop);
    assert_eq!(response.model, "triage-small");
}

#[tokio::test]
async fn test_status_codes_map_to_inference_errors() {
    let mut server = mockito::Server::new_async().await;
    let provider = OpenAICompatibleInference::new(server.url(), None, "m".into());

    let throttled = server
        .mock("POST", "/chat/completions")
        .with_status(429)
        .create_async()
        .await;
    assert!(matches!(
        provider.generate("p", &GenerationOptions::default()).await,
        Err(InferenceError::Throttled)
    ));
    throttled.remove_async().await;

    let unauthorized = server
        .mock("POST", "/chat/completions")
        .with_status(401)
        .with_body("bad key")
        .create_async()
        .await;
    assert!(matches!(
        provider.generate("p", &GenerationOptions::default()).await,
        Err(InferenceError::Authentication(_))
    ));
    unauthorized.remove_async().await;

    server
        .mock("POST", "/chat/completions")
        .with_status(200)
        .with_body("not json")
        .create_async()
        .await;
    assert!(matches!(
        provider.generate("p", &GenerationOptions::default()).await,
        Err(InferenceError::InvalidResponse(_))
    ));
}

#[tokio::test]
async fn test_provider_outage_trips_guarded_breaker() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/chat/completions")
        .with_status(503)
        .expect(2)
        .create_async()
        .await;

    let provider = OpenAICompatibleInference::new(server.url(), None, "m".into());
    let guard = DependencyGuard::new(
        DependencyId::inference(AgentRole::Diagnosis),
        &GuardConfig {
            breaker: BreakerConfig {
                failure_threshold: 2,
                cooldown: Duration::from_secs(60),
                half_open_trials: 1,
                call_timeout: Duration::from_secs(5),
            },
            rate_limit: RateLimitConfig::default(),
        },
    );

    let options = GenerationOptions::default();
    for _ in 0..2 {
        let result = guard
            .call(CallPriority::High, || provider.generate("p", &options))
            .await;
        assert!(matches!(result, Err(DependencyError::Transient(_))));
    }
    assert_eq!(guard.breaker().state(), CircuitState::Open);

    let rejected = guard
        .call(CallPriority::High, || provider.generate("p", &options))
        .await;
    assert!(matches!(rejected, Err(DependencyError::CircuitOpen { .. })));
    mock.assert_async().await;
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP client for communicating with daemon API

use anyhow::{Context, Result};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

use vigil_core::domain::agent::{AgentHealth, AgentRole};
use vigil_core::domain::incident::{IncidentId, IncidentReport};

use super::api::{
    AbortResponse, AbortStatus, ErrorBody, OperatorRequest, ResetResponse, TriggerRequest, TriggerResponse,
};

#[derive(Debug, Clone)]
pub struct DaemonClient {
    client: Client,
    base_url: String,
}

impl DaemonClient {
    pub fn new(host: &str, port: u16) -> Result<Self> {
        Self::with_base_url(super::base_url(host, port))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub async fn health(&self) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .context("Failed to reach daemon")?;
        parse(response, "Health check failed").await
    }

    pub async fn trigger_incident(&self, report: IncidentReport, operator: &str) -> Result<IncidentId> {
        let response = self
            .client
            .post(format!("{}/v1/admin/incidents", self.base_url))
            .json(&TriggerRequest {
                operator: operator.to_string(),
                report,
            })
            .send()
            .await
            .context("Failed to trigger incident")?;

        let body: TriggerResponse = parse(response, "Failed to trigger incident").await?;
        Ok(body.incident_id)
    }

    /// Replayed incident as returned by the daemon.
    pub async fn get_incident(&self, incident_id: IncidentId) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(format!("{}/v1/incidents/{}", self.base_url, incident_id))
            .send()
            .await
            .context("Failed to get incident")?;
        parse(response, "Failed to get incident").await
    }

    pub async fn agent_health(&self, incident_id: IncidentId) -> Result<Vec<AgentHealth>> {
        let response = self
            .client
            .get(format!("{}/v1/incidents/{}/health", self.base_url, incident_id))
            .send()
            .await
            .context("Failed to get agent health")?;
        parse(response, "Failed to get agent health").await
    }

    pub async fn reset_agents(&self, incident_id: IncidentId, operator: &str) -> Result<Vec<AgentRole>> {
        let response = self
            .client
            .post(format!("{}/v1/admin/incidents/{}/reset-agents", self.base_url, incident_id))
            .json(&OperatorRequest {
                operator: operator.to_string(),
            })
            .send()
            .await
            .context("Failed to reset agents")?;

        let body: ResetResponse = parse(response, "Failed to reset agents").await?;
        Ok(body.reset)
    }

    pub async fn abort_incident(&self, incident_id: IncidentId, operator: &str) -> Result<AbortStatus> {
        let response = self
            .client
            .post(format!("{}/v1/admin/incidents/{}/abort", self.base_url, incident_id))
            .json(&OperatorRequest {
                operator: operator.to_string(),
            })
            .send()
            .await
            .context("Failed to abort incident")?;

        let body: AbortResponse = parse(response, "Failed to abort incident").await?;
        Ok(body.status)
    }
}

/// Decode a success body, or turn the daemon's error body into an error.
async fn parse<T: DeserializeOwned>(response: Response, what: &str) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        anyhow::bail!("{} ({}): {}", what, status, message);
    }

    response
        .json()
        .await
        .with_context(|| format!("{}: unreadable response", what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::domain::incident::Severity;

    fn report() -> IncidentReport {
        IncidentReport {
            title: "Checkout p99 latency above SLO".into(),
            severity: Severity::Sev2,
            business_impact: None,
            logs: vec![],
            metrics: Default::default(),
            source: Some("alertmanager".into()),
        }
    }

    #[tokio::test]
    async fn test_trigger_incident_posts_report() {
        let mut server = mockito::Server::new_async().await;
        let id = IncidentId::new();
        let mock = server
            .mock("POST", "/v1/admin/incidents")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "operator": "alice",
                "report": { "title": "Checkout p99 latency above SLO", "severity": "sev2" }
            })))
            .with_status(202)
            .with_header("content-type", "application/json")
            .with_body(serde_json::json!({ "incident_id": id }).to_string())
            .create_async()
            .await;

        let client = DaemonClient::with_base_url(server.url()).unwrap();
        assert_eq!(client.trigger_incident(report(), "alice").await.unwrap(), id);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_error_body_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let id = IncidentId::new();
        server
            .mock("POST", format!("/v1/admin/incidents/{}/abort", id).as_str())
            .with_status(409)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"Incident is RESOLVED and can no longer change"}"#)
            .create_async()
            .await;

        let client = DaemonClient::with_base_url(server.url()).unwrap();
        let err = client.abort_incident(id, "bob").await.unwrap_err().to_string();
        assert!(err.contains("409"), "{}", err);
        assert!(err.contains("can no longer change"), "{}", err);
    }

    #[tokio::test]
    async fn test_reset_agents_and_abort() {
        let mut server = mockito::Server::new_async().await;
        let id = IncidentId::new();
        server
            .mock("POST", format!("/v1/admin/incidents/{}/reset-agents", id).as_str())
            .match_body(mockito::Matcher::Json(serde_json::json!({ "operator": "bob" })))
            .with_status(200)
            .with_body(serde_json::json!({ "incident_id": id, "reset": ["diagnosis", "resolution"] }).to_string())
            .create_async()
            .await;
        server
            .mock("POST", format!("/v1/admin/incidents/{}/abort", id).as_str())
            .with_status(200)
            .with_body(serde_json::json!({ "incident_id": id, "status": "signalled" }).to_string())
            .create_async()
            .await;

        let client = DaemonClient::with_base_url(server.url()).unwrap();
        assert_eq!(
            client.reset_agents(id, "bob").await.unwrap(),
            vec![AgentRole::Diagnosis, AgentRole::Resolution]
        );
        assert_eq!(client.abort_incident(id, "bob").await.unwrap(), AbortStatus::Signalled);
    }
}

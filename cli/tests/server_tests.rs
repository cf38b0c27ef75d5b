// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use tower::ServiceExt;

use vigil::daemon::server::{build_router, build_state, AppState};
use vigil_core::domain::incident::IncidentId;
use vigil_core::domain::node_config::NodeConfigManifest;

async fn app() -> (Router, AppState) {
    let state = build_state(&NodeConfigManifest::default()).await.unwrap();
    (build_router(state.clone()), state)
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn trigger_body(operator: &str, title: &str) -> serde_json::Value {
    serde_json::json!({
        "operator": operator,
        "report": {
            "title": title,
            "severity": "sev2",
            "logs": ["deploy 4f2a rolled out"],
            "metrics": { "error_rate": 0.2 }
        }
    })
}

#[tokio::test]
async fn test_health() {
    let (app, _) = app().await;
    let response = app.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["status"], "healthy");
}

#[tokio::test]
async fn test_trigger_then_get_incident() {
    let (app, _) = app().await;

    let response = app
        .clone()
        .oneshot(post_json("/v1/admin/incidents", trigger_body("alice", "Checkout p99 above SLO")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let incident_id = json_body(response).await["incident_id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(get(&format!("/v1/incidents/{}", incident_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let view = json_body(response).await;
    assert_eq!(view["incident"]["report"]["title"], "Checkout p99 above SLO");
    assert_eq!(view["incident"]["opened_by"], "alice");
    assert!(view["version"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_trigger_rejects_blank_operator() {
    let (app, _) = app().await;
    let response = app
        .oneshot(post_json("/v1/admin/incidents", trigger_body("  ", "Disk full on db-3")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(json_body(response).await["error"].as_str().unwrap().contains("Operator"));
}

#[tokio::test]
async fn test_unknown_incident_is_not_found() {
    let (app, _) = app().await;
    let id = IncidentId::new();

    let response = app
        .clone()
        .oneshot(get(&format!("/v1/incidents/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .oneshot(post_json(
            &format!("/v1/admin/incidents/{}/abort", id),
            serde_json::json!({ "operator": "bob" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_unknown_subscriber_heartbeat_is_not_found() {
    let (app, _) = app().await;
    let response = app
        .oneshot(post_json("/v1/observers/999/heartbeat", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_stream_announces_subscriber_and_releases_it() {
    let (app, state) = app().await;

    let response = app.clone().oneshot(get("/v1/stream")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE].to_str().unwrap(),
        "text/event-stream"
    );
    assert_eq!(state.hub.subscriber_count(), 1);

    let mut body = response.into_body().into_data_stream();
    let first = body.next().await.unwrap().unwrap();
    let text = String::from_utf8(first.to_vec()).unwrap();
    assert!(text.contains("event: subscribed"), "{}", text);
    assert!(text.contains("\"subscriber_id\":1"), "{}", text);

    let response = app
        .clone()
        .oneshot(post_json("/v1/observers/1/heartbeat", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = app
        .oneshot(post_json("/v1/observers/1/ack", serde_json::json!({ "sequence": 3 })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        state
            .hub
            .subscriber_info(vigil_core::infrastructure::broadcast_hub::SubscriberId(1))
            .unwrap()
            .last_acknowledged,
        Some(3)
    );

    drop(body);
    assert_eq!(state.hub.subscriber_count(), 0);
}

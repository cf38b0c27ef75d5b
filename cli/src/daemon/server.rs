// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Daemon HTTP server implementation
//!
//! Builds the swarm from configuration, resumes incidents left active by a
//! previous process and serves:
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `GET /health` | Liveness and uptime |
//! | `GET /v1/stream` | SSE feed of event envelopes; first frame carries the subscriber id |
//! | `POST /v1/observers/{id}/heartbeat` | Keep a subscriber alive |
//! | `POST /v1/observers/{id}/ack` | Record the last processed sequence |
//! | `POST /v1/admin/incidents` | Trigger an incident |
//! | `POST /v1/admin/incidents/{id}/reset-agents` | Reset inference breakers |
//! | `POST /v1/admin/incidents/{id}/abort` | Abort and escalate |
//! | `GET /v1/incidents/{id}` | Replayed incident state |
//! | `GET /v1/incidents/{id}/health` | Per-role agent health |

use anyhow::{Context, Result};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use vigil_core::application::event_log::{EventLog, EventLogError};
use vigil_core::application::store_factory::create_event_store;
use vigil_core::domain::agent::AgentHealth;
use vigil_core::domain::events::EventPublisher;
use vigil_core::domain::incident::IncidentId;
use vigil_core::domain::knowledge::KnowledgeBase;
use vigil_core::domain::node_config::{resolve_secret, NodeConfigManifest};
use vigil_core::domain::repository::{EventStore, EventStoreError};
use vigil_core::infrastructure::broadcast_hub::{HubError, HubFrame, SubscriberFilter, SubscriberId};
use vigil_core::infrastructure::{llm, notification, BroadcastHub, GuardRegistry, InMemoryEventStore, InMemoryKnowledgeBase};
use vigil_swarm::agents::{standard_agents, AgentDeps};
use vigil_swarm::application::{AdminCommands, AdminError, CoordinatorError};
use vigil_swarm::{ConsensusEngine, DependencyGraph, SwarmCoordinator};

use super::api::{
    AbortResponse, AckRequest, ErrorBody, IncidentView, OperatorRequest, ResetResponse, TriggerRequest,
    TriggerResponse,
};

pub async fn start_daemon(config_path: Option<PathBuf>, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = NodeConfigManifest::load_or_default(config_path).context("Failed to load configuration")?;
    if let Some(host) = host {
        config.spec.api.bind_address = host;
    }
    if let Some(port) = port {
        config.spec.api.port = port;
    }
    config.validate().context("Configuration validation failed")?;

    info!(name = %config.metadata.name, "Vigil daemon starting (PID: {})", std::process::id());

    let observability = &config.spec.observability;
    if observability.metrics.enabled {
        install_metrics_exporter(&config.spec.api.bind_address, observability.metrics.port)?;
    }

    let state = build_state(&config).await?;
    let hub = Arc::clone(&state.hub);

    let resumed = state
        .admin
        .coordinator()
        .resume_active()
        .await
        .context("Failed to resume active incidents")?;
    if !resumed.is_empty() {
        info!(count = resumed.len(), "Resumed active incidents");
    }

    let app = build_router(state);

    let addr = format!("{}:{}", config.spec.api.bind_address, config.spec.api.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("Daemon listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    hub.shutdown();
    info!("Daemon shutting down");

    Ok(())
}

fn install_metrics_exporter(bind_address: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .with_context(|| format!("Invalid metrics address {}:{}", bind_address, port))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!("Prometheus exporter listening on {}", addr);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

// Application state
#[derive(Clone)]
pub struct AppState {
    pub admin: Arc<AdminCommands>,
    pub hub: Arc<BroadcastHub>,
    pub start_time: std::time::Instant,
}

impl AppState {
    fn log(&self) -> &Arc<EventLog> {
        self.admin.coordinator().log()
    }
}

/// Wire the event log, hub, guards, agents, consensus engine and
/// coordinator described by `config`. Starts the hub's dispatch loops.
pub async fn build_state(config: &NodeConfigManifest) -> Result<AppState> {
    let spec = &config.spec;

    let backend = spec.storage.to_backend()?;
    let store = create_event_store(&backend)
        .await
        .context("Failed to initialize event store")?;
    let replica = Arc::new(InMemoryEventStore::new());
    seed_replica(store.as_ref(), &replica).await?;

    let hub = Arc::new(BroadcastHub::new(spec.hub.clone()));
    hub.start();
    let publisher: Arc<dyn EventPublisher> = Arc::clone(&hub) as Arc<dyn EventPublisher>;
    let log = Arc::new(EventLog::new(store, publisher).with_replica(replica));

    let guards = Arc::new(GuardRegistry::new(spec.dependencies.clone()));
    let provider = llm::from_config(spec.inference.as_ref()).context("Failed to initialize inference provider")?;
    let knowledge: Arc<dyn KnowledgeBase> = match &spec.knowledge_base.precedents_path {
        Some(path) => Arc::new(
            InMemoryKnowledgeBase::from_file(path)
                .with_context(|| format!("Failed to load precedents from {:?}", path))?,
        ),
        None => Arc::new(InMemoryKnowledgeBase::default()),
    };
    let channels = notification::from_config(&spec.notifications, &guards)?;

    let mut agents_config = spec.agents.clone();
    for key in agents_config.signing_keys.values_mut() {
        *key = resolve_secret(key)?;
    }
    let signing_keys: Vec<_> = agents_config
        .signing_keys
        .iter()
        .map(|(role, key)| (*role, key.as_bytes().to_vec()))
        .collect();

    let agents = standard_agents(&AgentDeps {
        provider,
        inference: spec.inference.clone(),
        knowledge,
        channels,
        guards: Arc::clone(&guards),
        agents: agents_config,
    });
    let engine = ConsensusEngine::new(spec.consensus.clone()).with_signing_keys(signing_keys);
    let graph = DependencyGraph::standard()?;

    let coordinator = Arc::new(SwarmCoordinator::new(
        log,
        agents,
        engine,
        graph,
        spec.coordinator.clone(),
        guards,
    )?);

    Ok(AppState {
        admin: Arc::new(AdminCommands::new(coordinator)),
        hub,
        start_time: std::time::Instant::now(),
    })
}

/// Mirror every stored stream into the replica so later appends extend it.
async fn seed_replica(store: &dyn EventStore, replica: &InMemoryEventStore) -> Result<()> {
    for incident_id in store.incident_ids().await? {
        let events = match store.read(&incident_id).await {
            Ok(events) => events,
            Err(e) => {
                warn!(incident_id = %incident_id, error = %e, "Skipping unreadable stream while seeding replica");
                continue;
            }
        };
        for event in events {
            replica.import(event)?;
        }
    }
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/v1/stream", get(stream_handler))
        .route("/v1/observers/{id}/heartbeat", post(heartbeat_handler))
        .route("/v1/observers/{id}/ack", post(ack_handler))
        .route("/v1/admin/incidents", post(trigger_handler))
        .route("/v1/admin/incidents/{id}/reset-agents", post(reset_agents_handler))
        .route("/v1/admin/incidents/{id}/abort", post(abort_handler))
        .route("/v1/incidents/{id}", get(get_incident_handler))
        .route("/v1/incidents/{id}/health", get(agent_health_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

/// Error body returned by every handler.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        metrics::counter!("vigil_api_errors_total", "status" => self.status.as_u16().to_string()).increment(1);
        if self.status.is_server_error() {
            error!(status = %self.status, "{}", self.message);
        }
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<CoordinatorError> for ApiError {
    fn from(err: CoordinatorError) -> Self {
        let status = match &err {
            CoordinatorError::Log(EventLogError::NotFound(_)) => StatusCode::NOT_FOUND,
            CoordinatorError::NotActive { .. }
            | CoordinatorError::AlreadyRunning(_)
            | CoordinatorError::RetriesExhausted { .. }
            | CoordinatorError::Store(EventStoreError::VersionConflict { .. }) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<AdminError> for ApiError {
    fn from(err: AdminError) -> Self {
        match err {
            AdminError::Coordinator(inner) => inner.into(),
            other => Self::new(StatusCode::BAD_REQUEST, other.to_string()),
        }
    }
}

impl From<EventLogError> for ApiError {
    fn from(err: EventLogError) -> Self {
        CoordinatorError::from(err).into()
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        let status = match err {
            HubError::Full(_) => StatusCode::SERVICE_UNAVAILABLE,
            HubError::UnknownSubscriber(_) => StatusCode::NOT_FOUND,
        };
        Self::new(status, err.to_string())
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "uptime_seconds": state.start_time.elapsed().as_secs(),
        "subscribers": state.hub.subscriber_count(),
    }))
}

#[derive(Debug, Deserialize)]
struct StreamParams {
    incident: Option<IncidentId>,
}

/// Unsubscribes when the SSE response is dropped.
struct ObserverGuard {
    hub: Arc<BroadcastHub>,
    id: SubscriberId,
}

impl Drop for ObserverGuard {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}

fn frame_event(frame: HubFrame) -> Result<Event, axum::Error> {
    match frame {
        HubFrame::Batch(envelopes) => Event::default().event("batch").json_data(envelopes),
        HubFrame::Disconnected(reason) => Event::default()
            .event("disconnected")
            .json_data(serde_json::json!({ "reason": reason })),
    }
}

async fn stream_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<StreamParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let filter = match params.incident {
        Some(incident_id) => SubscriberFilter::incident(incident_id),
        None => SubscriberFilter::all(),
    };
    let subscription = state.hub.subscribe(filter)?;
    metrics::counter!("vigil_api_streams_opened_total").increment(1);
    let guard = ObserverGuard {
        hub: Arc::clone(&state.hub),
        id: subscription.id,
    };

    let hello = Event::default()
        .event("subscribed")
        .json_data(serde_json::json!({ "subscriber_id": subscription.id }));
    // The hub drops the sender after a Disconnected frame, which ends the stream.
    let frames = ReceiverStream::new(subscription.frames).map(move |frame| {
        let _ = &guard;
        frame_event(frame)
    });

    Ok(Sse::new(tokio_stream::once(hello).chain(frames)).keep_alive(KeepAlive::default()))
}

async fn heartbeat_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    state.hub.heartbeat(SubscriberId(id))?;
    Ok(StatusCode::NO_CONTENT)
}

async fn ack_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(request): Json<AckRequest>,
) -> Result<StatusCode, ApiError> {
    state.hub.acknowledge(SubscriberId(id), request.sequence)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn trigger_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TriggerRequest>,
) -> Result<(StatusCode, Json<TriggerResponse>), ApiError> {
    let incident_id = state.admin.trigger_incident(request.report, &request.operator).await?;
    Ok((StatusCode::ACCEPTED, Json(TriggerResponse { incident_id })))
}

async fn reset_agents_handler(
    State(state): State<Arc<AppState>>,
    Path(incident_id): Path<IncidentId>,
    Json(request): Json<OperatorRequest>,
) -> Result<Json<ResetResponse>, ApiError> {
    let reset = state.admin.reset_agents(incident_id, &request.operator).await?;
    Ok(Json(ResetResponse { incident_id, reset }))
}

async fn abort_handler(
    State(state): State<Arc<AppState>>,
    Path(incident_id): Path<IncidentId>,
    Json(request): Json<OperatorRequest>,
) -> Result<Json<AbortResponse>, ApiError> {
    let outcome = state.admin.abort(incident_id, &request.operator).await?;
    Ok(Json(AbortResponse {
        incident_id,
        status: outcome.into(),
    }))
}

async fn get_incident_handler(
    State(state): State<Arc<AppState>>,
    Path(incident_id): Path<IncidentId>,
) -> Result<Json<IncidentView>, ApiError> {
    let incident = state.log().load(&incident_id).await?;
    Ok(Json(IncidentView {
        version: incident.version(),
        running: state.admin.coordinator().is_running(&incident_id),
        badge: incident.badge(),
        incident,
    }))
}

async fn agent_health_handler(
    State(state): State<Arc<AppState>>,
    Path(incident_id): Path<IncidentId>,
) -> Result<Json<Vec<AgentHealth>>, ApiError> {
    Ok(Json(state.admin.coordinator().agent_health(incident_id).await?))
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Event Log - Application Layer
//!
//! Single write path for incident streams. Wraps the configured
//! [`EventStore`] and:
//! - publishes an observer envelope after every successful append
//! - mirrors each sealed event into an optional in-memory replica
//! - repairs a stream from that replica when a read detects a broken chain
//!
//! Version conflicts are returned to the caller untouched; only the caller
//! knows whether replaying and retrying is meaningful.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::domain::events::{EventEnvelope, EventKind, EventPublisher, IncidentEvent};
use crate::domain::incident::{Incident, IncidentId, IncidentReport, ReplayError};
use crate::domain::repository::{EventStore, EventStoreError, ReplicaSource};
use crate::infrastructure::event_store::InMemoryEventStore;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EventLogError {
    #[error(transparent)]
    Store(#[from] EventStoreError),

    #[error("Replay failed: {0}")]
    Replay(#[from] ReplayError),

    #[error("Incident {0} not found")]
    NotFound(IncidentId),
}

/// Publisher that drops every envelope.
pub struct NoopPublisher;

impl EventPublisher for NoopPublisher {
    fn publish(&self, _envelope: EventEnvelope) {}
}

pub struct EventLog {
    store: Arc<dyn EventStore>,
    replica: Option<Arc<InMemoryEventStore>>,
    publisher: Arc<dyn EventPublisher>,
}

impl EventLog {
    pub fn new(store: Arc<dyn EventStore>, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            store,
            replica: None,
            publisher,
        }
    }

    /// Keep a verified in-memory mirror usable by [`EventStore::repair_from`].
    pub fn with_replica(mut self, replica: Arc<InMemoryEventStore>) -> Self {
        self.replica = Some(replica);
        self
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub async fn append(
        &self,
        incident_id: &IncidentId,
        expected_version: u64,
        kind: EventKind,
    ) -> Result<IncidentEvent, EventStoreError> {
        let event = self.store.append(incident_id, expected_version, kind).await?;
        if let Some(replica) = &self.replica {
            if replica.import(event.clone()).is_err() {
                self.catch_up(incident_id, replica).await;
            }
        }
        self.publisher.publish(EventEnvelope::from_event(&event));
        Ok(event)
    }

    /// Concurrent writers can finish out of order; mirror whatever the primary
    /// holds that the replica is missing.
    async fn catch_up(&self, incident_id: &IncidentId, replica: &InMemoryEventStore) {
        let result = match self.store.read(incident_id).await {
            Ok(events) => replica.import_all(events),
            Err(e) => Err(e),
        };
        match result {
            Ok(_) => debug!(incident_id = %incident_id, "Replica caught up with primary stream"),
            Err(e) => warn!(incident_id = %incident_id, error = %e, "Replica diverged from primary stream"),
        }
    }

    /// Open a new incident stream. The id is fresh, so this never conflicts.
    pub async fn open(&self, report: IncidentReport, operator: &str) -> Result<IncidentEvent, EventStoreError> {
        let id = IncidentId::new();
        self.append(
            &id,
            0,
            EventKind::IncidentOpened {
                report,
                operator: operator.to_string(),
            },
        )
        .await
    }

    /// Verified stream. A broken chain is repaired from the replica once,
    /// then reread.
    pub async fn read(&self, incident_id: &IncidentId) -> Result<Vec<IncidentEvent>, EventStoreError> {
        match self.store.read(incident_id).await {
            Err(EventStoreError::CorruptionDetected { sequence, .. }) => {
                let Some(replica) = &self.replica else {
                    error!(incident_id = %incident_id, sequence, "Corrupted stream and no replica to repair from");
                    return Err(EventStoreError::CorruptionDetected {
                        incident_id: *incident_id,
                        sequence,
                    });
                };
                let source: &dyn ReplicaSource = replica.as_ref();
                self.store.repair_from(incident_id, source).await?;
                self.store.read(incident_id).await
            }
            other => other,
        }
    }

    /// Replay the stream into the incident aggregate.
    pub async fn load(&self, incident_id: &IncidentId) -> Result<Incident, EventLogError> {
        let events = self.read(incident_id).await?;
        if events.is_empty() {
            return Err(EventLogError::NotFound(*incident_id));
        }
        Ok(Incident::replay(&events)?)
    }

    pub async fn incident_ids(&self) -> Result<Vec<IncidentId>, EventStoreError> {
        self.store.incident_ids().await
    }
}

#[async_trait]
impl ReplicaSource for EventLog {
    async fn fetch(&self, incident_id: &IncidentId) -> Result<Vec<IncidentEvent>, EventStoreError> {
        self.read(incident_id).await
    }
}

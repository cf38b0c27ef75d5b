// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// In-Memory Event Store
//
// One stream per incident in a DashMap. A per-stream RwLock guards only the
// compare-and-push of an append; streams of different incidents never share a
// lock. Used for development, tests and as the replica of the durable store.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::domain::events::{verify_chain, EventKind, IncidentEvent, GENESIS_HASH};
use crate::domain::incident::IncidentId;
use crate::domain::repository::{merge_replica, EventStore, EventStoreError, ReplicaSource};

type Stream = Arc<RwLock<Vec<IncidentEvent>>>;

#[derive(Clone, Default)]
pub struct InMemoryEventStore {
    streams: Arc<DashMap<IncidentId, Stream>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn stream(&self, incident_id: &IncidentId) -> Option<Stream> {
        self.streams.get(incident_id).map(|s| Arc::clone(s.value()))
    }

    fn snapshot(&self, incident_id: &IncidentId) -> Vec<IncidentEvent> {
        self.stream(incident_id)
            .map(|s| s.read().clone())
            .unwrap_or_default()
    }

    /// Copy an already sealed event from another store. Accepted only if it
    /// extends the local chain exactly; an event already mirrored is a no-op.
    pub fn import(&self, event: IncidentEvent) -> Result<(), EventStoreError> {
        let stream = Arc::clone(self.streams.entry(event.incident_id).or_default().value());
        let mut stream = stream.write();
        if let Some(existing) = stream.get((event.sequence as usize).wrapping_sub(1)) {
            if existing.hash == event.hash {
                return Ok(());
            }
        }
        let head = stream.last().map(|e| e.hash.as_str()).unwrap_or(GENESIS_HASH);
        if event.sequence != stream.len() as u64 + 1 || event.prev_hash != head || !event.is_intact() {
            return Err(EventStoreError::ReplicaRejected {
                incident_id: event.incident_id,
                reason: format!("event {} does not extend the mirrored chain", event.sequence),
            });
        }
        stream.push(event);
        Ok(())
    }

    /// Import every event of `events` not yet mirrored, in order.
    pub fn import_all(&self, events: Vec<IncidentEvent>) -> Result<u64, EventStoreError> {
        let mut imported = 0;
        for event in events {
            self.import(event)?;
            imported += 1;
        }
        Ok(imported)
    }

    /// Overwrite a stored event in place, bypassing the chain.
    #[cfg(test)]
    pub(crate) fn tamper(&self, incident_id: &IncidentId, sequence: u64, kind: EventKind) {
        if let Some(stream) = self.stream(incident_id) {
            if let Some(event) = stream.write().get_mut(sequence as usize - 1) {
                event.kind = kind;
            }
        }
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        incident_id: &IncidentId,
        expected_version: u64,
        kind: EventKind,
    ) -> Result<IncidentEvent, EventStoreError> {
        let stream = Arc::clone(self.streams.entry(*incident_id).or_default().value());
        let mut events = stream.write();

        let actual = events.len() as u64;
        if actual != expected_version {
            metrics::counter!("vigil_event_store_conflicts_total").increment(1);
            return Err(EventStoreError::VersionConflict {
                incident_id: *incident_id,
                expected: expected_version,
                actual,
            });
        }

        let prev_hash = events
            .last()
            .map(|e| e.hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let event = IncidentEvent::seal(*incident_id, actual + 1, kind, &prev_hash);
        events.push(event.clone());
        drop(events);

        debug!(
            incident_id = %incident_id,
            sequence = event.sequence,
            event_type = event.kind.event_type(),
            "Appended event"
        );
        metrics::counter!("vigil_events_appended_total", "type" => event.kind.event_type())
            .increment(1);
        Ok(event)
    }

    async fn read(&self, incident_id: &IncidentId) -> Result<Vec<IncidentEvent>, EventStoreError> {
        let events = self.snapshot(incident_id);
        verify_chain(incident_id, &events).map_err(|sequence| {
            warn!(incident_id = %incident_id, sequence, "Hash chain broken");
            EventStoreError::CorruptionDetected {
                incident_id: *incident_id,
                sequence,
            }
        })?;
        Ok(events)
    }

    async fn version(&self, incident_id: &IncidentId) -> Result<u64, EventStoreError> {
        Ok(self
            .stream(incident_id)
            .map(|s| s.read().len() as u64)
            .unwrap_or(0))
    }

    async fn repair_from(
        &self,
        incident_id: &IncidentId,
        replica: &dyn ReplicaSource,
    ) -> Result<u64, EventStoreError> {
        let candidate = replica.fetch(incident_id).await?;

        let stream = Arc::clone(self.streams.entry(*incident_id).or_default().value());
        let mut events = stream.write();
        let local: Vec<Option<IncidentEvent>> = events.iter().cloned().map(Some).collect();
        let merged = merge_replica(incident_id, &local, candidate)?;
        let version = merged.len() as u64;
        *events = merged;

        warn!(incident_id = %incident_id, version, "Stream repaired from replica");
        metrics::counter!("vigil_event_store_repairs_total").increment(1);
        Ok(version)
    }

    async fn incident_ids(&self) -> Result<Vec<IncidentId>, EventStoreError> {
        let mut ids: Vec<IncidentId> = self
            .streams
            .iter()
            .filter(|entry| !entry.value().read().is_empty())
            .map(|entry| *entry.key())
            .collect();
        ids.sort();
        Ok(ids)
    }
}

#[async_trait]
impl ReplicaSource for InMemoryEventStore {
    async fn fetch(&self, incident_id: &IncidentId) -> Result<Vec<IncidentEvent>, EventStoreError> {
        Ok(self.snapshot(incident_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::AgentRole;

    fn checkpoint(level: usize) -> EventKind {
        EventKind::LevelCheckpointed {
            level,
            roles: vec![AgentRole::Detection],
        }
    }

    #[tokio::test]
    async fn test_append_enforces_expected_version() {
        let store = InMemoryEventStore::new();
        let id = IncidentId::new();

        let first = store.append(&id, 0, checkpoint(0)).await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(first.prev_hash, GENESIS_HASH);

        let err = store.append(&id, 0, checkpoint(1)).await.unwrap_err();
        assert_eq!(
            err,
            EventStoreError::VersionConflict {
                incident_id: id,
                expected: 0,
                actual: 1
            }
        );
        assert_eq!(store.version(&id).await.unwrap(), 1);

        let second = store.append(&id, 1, checkpoint(1)).await.unwrap();
        assert_eq!(second.prev_hash, first.hash);
    }

    #[tokio::test]
    async fn test_unknown_incident_reads_empty() {
        let store = InMemoryEventStore::new();
        let id = IncidentId::new();
        assert!(store.read(&id).await.unwrap().is_empty());
        assert_eq!(store.version(&id).await.unwrap(), 0);
        assert!(store.incident_ids().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_tampered_stream_is_detected_and_repaired() {
        let store = InMemoryEventStore::new();
        let replica = InMemoryEventStore::new();
        let id = IncidentId::new();
        for level in 0..3 {
            let event = store.append(&id, level as u64, checkpoint(level)).await.unwrap();
            replica.streams.entry(id).or_default().write().push(event);
        }

        store.tamper(&id, 2, checkpoint(7));
        assert_eq!(
            store.read(&id).await.unwrap_err(),
            EventStoreError::CorruptionDetected {
                incident_id: id,
                sequence: 2
            }
        );

        assert_eq!(store.repair_from(&id, &replica).await.unwrap(), 3);
        assert_eq!(store.read(&id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_repair_keeps_local_events_past_replica() {
        let store = InMemoryEventStore::new();
        let replica = InMemoryEventStore::new();
        let id = IncidentId::new();
        for level in 0..5 {
            let event = store.append(&id, level as u64, checkpoint(level)).await.unwrap();
            if level < 2 {
                replica.import(event).unwrap();
            }
        }

        store.tamper(&id, 2, checkpoint(8));
        assert_eq!(store.repair_from(&id, &replica).await.unwrap(), 5);
        let events = store.read(&id).await.unwrap();
        assert_eq!(events.len(), 5);
        assert_eq!(events[1].kind, checkpoint(1));
    }

    #[tokio::test]
    async fn test_import_is_idempotent_and_ordered() {
        let store = InMemoryEventStore::new();
        let replica = InMemoryEventStore::new();
        let id = IncidentId::new();
        let first = store.append(&id, 0, checkpoint(0)).await.unwrap();
        let second = store.append(&id, 1, checkpoint(1)).await.unwrap();

        assert!(replica.import(second.clone()).is_err());
        replica.import(first.clone()).unwrap();
        replica.import(first).unwrap();
        replica.import(second).unwrap();
        assert_eq!(replica.version(&id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_replica_is_rejected() {
        let store = InMemoryEventStore::new();
        let replica = InMemoryEventStore::new();
        let id = IncidentId::new();
        replica.append(&id, 0, checkpoint(0)).await.unwrap();
        replica.append(&id, 1, checkpoint(1)).await.unwrap();
        replica.tamper(&id, 1, checkpoint(9));

        assert!(matches!(
            store.repair_from(&id, &replica).await,
            Err(EventStoreError::ReplicaRejected { .. })
        ));
    }
}

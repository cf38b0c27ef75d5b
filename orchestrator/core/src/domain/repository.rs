// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Event Store Interfaces
//!
//! The incident stream is the only persisted aggregate. Every derived view is
//! rebuilt by [`crate::domain::incident::Incident::replay`].
//!
//! | Trait | Purpose | Implementations |
//! |-------|---------|----------------|
//! | `EventStore` | Versioned append-only log per incident | `InMemoryEventStore`, `PostgresEventStore` |
//! | `ReplicaSource` | Trusted copy used to repair a corrupted stream | both stores |
//!
//! ## Concurrency
//!
//! Appends carry the version the caller replayed. A mismatch yields
//! [`EventStoreError::VersionConflict`] and writes nothing; the caller rereads
//! and retries. Streams of different incidents never contend.

use async_trait::async_trait;

use crate::domain::events::{verify_chain, EventKind, IncidentEvent};
use crate::domain::incident::IncidentId;

#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append one event if `expected_version` equals the stream length.
    ///
    /// Returns the sealed event; its `sequence` is the new version.
    async fn append(
        &self,
        incident_id: &IncidentId,
        expected_version: u64,
        kind: EventKind,
    ) -> Result<IncidentEvent, EventStoreError>;

    /// Full ordered stream with the hash chain verified. Unknown incidents
    /// yield an empty stream.
    async fn read(&self, incident_id: &IncidentId) -> Result<Vec<IncidentEvent>, EventStoreError>;

    /// Number of events stored for the incident; 0 before the first append.
    async fn version(&self, incident_id: &IncidentId) -> Result<u64, EventStoreError>;

    /// Rebuild a corrupted stream from a verified copy in `replica`.
    ///
    /// Local events past the end of the replica are kept when they still
    /// chain onto it. See [`merge_replica`].
    async fn repair_from(
        &self,
        incident_id: &IncidentId,
        replica: &dyn ReplicaSource,
    ) -> Result<u64, EventStoreError>;

    async fn incident_ids(&self) -> Result<Vec<IncidentId>, EventStoreError>;
}

/// A copy of incident streams trusted for repair.
#[async_trait]
pub trait ReplicaSource: Send + Sync {
    async fn fetch(&self, incident_id: &IncidentId) -> Result<Vec<IncidentEvent>, EventStoreError>;
}

/// Merge a replica stream over a local stream.
///
/// `local` holds the stored events in sequence order, `None` where a row could
/// not be decoded. The replica must verify on its own, agree with the local
/// intact prefix, and together with the local events after its end form one
/// verified chain. Returns the merged stream.
pub fn merge_replica(
    incident_id: &IncidentId,
    local: &[Option<IncidentEvent>],
    candidate: Vec<IncidentEvent>,
) -> Result<Vec<IncidentEvent>, EventStoreError> {
    let rejected = |reason: String| EventStoreError::ReplicaRejected {
        incident_id: *incident_id,
        reason,
    };

    verify_chain(incident_id, &candidate)
        .map_err(|sequence| rejected(format!("replica chain broken at sequence {}", sequence)))?;

    let decoded: Vec<IncidentEvent> = local.iter().map_while(|slot| slot.clone()).collect();
    let intact = match verify_chain(incident_id, &decoded) {
        Ok(()) => decoded.len(),
        Err(sequence) => sequence as usize - 1,
    };
    if let Some(diverged) = candidate
        .iter()
        .zip(&decoded[..intact])
        .find(|(theirs, ours)| theirs.hash != ours.hash)
    {
        return Err(rejected(format!(
            "replica diverges from local history at sequence {}",
            diverged.0.sequence
        )));
    }

    let covered = candidate.len();
    let mut merged = candidate;
    for (index, slot) in local.iter().enumerate().skip(covered) {
        match slot {
            Some(event) => merged.push(event.clone()),
            None => {
                return Err(rejected(format!(
                    "replica has {} events and local event {} is unreadable",
                    covered,
                    index + 1
                )))
            }
        }
    }
    verify_chain(incident_id, &merged).map_err(|sequence| {
        rejected(format!(
            "replica has {} events and does not cover broken sequence {}",
            covered, sequence
        ))
    })?;
    Ok(merged)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EventStoreError {
    #[error("Version conflict on {incident_id}: expected {expected}, actual {actual}")]
    VersionConflict {
        incident_id: IncidentId,
        expected: u64,
        actual: u64,
    },

    #[error("Hash chain broken for {incident_id} at sequence {sequence}")]
    CorruptionDetected { incident_id: IncidentId, sequence: u64 },

    #[error("Replica rejected for {incident_id}: {reason}")]
    ReplicaRejected { incident_id: IncidentId, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<serde_json::Error> for EventStoreError {
    fn from(err: serde_json::Error) -> Self {
        EventStoreError::Serialization(err.to_string())
    }
}

impl From<sqlx::Error> for EventStoreError {
    fn from(err: sqlx::Error) -> Self {
        EventStoreError::Database(err.to_string())
    }
}

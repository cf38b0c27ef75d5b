// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! PostgreSQL implementation of [`EventStore`].
//!
//! The primary key `(incident_id, sequence)` is the optimistic concurrency
//! guard: two appends racing on the same version both try to insert the same
//! sequence and the loser's unique violation is reported as
//! [`EventStoreError::VersionConflict`]. Payloads are stored as the exact JSON
//! text that was hashed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::events::{verify_chain, EventKind, IncidentEvent, GENESIS_HASH};
use crate::domain::incident::IncidentId;
use crate::domain::repository::{merge_replica, EventStore, EventStoreError, PostgresConfig, ReplicaSource};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS incident_events (
    incident_id UUID NOT NULL,
    sequence BIGINT NOT NULL,
    event_type TEXT NOT NULL,
    payload TEXT NOT NULL,
    recorded_at TIMESTAMPTZ NOT NULL,
    prev_hash TEXT NOT NULL,
    hash TEXT NOT NULL,
    PRIMARY KEY (incident_id, sequence)
)
"#;

#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &PostgresConfig) -> Result<Self, EventStoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.connection_string)
            .await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        info!("Connected PostgreSQL event store");
        Ok(store)
    }

    pub async fn ensure_schema(&self) -> Result<(), EventStoreError> {
        sqlx::query(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Decode one row. A row whose columns load but whose payload no longer
    /// parses yields `None`; the stream is damaged at that sequence.
    fn deserialize_row(row: &sqlx::postgres::PgRow) -> Result<Option<IncidentEvent>, EventStoreError> {
        let incident_id = IncidentId(
            row.try_get::<Uuid, _>("incident_id")
                .map_err(|e| EventStoreError::Database(format!("Missing incident_id: {}", e)))?,
        );
        let sequence: i64 = row
            .try_get("sequence")
            .map_err(|e| EventStoreError::Database(format!("Missing sequence: {}", e)))?;
        let payload: String = row
            .try_get("payload")
            .map_err(|e| EventStoreError::Database(format!("Missing payload: {}", e)))?;
        let recorded_at: DateTime<Utc> = row
            .try_get("recorded_at")
            .map_err(|e| EventStoreError::Database(format!("Missing recorded_at: {}", e)))?;
        let prev_hash: String = row
            .try_get("prev_hash")
            .map_err(|e| EventStoreError::Database(format!("Missing prev_hash: {}", e)))?;
        let hash: String = row
            .try_get("hash")
            .map_err(|e| EventStoreError::Database(format!("Missing hash: {}", e)))?;

        match decode_event(incident_id, sequence as u64, &payload, recorded_at, prev_hash, hash) {
            Ok(event) => Ok(Some(event)),
            Err(EventStoreError::CorruptionDetected { sequence, .. }) => {
                warn!(incident_id = %incident_id, sequence, "Stored payload does not decode");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_rows(&self, incident_id: &IncidentId) -> Result<Vec<Option<IncidentEvent>>, EventStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT incident_id, sequence, payload, recorded_at, prev_hash, hash
            FROM incident_events
            WHERE incident_id = $1
            ORDER BY sequence ASC
            "#,
        )
        .bind(incident_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::deserialize_row).collect()
    }

    async fn head(&self, incident_id: &IncidentId) -> Result<(u64, String), EventStoreError> {
        let row = sqlx::query(
            r#"
            SELECT sequence, hash FROM incident_events
            WHERE incident_id = $1
            ORDER BY sequence DESC
            LIMIT 1
            "#,
        )
        .bind(incident_id.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let sequence: i64 = row.try_get("sequence")?;
                let hash: String = row.try_get("hash")?;
                Ok((sequence as u64, hash))
            }
            None => Ok((0, GENESIS_HASH.to_string())),
        }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn append(
        &self,
        incident_id: &IncidentId,
        expected_version: u64,
        kind: EventKind,
    ) -> Result<IncidentEvent, EventStoreError> {
        let (actual, prev_hash) = self.head(incident_id).await?;
        if actual != expected_version {
            metrics::counter!("vigil_event_store_conflicts_total").increment(1);
            return Err(EventStoreError::VersionConflict {
                incident_id: *incident_id,
                expected: expected_version,
                actual,
            });
        }

        let event = IncidentEvent::seal(*incident_id, actual + 1, kind, &prev_hash);
        let payload = serde_json::to_string(&event.kind)?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO incident_events (incident_id, sequence, event_type, payload, recorded_at, prev_hash, hash)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(incident_id.0)
        .bind(event.sequence as i64)
        .bind(event.kind.event_type())
        .bind(payload)
        .bind(event.recorded_at)
        .bind(&event.prev_hash)
        .bind(&event.hash)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => {
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
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                metrics::counter!("vigil_event_store_conflicts_total").increment(1);
                Err(EventStoreError::VersionConflict {
                    incident_id: *incident_id,
                    expected: expected_version,
                    actual: expected_version + 1,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, incident_id: &IncidentId) -> Result<Vec<IncidentEvent>, EventStoreError> {
        let events = verified_stream(incident_id, self.fetch_rows(incident_id).await?).map_err(|e| {
            warn!(incident_id = %incident_id, error = %e, "Hash chain broken");
            e
        })?;
        Ok(events)
    }

    async fn version(&self, incident_id: &IncidentId) -> Result<u64, EventStoreError> {
        Ok(self.head(incident_id).await?.0)
    }

    async fn repair_from(
        &self,
        incident_id: &IncidentId,
        replica: &dyn ReplicaSource,
    ) -> Result<u64, EventStoreError> {
        let candidate = replica.fetch(incident_id).await?;
        let local = self.fetch_rows(incident_id).await?;
        let merged = merge_replica(incident_id, &local, candidate)?;

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM incident_events WHERE incident_id = $1")
            .bind(incident_id.0)
            .execute(&mut *tx)
            .await?;
        for event in &merged {
            sqlx::query(
                r#"
                INSERT INTO incident_events (incident_id, sequence, event_type, payload, recorded_at, prev_hash, hash)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(incident_id.0)
            .bind(event.sequence as i64)
            .bind(event.kind.event_type())
            .bind(serde_json::to_string(&event.kind)?)
            .bind(event.recorded_at)
            .bind(&event.prev_hash)
            .bind(&event.hash)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        let version = merged.len() as u64;
        warn!(incident_id = %incident_id, version, "Stream repaired from replica");
        metrics::counter!("vigil_event_store_repairs_total").increment(1);
        Ok(version)
    }

    async fn incident_ids(&self) -> Result<Vec<IncidentId>, EventStoreError> {
        let rows = sqlx::query("SELECT DISTINCT incident_id FROM incident_events ORDER BY incident_id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| Ok(IncidentId(row.try_get::<Uuid, _>("incident_id")?)))
            .collect()
    }
}

#[async_trait]
impl ReplicaSource for PostgresEventStore {
    async fn fetch(&self, incident_id: &IncidentId) -> Result<Vec<IncidentEvent>, EventStoreError> {
        verified_stream(incident_id, self.fetch_rows(incident_id).await?)
    }
}

/// Build an event from stored columns. A payload that is not a valid
/// [`EventKind`] is corruption at that sequence, not a decoding error.
fn decode_event(
    incident_id: IncidentId,
    sequence: u64,
    payload: &str,
    recorded_at: DateTime<Utc>,
    prev_hash: String,
    hash: String,
) -> Result<IncidentEvent, EventStoreError> {
    let kind: EventKind =
        serde_json::from_str(payload).map_err(|_| EventStoreError::CorruptionDetected { incident_id, sequence })?;
    Ok(IncidentEvent {
        incident_id,
        sequence,
        kind,
        recorded_at,
        prev_hash,
        hash,
    })
}

/// Verify decoded rows as one stream. The first undecodable row or broken
/// link, whichever comes first, is reported.
fn verified_stream(
    incident_id: &IncidentId,
    rows: Vec<Option<IncidentEvent>>,
) -> Result<Vec<IncidentEvent>, EventStoreError> {
    let total = rows.len();
    let events: Vec<IncidentEvent> = rows.into_iter().map_while(|row| row).collect();
    let corrupted = |sequence: u64| EventStoreError::CorruptionDetected {
        incident_id: *incident_id,
        sequence,
    };
    verify_chain(incident_id, &events).map_err(&corrupted)?;
    if events.len() < total {
        return Err(corrupted(events.len() as u64 + 1));
    }
    Ok(events)
}

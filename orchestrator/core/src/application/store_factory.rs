// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Store Factory - Application Layer
//!
//! Creates the concrete event store for the configured storage backend, keeping
//! the domain layer free of infrastructure dependencies.

use std::sync::Arc;
use tracing::info;

use crate::domain::repository::{EventStore, EventStoreError, StorageBackend};
use crate::infrastructure::event_store::InMemoryEventStore;
use crate::infrastructure::postgres_event_store::PostgresEventStore;

/// Creates an EventStore implementation based on the configured backend
pub async fn create_event_store(backend: &StorageBackend) -> Result<Arc<dyn EventStore>, EventStoreError> {
    match backend {
        StorageBackend::InMemory => {
            info!("Using in-memory event store; incidents are lost on restart");
            Ok(Arc::new(InMemoryEventStore::new()))
        }
        StorageBackend::PostgreSQL(config) => Ok(Arc::new(PostgresEventStore::connect(config).await?)),
    }
}

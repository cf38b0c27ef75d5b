// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod broadcast_hub;
pub mod circuit_breaker;
pub mod dependency_guard;
pub mod event_store;
pub mod knowledge_base;
pub mod llm;
pub mod notification;
pub mod postgres_event_store;
pub mod rate_limiter;

pub use broadcast_hub::BroadcastHub;
pub use dependency_guard::{DependencyGuard, GuardRegistry};
pub use event_store::InMemoryEventStore;
pub use knowledge_base::InMemoryKnowledgeBase;
pub use postgres_event_store::PostgresEventStore;

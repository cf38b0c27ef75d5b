// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Dependency Guards
//!
//! Every outbound call (inference, knowledge base, notification) goes through
//! exactly one [`DependencyGuard`], keyed by [`DependencyId`]:
//!
//! ```text
//! priority limiter -> circuit breaker -> tokio::time::timeout -> dependency
//! ```
//!
//! Timeouts, transient and malformed failures count against the breaker.
//! Rejections by the limiter or an open breaker never reach the dependency.
//! There are no retries here; a failed call is reported once.

use dashmap::DashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::domain::dependency::{CallPriority, DependencyError, DependencyId, GuardConfig};
use crate::domain::node_config::DependenciesConfig;
use crate::infrastructure::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use crate::infrastructure::rate_limiter::PriorityRateLimiter;

pub struct DependencyGuard {
    id: DependencyId,
    breaker: CircuitBreaker,
    limiter: PriorityRateLimiter,
    call_timeout: Duration,
}

impl DependencyGuard {
    pub fn new(id: DependencyId, config: &GuardConfig) -> Self {
        Self {
            breaker: CircuitBreaker::new(id.clone(), config.breaker.clone()),
            limiter: PriorityRateLimiter::new(id.clone(), &config.rate_limit),
            call_timeout: config.breaker.call_timeout,
            id,
        }
    }

    pub fn from_parts(id: DependencyId, breaker: CircuitBreaker, limiter: PriorityRateLimiter) -> Self {
        let call_timeout = breaker.config().call_timeout;
        Self {
            id,
            breaker,
            limiter,
            call_timeout,
        }
    }

    pub fn id(&self) -> &DependencyId {
        &self.id
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Invoke `op` under the limiter, the breaker and the per-call timeout.
    pub async fn call<T, E, F, Fut>(&self, priority: CallPriority, op: F) -> Result<T, DependencyError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<DependencyError>,
    {
        self.limiter.try_acquire(priority)?;
        let permit = self.breaker.try_acquire()?;

        let started = Instant::now();
        let result = tokio::time::timeout(self.call_timeout, op()).await;
        let elapsed = started.elapsed();
        metrics::histogram!("vigil_dependency_call_seconds", "dependency" => self.id.to_string())
            .record(elapsed.as_secs_f64());

        match result {
            Ok(Ok(value)) => {
                permit.success(elapsed);
                Ok(value)
            }
            Ok(Err(err)) => {
                let err: DependencyError = err.into();
                if err.counts_as_failure() {
                    permit.failure();
                } else {
                    permit.release();
                }
                debug!(dependency = %self.id, error = %err, "Dependency call failed");
                metrics::counter!("vigil_dependency_failures_total", "dependency" => self.id.to_string())
                    .increment(1);
                Err(err)
            }
            Err(_) => {
                permit.failure();
                debug!(dependency = %self.id, timeout_ms = self.call_timeout.as_millis() as u64, "Dependency call timed out");
                metrics::counter!("vigil_dependency_timeouts_total", "dependency" => self.id.to_string())
                    .increment(1);
                Err(DependencyError::Timeout {
                    dependency: self.id.clone(),
                    after_ms: self.call_timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// Hands out one guard per dependency identity, created lazily from config.
pub struct GuardRegistry {
    config: DependenciesConfig,
    guards: DashMap<DependencyId, Arc<DependencyGuard>>,
}

impl GuardRegistry {
    pub fn new(config: DependenciesConfig) -> Self {
        Self {
            config,
            guards: DashMap::new(),
        }
    }

    pub fn guard(&self, id: &DependencyId) -> Arc<DependencyGuard> {
        if let Some(guard) = self.guards.get(id) {
            return Arc::clone(guard.value());
        }
        let guard = self
            .guards
            .entry(id.clone())
            .or_insert_with(|| Arc::new(DependencyGuard::new(id.clone(), &self.config.for_dependency(id))));
        Arc::clone(guard.value())
    }

    /// Register a pre-built guard, replacing any existing one.
    pub fn insert(&self, guard: DependencyGuard) -> Arc<DependencyGuard> {
        let guard = Arc::new(guard);
        self.guards.insert(guard.id().clone(), Arc::clone(&guard));
        guard
    }

    pub fn snapshot(&self, id: &DependencyId) -> Option<BreakerSnapshot> {
        self.guards.get(id).map(|g| g.breaker().snapshot())
    }

    pub fn reset(&self, id: &DependencyId) {
        if let Some(guard) = self.guards.get(id) {
            info!(dependency = %id, "Resetting circuit breaker");
            guard.breaker().reset();
        }
    }

    pub fn ids(&self) -> Vec<DependencyId> {
        let mut ids: Vec<DependencyId> = self.guards.iter().map(|g| g.key().clone()).collect();
        ids.sort();
        ids
    }
}

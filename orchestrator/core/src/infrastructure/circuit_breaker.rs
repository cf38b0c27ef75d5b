// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Circuit breaker for one external dependency.
//!
//! State lives in a single atomic word. Every transition is a compare-and-swap,
//! so exactly one caller wins it and performs the side effects (counter resets,
//! logs, metrics). Reads are plain atomic loads.
//!
//! OPEN moves to HALF_OPEN through a private `TRANSITIONING` value: the CAS
//! winner resets the trial counters while every other caller is still being
//! rejected, then publishes HALF_OPEN. Only then can trials be admitted.
//!
//! Time is read from `tokio::time::Instant`, so a paused test runtime drives
//! the cooldown deterministically.

use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::domain::dependency::{BreakerConfig, CircuitState, DependencyError, DependencyId};

const CLOSED: u8 = 0;
const OPEN: u8 = 1;
const HALF_OPEN: u8 = 2;
const TRANSITIONING: u8 = 3;

const NO_LATENCY: u64 = u64::MAX;

/// Point-in-time view used for agent health reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub last_latency_ms: Option<u64>,
}

pub struct CircuitBreaker {
    dependency: DependencyId,
    config: BreakerConfig,
    epoch: Instant,
    state: AtomicU8,
    consecutive_failures: AtomicU32,
    trials_admitted: AtomicU32,
    trial_successes: AtomicU32,
    opened_at_ms: AtomicU64,
    last_latency_ms: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(dependency: DependencyId, config: BreakerConfig) -> Self {
        Self {
            dependency,
            config,
            epoch: Instant::now(),
            state: AtomicU8::new(CLOSED),
            consecutive_failures: AtomicU32::new(0),
            trials_admitted: AtomicU32::new(0),
            trial_successes: AtomicU32::new(0),
            opened_at_ms: AtomicU64::new(0),
            last_latency_ms: AtomicU64::new(NO_LATENCY),
        }
    }

    pub fn dependency(&self) -> &DependencyId {
        &self.dependency
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    pub fn state(&self) -> CircuitState {
        match self.state.load(Ordering::Acquire) {
            CLOSED => CircuitState::Closed,
            HALF_OPEN => CircuitState::HalfOpen,
            _ => CircuitState::Open,
        }
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let latency = self.last_latency_ms.load(Ordering::Relaxed);
        BreakerSnapshot {
            state: self.state(),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            last_latency_ms: (latency != NO_LATENCY).then_some(latency),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    /// Ask to invoke the dependency. Rejections never touch the dependency.
    pub fn try_acquire(&self) -> Result<BreakerPermit<'_>, DependencyError> {
        loop {
            match self.state.load(Ordering::Acquire) {
                CLOSED => return Ok(BreakerPermit::new(self, false)),
                OPEN => {
                    let opened_at = self.opened_at_ms.load(Ordering::Acquire);
                    let cooldown = self.config.cooldown.as_millis() as u64;
                    if self.now_ms().saturating_sub(opened_at) < cooldown {
                        return Err(self.rejection());
                    }
                    if self
                        .state
                        .compare_exchange(OPEN, TRANSITIONING, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                    {
                        self.trials_admitted.store(0, Ordering::Release);
                        self.trial_successes.store(0, Ordering::Release);
                        self.state.store(HALF_OPEN, Ordering::Release);
                        self.on_transition(CircuitState::HalfOpen);
                    }
                }
                HALF_OPEN => {
                    let admitted = self.trials_admitted.fetch_add(1, Ordering::AcqRel) + 1;
                    if admitted <= self.config.half_open_trials {
                        return Ok(BreakerPermit::new(self, true));
                    }
                    return Err(self.rejection());
                }
                _ => return Err(self.rejection()),
            }
        }
    }

    fn rejection(&self) -> DependencyError {
        metrics::counter!("vigil_breaker_rejections_total", "dependency" => self.dependency.to_string())
            .increment(1);
        DependencyError::CircuitOpen {
            dependency: self.dependency.clone(),
        }
    }

    fn on_success(&self, trial: bool, latency: Duration) {
        self.last_latency_ms
            .store(latency.as_millis() as u64, Ordering::Relaxed);
        match self.state.load(Ordering::Acquire) {
            CLOSED => self.consecutive_failures.store(0, Ordering::Release),
            HALF_OPEN if trial => {
                let successes = self.trial_successes.fetch_add(1, Ordering::AcqRel) + 1;
                if successes >= self.config.half_open_trials
                    && self
                        .state
                        .compare_exchange(HALF_OPEN, CLOSED, Ordering::AcqRel, Ordering::Acquire)
                        .is_ok()
                {
                    self.consecutive_failures.store(0, Ordering::Release);
                    self.on_transition(CircuitState::Closed);
                }
            }
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        match self.state.load(Ordering::Acquire) {
            CLOSED => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                if failures >= self.config.failure_threshold {
                    self.open_from(CLOSED);
                }
            }
            HALF_OPEN if trial => {
                self.consecutive_failures.fetch_add(1, Ordering::AcqRel);
                self.open_from(HALF_OPEN);
            }
            _ => {}
        }
    }

    fn open_from(&self, from: u8) {
        self.opened_at_ms.store(self.now_ms(), Ordering::Release);
        if self
            .state
            .compare_exchange(from, OPEN, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.on_transition(CircuitState::Open);
        }
    }

    fn on_transition(&self, to: CircuitState) {
        match to {
            CircuitState::Open => warn!(
                dependency = %self.dependency,
                failures = self.consecutive_failures.load(Ordering::Relaxed),
                cooldown_ms = self.config.cooldown.as_millis() as u64,
                "Circuit opened"
            ),
            _ => info!(dependency = %self.dependency, state = to.as_str(), "Circuit state changed"),
        }
        metrics::counter!(
            "vigil_breaker_transitions_total",
            "dependency" => self.dependency.to_string(),
            "to" => to.as_str()
        )
        .increment(1);
        metrics::gauge!("vigil_breaker_state", "dependency" => self.dependency.to_string())
            .set(match to {
                CircuitState::Closed => 0.0,
                CircuitState::HalfOpen => 1.0,
                CircuitState::Open => 2.0,
            });
    }

    /// Force CLOSED and clear counters. Operator use only.
    pub fn reset(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.trials_admitted.store(0, Ordering::Release);
        self.trial_successes.store(0, Ordering::Release);
        let previous = self.state.swap(CLOSED, Ordering::AcqRel);
        if previous != CLOSED {
            self.on_transition(CircuitState::Closed);
        }
    }
}

/// Admission to one dependency call.
///
/// Must be resolved with [`success`](Self::success) or
/// [`failure`](Self::failure). A trial permit dropped unresolved counts as a
/// failure so an abandoned call cannot pin the breaker in HALF_OPEN.
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    resolved: bool,
}

impl<'a> BreakerPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            resolved: false,
        }
    }

    pub fn is_trial(&self) -> bool {
        self.trial
    }

    pub fn success(mut self, latency: Duration) {
        self.resolved = true;
        self.breaker.on_success(self.trial, latency);
    }

    pub fn failure(mut self) {
        self.resolved = true;
        self.breaker.on_failure(self.trial);
    }

    /// Give back a permit whose call neither succeeded nor failed.
    pub fn release(mut self) {
        self.resolved = true;
        if self.trial && self.breaker.state.load(Ordering::Acquire) == HALF_OPEN {
            self.breaker.trials_admitted.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if !self.resolved && self.trial {
            self.breaker.on_failure(true);
        }
    }
}

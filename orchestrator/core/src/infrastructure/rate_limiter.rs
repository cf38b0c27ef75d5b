// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Priority-aware token bucket in front of each circuit breaker.
//!
//! One GCRA bucket per dependency carries every call. NORMAL and LOW traffic
//! must additionally pass a class gate sized to a share of that bucket, so
//! when capacity is scarce the remainder is always available to HIGH
//! (sev1/sev2) traffic. Acquisition never waits; a denied call fails fast
//! with `RateLimited`. A gate token taken for a call the shared bucket then
//! refuses is credited back to the gate.

use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::debug;

use crate::domain::dependency::{CallPriority, DependencyError, DependencyId, RateLimitConfig};

pub struct PriorityRateLimiter {
    dependency: DependencyId,
    shared: DefaultDirectRateLimiter,
    normal_gate: ClassGate,
    low_gate: ClassGate,
}

/// Admission gate of one priority class.
struct ClassGate {
    limiter: DefaultDirectRateLimiter,
    credit: AtomicU32,
}

impl ClassGate {
    fn new(quota: Quota) -> Self {
        Self {
            limiter: RateLimiter::direct(quota),
            credit: AtomicU32::new(0),
        }
    }

    fn try_pass(&self) -> bool {
        self.credit
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .is_ok()
            || self.limiter.check().is_ok()
    }

    fn refund(&self) {
        self.credit.fetch_add(1, Ordering::AcqRel);
    }
}

fn nonzero(value: f64) -> NonZeroU32 {
    NonZeroU32::new(value.floor().max(1.0) as u32).unwrap_or(NonZeroU32::MIN)
}

fn scaled_quota(config: &RateLimitConfig, share: f64) -> Quota {
    Quota::per_second(nonzero(config.requests_per_second as f64 * share))
        .allow_burst(nonzero(config.burst as f64 * share))
}

impl PriorityRateLimiter {
    pub fn new(dependency: DependencyId, config: &RateLimitConfig) -> Self {
        Self::with_quotas(
            dependency,
            scaled_quota(config, 1.0),
            scaled_quota(config, config.normal_share),
            scaled_quota(config, config.low_share),
        )
    }

    pub fn with_quotas(dependency: DependencyId, shared: Quota, normal: Quota, low: Quota) -> Self {
        Self {
            dependency,
            shared: RateLimiter::direct(shared),
            normal_gate: ClassGate::new(normal),
            low_gate: ClassGate::new(low),
        }
    }

    pub fn try_acquire(&self, priority: CallPriority) -> Result<(), DependencyError> {
        let gate = match priority {
            CallPriority::High => None,
            CallPriority::Normal => Some(&self.normal_gate),
            CallPriority::Low => Some(&self.low_gate),
        };
        if gate.map_or(true, ClassGate::try_pass) {
            if self.shared.check().is_ok() {
                return Ok(());
            }
            if let Some(gate) = gate {
                gate.refund();
            }
        }

        debug!(dependency = %self.dependency, priority = priority.as_str(), "Rate limited");
        metrics::counter!(
            "vigil_rate_limited_total",
            "dependency" => self.dependency.to_string(),
            "priority" => priority.as_str()
        )
        .increment(1);
        Err(DependencyError::RateLimited {
            dependency: self.dependency.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hourly(burst: u32) -> Quota {
        Quota::per_hour(NonZeroU32::new(burst).unwrap()).allow_burst(NonZeroU32::new(burst).unwrap())
    }

    fn limiter() -> PriorityRateLimiter {
        PriorityRateLimiter::with_quotas(DependencyId::knowledge_base(), hourly(4), hourly(3), hourly(2))
    }

    #[test]
    fn test_low_priority_leaves_capacity_for_high() {
        let limiter = limiter();
        assert!(limiter.try_acquire(CallPriority::Low).is_ok());
        assert!(limiter.try_acquire(CallPriority::Low).is_ok());
        assert!(matches!(
            limiter.try_acquire(CallPriority::Low),
            Err(DependencyError::RateLimited { .. })
        ));

        assert!(limiter.try_acquire(CallPriority::High).is_ok());
        assert!(limiter.try_acquire(CallPriority::High).is_ok());
        assert!(limiter.try_acquire(CallPriority::High).is_err());
    }

    #[test]
    fn test_high_priority_can_drain_the_bucket() {
        let limiter = limiter();
        for _ in 0..4 {
            assert!(limiter.try_acquire(CallPriority::High).is_ok());
        }
        assert!(limiter.try_acquire(CallPriority::Normal).is_err());
        assert!(limiter.try_acquire(CallPriority::Low).is_err());
    }

    #[test]
    fn test_refused_low_priority_keeps_its_gate_tokens() {
        let limiter =
            PriorityRateLimiter::with_quotas(DependencyId::knowledge_base(), hourly(2), hourly(2), hourly(2));
        assert!(limiter.try_acquire(CallPriority::High).is_ok());
        assert!(limiter.try_acquire(CallPriority::High).is_ok());
        for _ in 0..5 {
            assert!(limiter.try_acquire(CallPriority::Low).is_err());
        }

        assert!(limiter.low_gate.try_pass());
        assert!(limiter.low_gate.try_pass());
        assert!(!limiter.low_gate.try_pass());
    }

    #[test]
    fn test_config_shares_scale_gates() {
        let limiter = PriorityRateLimiter::new(
            DependencyId::knowledge_base(),
            &RateLimitConfig {
                requests_per_second: 1,
                burst: 4,
                normal_share: 0.75,
                low_share: 0.5,
            },
        );
        let normal_admitted = (0..4)
            .filter(|_| limiter.try_acquire(CallPriority::Normal).is_ok())
            .count();
        assert_eq!(normal_admitted, 3);
        assert!(limiter.try_acquire(CallPriority::High).is_ok());
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Fault taxonomy.
//!
//! Every error the swarm can observe falls into one of six classes. The class
//! decides the reaction and doubles as the `fault` label on metrics.
//!
//! | Class | Reaction |
//! |-------|----------|
//! | `TransientDependency` | breaker failure count, degraded outcome |
//! | `VersionConflict` | reread and retry the append |
//! | `AgentTimeout` | coordinator fallback |
//! | `ConsensusQuorum` | escalate to human review |
//! | `CorruptionDetected` | repair stream from replica |
//! | `MalformedRecommendation` | quarantine the role |

use serde::{Deserialize, Serialize};

use crate::domain::agent::ReasonCode;
use crate::domain::consensus::{EscalationReason, QuarantineReason};
use crate::domain::dependency::DependencyError;
use crate::domain::repository::EventStoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultKind {
    TransientDependency,
    VersionConflict,
    AgentTimeout,
    ConsensusQuorum,
    CorruptionDetected,
    MalformedRecommendation,
}

impl FaultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultKind::TransientDependency => "transient_dependency",
            FaultKind::VersionConflict => "version_conflict",
            FaultKind::AgentTimeout => "agent_timeout",
            FaultKind::ConsensusQuorum => "consensus_quorum",
            FaultKind::CorruptionDetected => "corruption_detected",
            FaultKind::MalformedRecommendation => "malformed_recommendation",
        }
    }

    /// Whether the failing operation may simply be attempted again.
    pub fn is_retriable(&self) -> bool {
        matches!(self, FaultKind::TransientDependency | FaultKind::VersionConflict)
    }
}

impl From<&DependencyError> for FaultKind {
    fn from(err: &DependencyError) -> Self {
        match err {
            DependencyError::Timeout { .. } => FaultKind::AgentTimeout,
            DependencyError::Malformed(_) => FaultKind::MalformedRecommendation,
            _ => FaultKind::TransientDependency,
        }
    }
}

impl From<&EventStoreError> for FaultKind {
    fn from(err: &EventStoreError) -> Self {
        match err {
            EventStoreError::VersionConflict { .. } => FaultKind::VersionConflict,
            EventStoreError::CorruptionDetected { .. } | EventStoreError::ReplicaRejected { .. } => {
                FaultKind::CorruptionDetected
            }
            EventStoreError::Serialization(_) | EventStoreError::Database(_) => {
                FaultKind::TransientDependency
            }
        }
    }
}

impl From<ReasonCode> for FaultKind {
    fn from(reason: ReasonCode) -> Self {
        match reason {
            ReasonCode::Timeout | ReasonCode::DeadlineExceeded | ReasonCode::Cancelled => {
                FaultKind::AgentTimeout
            }
            ReasonCode::MalformedPayload => FaultKind::MalformedRecommendation,
            ReasonCode::CircuitOpen
            | ReasonCode::RateLimited
            | ReasonCode::DependencyFailure
            | ReasonCode::NoRecommendation => FaultKind::TransientDependency,
        }
    }
}

impl From<&QuarantineReason> for FaultKind {
    fn from(_: &QuarantineReason) -> Self {
        FaultKind::MalformedRecommendation
    }
}

impl From<&EscalationReason> for FaultKind {
    fn from(reason: &EscalationReason) -> Self {
        match reason {
            EscalationReason::AgentsExhausted { .. } | EscalationReason::OperatorAbort { .. } => {
                FaultKind::AgentTimeout
            }
            _ => FaultKind::ConsensusQuorum,
        }
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::agent::{AgentRecommendation, AgentRole, DegradedRecommendation};
use crate::domain::consensus::{ConsensusDecision, ConsensusRound, EscalationReason, QuarantineReason};
use crate::domain::incident::{IncidentId, IncidentReport, IncidentState, StatusBadge};

/// `prev_hash` of the first event of every stream.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Everything that can happen to an incident.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventKind {
    IncidentOpened {
        report: IncidentReport,
        operator: String,
    },
    IncidentStateChanged {
        from: IncidentState,
        to: IncidentState,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<EscalationReason>,
        /// Every sequence recorded before an escalation, for human review.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        history: Vec<u64>,
    },
    AgentRecommended {
        recommendation: AgentRecommendation,
    },
    AgentDegraded {
        degraded: DegradedRecommendation,
    },
    AgentQuarantined {
        role: AgentRole,
        round: ConsensusRound,
        reason: QuarantineReason,
    },
    ConsensusReached {
        decision: ConsensusDecision,
    },
    ConsensusFailed {
        decision: ConsensusDecision,
    },
    LevelCheckpointed {
        level: usize,
        roles: Vec<AgentRole>,
    },
    AgentsReset {
        operator: String,
        roles: Vec<AgentRole>,
    },
}

impl EventKind {
    pub fn event_type(&self) -> &'static str {
        match self {
            EventKind::IncidentOpened { .. } => "IncidentOpened",
            EventKind::IncidentStateChanged { .. } => "IncidentStateChanged",
            EventKind::AgentRecommended { .. } => "AgentRecommended",
            EventKind::AgentDegraded { .. } => "AgentDegraded",
            EventKind::AgentQuarantined { .. } => "AgentQuarantined",
            EventKind::ConsensusReached { .. } => "ConsensusReached",
            EventKind::ConsensusFailed { .. } => "ConsensusFailed",
            EventKind::LevelCheckpointed { .. } => "LevelCheckpointed",
            EventKind::AgentsReset { .. } => "AgentsReset",
        }
    }

    /// Progress pings are low priority; anything that changes what an
    /// operator should do is high.
    pub fn priority(&self) -> NotificationPriority {
        match self {
            EventKind::AgentRecommended { .. }
            | EventKind::AgentDegraded { .. }
            | EventKind::LevelCheckpointed { .. } => NotificationPriority::Low,
            _ => NotificationPriority::High,
        }
    }

    pub fn badge(&self) -> Option<StatusBadge> {
        match self {
            EventKind::IncidentStateChanged {
                to: IncidentState::Escalated,
                ..
            }
            | EventKind::ConsensusFailed { .. } => Some(StatusBadge::Escalated),
            EventKind::AgentDegraded { .. } | EventKind::AgentQuarantined { .. } => {
                Some(StatusBadge::Degraded)
            }
            _ => None,
        }
    }
}

/// One immutable, hash-chained record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentEvent {
    pub incident_id: IncidentId,
    pub sequence: u64,
    pub kind: EventKind,
    pub recorded_at: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
}

impl IncidentEvent {
    pub fn seal(incident_id: IncidentId, sequence: u64, kind: EventKind, prev_hash: &str) -> Self {
        let hash = compute_hash(prev_hash, &incident_id, sequence, &kind);
        Self {
            incident_id,
            sequence,
            kind,
            recorded_at: Utc::now(),
            prev_hash: prev_hash.to_string(),
            hash,
        }
    }

    /// Recompute the hash from content. `recorded_at` is not covered.
    pub fn content_hash(&self) -> String {
        compute_hash(&self.prev_hash, &self.incident_id, self.sequence, &self.kind)
    }

    pub fn is_intact(&self) -> bool {
        self.content_hash() == self.hash
    }
}

pub fn compute_hash(prev_hash: &str, incident_id: &IncidentId, sequence: u64, kind: &EventKind) -> String {
    let payload = serde_json::to_vec(kind).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(b"|");
    hasher.update(incident_id.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(sequence.to_string().as_bytes());
    hasher.update(b"|");
    hasher.update(&payload);
    hex::encode(hasher.finalize())
}

/// Verify sequence continuity and the hash chain of a full stream.
///
/// Returns the sequence of the first broken link.
pub fn verify_chain(incident_id: &IncidentId, events: &[IncidentEvent]) -> Result<(), u64> {
    let mut prev = GENESIS_HASH;
    for (index, event) in events.iter().enumerate() {
        let expected_sequence = index as u64 + 1;
        if event.sequence != expected_sequence
            || event.incident_id != *incident_id
            || event.prev_hash != prev
            || !event.is_intact()
        {
            return Err(expected_sequence);
        }
        prev = event.hash.as_str();
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    #[default]
    Low,
    High,
}

/// Wire shape delivered to live observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    pub incident_id: IncidentId,
    pub sequence: u64,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub badge: Option<StatusBadge>,
    #[serde(skip)]
    pub priority: NotificationPriority,
}

impl EventEnvelope {
    pub fn from_event(event: &IncidentEvent) -> Self {
        let mut payload = serde_json::to_value(&event.kind)
            .ok()
            .and_then(|mut v| v.get_mut("data").map(serde_json::Value::take))
            .unwrap_or(serde_json::Value::Null);
        // Degraded detail may carry dependency error text.
        if let Some(degraded) = payload.get_mut("degraded").and_then(|d| d.as_object_mut()) {
            degraded.remove("detail");
        }
        Self {
            event_type: event.kind.event_type().to_string(),
            incident_id: event.incident_id,
            sequence: event.sequence,
            payload,
            timestamp: event.recorded_at,
            badge: event.kind.badge(),
            priority: event.kind.priority(),
        }
    }

    pub fn is_high_priority(&self) -> bool {
        self.priority == NotificationPriority::High
    }
}

/// Sink notified after every successful append.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, envelope: EventEnvelope);
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Outbound stakeholder notification channels (chat, pager, email).
//!
//! Delivery is at-least-once. Each channel sits behind its own guard and a
//! dedup window keyed by [`Notification::dedup_key`], so retries of the same
//! alert are absorbed before dispatch.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::dependency::DependencyError;
use crate::domain::incident::{IncidentId, IncidentState, Severity};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub incident_id: IncidentId,
    pub severity: Severity,
    pub state: IncidentState,
    pub subject: String,
    pub body: String,
    /// Action the swarm settled on, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

impl Notification {
    /// Identical alerts for the same incident share a key.
    pub fn dedup_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.incident_id,
            self.state.as_str(),
            self.action.as_deref().unwrap_or("-")
        )
    }
}

#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    async fn dispatch(&self, notification: &Notification) -> Result<(), NotificationError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("Channel transport error: {0}")]
    Transport(String),

    #[error("Channel rejected notification with status {status}")]
    Rejected { status: u16 },
}

impl From<NotificationError> for DependencyError {
    fn from(err: NotificationError) -> Self {
        DependencyError::Transient(err.to_string())
    }
}

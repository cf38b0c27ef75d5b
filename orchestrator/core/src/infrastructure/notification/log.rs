// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use tracing::info;

use crate::domain::notification::{Notification, NotificationChannel, NotificationError};

/// Writes notifications to the structured log. Useful as a default channel
/// and in development.
pub struct LogChannel {
    name: String,
}

impl LogChannel {
    pub fn new(name: String) -> Self {
        Self { name }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn dispatch(&self, notification: &Notification) -> Result<(), NotificationError> {
        info!(
            channel = %self.name,
            incident_id = %notification.incident_id,
            severity = notification.severity.as_str(),
            state = notification.state.as_str(),
            action = notification.action.as_deref().unwrap_or("-"),
            subject = %notification.subject,
            "{}",
            notification.body
        );
        Ok(())
    }
}

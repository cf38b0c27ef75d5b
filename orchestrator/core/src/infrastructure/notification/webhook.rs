// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Webhook notification channel
//
// POSTs the notification as JSON. Any non-2xx response is a rejection; the
// guard in front of this channel decides whether that trips the breaker.

use async_trait::async_trait;
use tracing::debug;

use crate::domain::notification::{Notification, NotificationChannel, NotificationError};

pub struct WebhookChannel {
    name: String,
    url: String,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(name: String, url: String) -> Self {
        Self {
            name,
            url,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl NotificationChannel for WebhookChannel {
    fn name(&self) -> &str {
        &self.name
    }

    async fn dispatch(&self, notification: &Notification) -> Result<(), NotificationError> {
        let response = self
            .client
            .post(&self.url)
            .json(notification)
            .send()
            .await
            .map_err(|e| NotificationError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NotificationError::Rejected {
                status: status.as_u16(),
            });
        }
        debug!(channel = %self.name, incident_id = %notification.incident_id, "Webhook delivered");
        Ok(())
    }
}

// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Notification channel adapters plus the dedup window and guard wrapper that
//! every dispatch passes through.

pub mod log;
pub mod webhook;

use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::domain::dependency::{CallPriority, DependencyError, DependencyId};
use crate::domain::node_config::{ChannelKind, NotificationChannelConfig};
use crate::domain::notification::{Notification, NotificationChannel};
use crate::infrastructure::dependency_guard::{DependencyGuard, GuardRegistry};

pub use self::log::LogChannel;
pub use self::webhook::WebhookChannel;

/// Remembers recently delivered keys for `window`. Bounded by `capacity`;
/// the least recently seen key is evicted first.
pub struct DedupWindow {
    window: Duration,
    seen: Mutex<LruCache<String, Instant>>,
}

impl DedupWindow {
    pub fn new(window: Duration, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            window,
            seen: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// True when `key` was recorded less than `window` ago.
    pub fn is_duplicate(&self, key: &str) -> bool {
        let mut seen = self.seen.lock();
        match seen.get(key) {
            Some(at) if at.elapsed() < self.window => true,
            Some(_) => {
                seen.pop(key);
                false
            }
            None => false,
        }
    }

    pub fn record(&self, key: String) {
        self.seen.lock().put(key, Instant::now());
    }
}

/// A channel behind its own dependency guard and dedup window.
pub struct GuardedChannel {
    channel: Arc<dyn NotificationChannel>,
    guard: Arc<DependencyGuard>,
    dedup: DedupWindow,
}

impl GuardedChannel {
    pub fn new(channel: Arc<dyn NotificationChannel>, guard: Arc<DependencyGuard>, dedup: DedupWindow) -> Self {
        Self { channel, guard, dedup }
    }

    pub fn name(&self) -> &str {
        self.channel.name()
    }

    /// Dispatch unless an identical alert went out within the window.
    /// Returns `Ok(false)` for a suppressed duplicate. Only successful
    /// deliveries are recorded, so a failed send can be retried.
    pub async fn notify(&self, notification: &Notification, priority: CallPriority) -> Result<bool, DependencyError> {
        let key = notification.dedup_key();
        if self.dedup.is_duplicate(&key) {
            debug!(channel = self.name(), key = %key, "Suppressed duplicate notification");
            metrics::counter!("vigil_notifications_deduplicated_total", "channel" => self.name().to_string())
                .increment(1);
            return Ok(false);
        }

        let channel = Arc::clone(&self.channel);
        self.guard
            .call(priority, || async move { channel.dispatch(notification).await })
            .await?;

        self.dedup.record(key);
        metrics::counter!("vigil_notifications_sent_total", "channel" => self.name().to_string()).increment(1);
        Ok(true)
    }
}

/// Build every configured channel, each with a guard from `guards`.
pub fn from_config(
    configs: &[NotificationChannelConfig],
    guards: &GuardRegistry,
) -> anyhow::Result<Vec<Arc<GuardedChannel>>> {
    configs
        .iter()
        .map(|config| {
            let channel: Arc<dyn NotificationChannel> = match config.kind {
                ChannelKind::Log => Arc::new(LogChannel::new(config.name.clone())),
                ChannelKind::Webhook => {
                    let url = config.url.clone().ok_or_else(|| {
                        anyhow::anyhow!("Webhook channel '{}' requires a url", config.name)
                    })?;
                    Arc::new(WebhookChannel::new(config.name.clone(), url))
                }
            };
            Ok(Arc::new(GuardedChannel::new(
                channel,
                guards.guard(&DependencyId::notification(&config.name)),
                DedupWindow::new(config.dedup_window, config.dedup_capacity),
            )))
        })
        .collect()
}

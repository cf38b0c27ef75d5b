// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Broadcast Hub - Prioritized, batched fan-out to live observers
//
// Subscribers are spread over shards. Each shard owns one dispatch loop that,
// every batch window, drains each subscriber's backlog into a single
// `HubFrame::Batch`, so per-subscriber order is preserved. Shedding happens on
// enqueue: once a backlog passes the threshold, low-priority envelopes are
// coalesced per incident, then dropped oldest-first. High-priority envelopes
// are never dropped; a subscriber still over threshold is disconnected with an
// explicit frame instead. Each channel keeps one slot reserved for that frame,
// so it arrives even when the channel is full.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::events::{EventEnvelope, EventPublisher};
use crate::domain::incident::IncidentId;
use crate::domain::node_config::HubConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(pub u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    BacklogOverflow,
    HeartbeatTimeout,
    HubShutdown,
}

/// What a subscriber's channel carries.
#[derive(Debug, Clone, PartialEq)]
pub enum HubFrame {
    Batch(Vec<EventEnvelope>),
    Disconnected(DisconnectReason),
}

/// Predicate deciding which envelopes a subscriber receives.
#[derive(Clone)]
pub struct SubscriberFilter(Arc<dyn Fn(&EventEnvelope) -> bool + Send + Sync>);

impl SubscriberFilter {
    pub fn new(predicate: impl Fn(&EventEnvelope) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    pub fn all() -> Self {
        Self::new(|_| true)
    }

    pub fn incident(incident_id: IncidentId) -> Self {
        Self::new(move |envelope| envelope.incident_id == incident_id)
    }

    fn matches(&self, envelope: &EventEnvelope) -> bool {
        (self.0)(envelope)
    }
}

impl fmt::Debug for SubscriberFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SubscriberFilter")
    }
}

#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub frames: mpsc::Receiver<HubFrame>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberInfo {
    pub id: SubscriberId,
    pub backlog: usize,
    pub last_acknowledged: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("Subscriber limit of {0} reached")]
    Full(usize),

    #[error("Unknown subscriber {0}")]
    UnknownSubscriber(SubscriberId),
}

struct Slot {
    filter: SubscriberFilter,
    backlog: VecDeque<EventEnvelope>,
    last_acknowledged: Option<u64>,
    last_heartbeat: Instant,
    sender: mpsc::Sender<HubFrame>,
    control: Option<mpsc::OwnedPermit<HubFrame>>,
}

impl Slot {
    /// Deliver the final frame through the reserved slot.
    fn disconnect(&mut self, reason: DisconnectReason) {
        if let Some(permit) = self.control.take() {
            permit.send(HubFrame::Disconnected(reason));
        }
    }
}

#[derive(Default)]
struct Shard {
    slots: Mutex<BTreeMap<SubscriberId, Slot>>,
}

pub struct BroadcastHub {
    config: HubConfig,
    shards: Vec<Shard>,
    next_id: AtomicU64,
    subscribers: AtomicUsize,
    shutdown: CancellationToken,
}

impl BroadcastHub {
    pub fn new(config: HubConfig) -> Self {
        let shards = (0..config.shard_count.max(1)).map(|_| Shard::default()).collect();
        Self {
            config,
            shards,
            next_id: AtomicU64::new(1),
            subscribers: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    fn shard(&self, id: SubscriberId) -> &Shard {
        &self.shards[(id.0 as usize) % self.shards.len()]
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::Acquire)
    }

    pub fn subscribe(&self, filter: SubscriberFilter) -> Result<Subscription, HubError> {
        let max = self.config.max_subscribers;
        self.subscribers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .map_err(|_| HubError::Full(max))?;

        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, frames) = mpsc::channel(self.config.channel_capacity.max(1) + 1);
        let control = sender.clone().try_reserve_owned().ok();
        self.shard(id).slots.lock().insert(
            id,
            Slot {
                filter,
                backlog: VecDeque::new(),
                last_acknowledged: None,
                last_heartbeat: Instant::now(),
                sender,
                control,
            },
        );
        metrics::gauge!("vigil_hub_subscribers").set(self.subscriber_count() as f64);
        info!(subscriber_id = %id, "Observer subscribed");
        Ok(Subscription { id, frames })
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.shard(id).slots.lock().remove(&id).is_some();
        if removed {
            self.on_removed(id, None);
        }
        removed
    }

    pub fn heartbeat(&self, id: SubscriberId) -> Result<(), HubError> {
        let mut slots = self.shard(id).slots.lock();
        let slot = slots.get_mut(&id).ok_or(HubError::UnknownSubscriber(id))?;
        slot.last_heartbeat = Instant::now();
        Ok(())
    }

    pub fn acknowledge(&self, id: SubscriberId, sequence: u64) -> Result<(), HubError> {
        let mut slots = self.shard(id).slots.lock();
        let slot = slots.get_mut(&id).ok_or(HubError::UnknownSubscriber(id))?;
        slot.last_acknowledged = Some(slot.last_acknowledged.map_or(sequence, |s| s.max(sequence)));
        Ok(())
    }

    pub fn subscriber_info(&self, id: SubscriberId) -> Option<SubscriberInfo> {
        self.shard(id).slots.lock().get(&id).map(|slot| SubscriberInfo {
            id,
            backlog: slot.backlog.len(),
            last_acknowledged: slot.last_acknowledged,
        })
    }

    /// Enqueue for every matching subscriber, shedding where needed.
    pub fn broadcast(&self, envelope: EventEnvelope) {
        let threshold = self.config.backlog_threshold;
        for shard in &self.shards {
            let mut overflowed = Vec::new();
            {
                let mut slots = shard.slots.lock();
                for (id, slot) in slots.iter_mut() {
                    if !slot.filter.matches(&envelope) {
                        continue;
                    }
                    slot.backlog.push_back(envelope.clone());
                    if slot.backlog.len() > threshold && shed(&mut slot.backlog, threshold) {
                        overflowed.push(*id);
                    }
                }
                for id in &overflowed {
                    if let Some(mut slot) = slots.remove(id) {
                        slot.disconnect(DisconnectReason::BacklogOverflow);
                    }
                }
            }
            for id in overflowed {
                self.on_removed(id, Some(DisconnectReason::BacklogOverflow));
            }
        }
    }

    /// One dispatch pass over every shard: flush batches, evict stale
    /// subscribers. The shard loops call this per shard each batch window.
    pub fn dispatch_once(&self) {
        for index in 0..self.shards.len() {
            self.dispatch_shard(index);
        }
    }

    fn dispatch_shard(&self, index: usize) {
        let grace = self.config.heartbeat_grace;
        let now = Instant::now();
        let mut removed = Vec::new();
        {
            let mut slots = self.shards[index].slots.lock();
            for (id, slot) in slots.iter_mut() {
                if now.saturating_duration_since(slot.last_heartbeat) > grace {
                    slot.disconnect(DisconnectReason::HeartbeatTimeout);
                    removed.push((*id, DisconnectReason::HeartbeatTimeout));
                    continue;
                }
                if slot.backlog.is_empty() {
                    continue;
                }
                let batch: Vec<EventEnvelope> = slot.backlog.drain(..).collect();
                let size = batch.len();
                match slot.sender.try_send(HubFrame::Batch(batch)) {
                    Ok(()) => {
                        metrics::counter!("vigil_hub_envelopes_delivered_total").increment(size as u64);
                    }
                    Err(mpsc::error::TrySendError::Full(HubFrame::Batch(batch))) => {
                        for envelope in batch.into_iter().rev() {
                            slot.backlog.push_front(envelope);
                        }
                    }
                    Err(mpsc::error::TrySendError::Full(_)) => {}
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        removed.push((*id, DisconnectReason::HubShutdown));
                    }
                }
            }
            for (id, _) in &removed {
                slots.remove(id);
            }
        }
        for (id, reason) in removed {
            self.on_removed(id, Some(reason));
        }
    }

    fn on_removed(&self, id: SubscriberId, reason: Option<DisconnectReason>) {
        self.subscribers.fetch_sub(1, Ordering::AcqRel);
        metrics::gauge!("vigil_hub_subscribers").set(self.subscriber_count() as f64);
        match reason {
            Some(DisconnectReason::BacklogOverflow) => {
                warn!(subscriber_id = %id, "Observer disconnected: backlog overflow");
                metrics::counter!("vigil_hub_disconnects_total", "reason" => "backlog_overflow").increment(1);
            }
            Some(DisconnectReason::HeartbeatTimeout) => {
                info!(subscriber_id = %id, "Observer evicted: heartbeat timeout");
                metrics::counter!("vigil_hub_disconnects_total", "reason" => "heartbeat_timeout").increment(1);
            }
            _ => debug!(subscriber_id = %id, "Observer removed"),
        }
    }

    /// Spawn one dispatch loop per shard.
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.shards.len())
            .map(|index| {
                let hub = Arc::clone(self);
                tokio::spawn(async move {
                    let window = hub.config.batch_window.max(std::time::Duration::from_millis(1));
                    let mut ticker = tokio::time::interval(window);
                    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                    loop {
                        tokio::select! {
                            _ = hub.shutdown.cancelled() => break,
                            _ = ticker.tick() => hub.dispatch_shard(index),
                        }
                    }
                    debug!(shard = index, "Hub dispatch loop stopped");
                })
            })
            .collect()
    }

    /// Stop dispatch loops and tell every subscriber.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        for shard in &self.shards {
            let drained: Vec<(SubscriberId, Slot)> = std::mem::take(&mut *shard.slots.lock()).into_iter().collect();
            for (id, mut slot) in drained {
                slot.disconnect(DisconnectReason::HubShutdown);
                self.on_removed(id, Some(DisconnectReason::HubShutdown));
            }
        }
    }
}

impl EventPublisher for BroadcastHub {
    fn publish(&self, envelope: EventEnvelope) {
        self.broadcast(envelope);
    }
}

/// Shed low-priority envelopes until the backlog fits. Returns true if it
/// still exceeds `threshold` (only high-priority traffic left).
fn shed(backlog: &mut VecDeque<EventEnvelope>, threshold: usize) -> bool {
    let before = backlog.len();

    // Keep only the newest low-priority envelope per incident.
    let mut seen = HashSet::new();
    let mut kept: VecDeque<EventEnvelope> = VecDeque::with_capacity(backlog.len());
    while let Some(envelope) = backlog.pop_back() {
        if envelope.is_high_priority() || seen.insert(envelope.incident_id) {
            kept.push_front(envelope);
        }
    }
    *backlog = kept;

    while backlog.len() > threshold {
        match backlog.iter().position(|e| !e.is_high_priority()) {
            Some(oldest_low) => {
                backlog.remove(oldest_low);
            }
            None => break,
        }
    }

    let dropped = before - backlog.len();
    if dropped > 0 {
        metrics::counter!("vigil_hub_envelopes_shed_total").increment(dropped as u64);
    }
    backlog.len() > threshold
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::NotificationPriority;
    use chrono::Utc;
    use std::time::Duration;

    fn envelope(incident_id: IncidentId, sequence: u64, priority: NotificationPriority) -> EventEnvelope {
        EventEnvelope {
            event_type: "Test".into(),
            incident_id,
            sequence,
            payload: serde_json::Value::Null,
            timestamp: Utc::now(),
            badge: None,
            priority,
        }
    }

    #[test]
    fn test_shed_coalesces_then_drops_low_priority() {
        let a = IncidentId::new();
        let b = IncidentId::new();
        let mut backlog: VecDeque<_> = vec![
            envelope(a, 1, NotificationPriority::Low),
            envelope(a, 2, NotificationPriority::High),
            envelope(a, 3, NotificationPriority::Low),
            envelope(b, 1, NotificationPriority::Low),
            envelope(a, 4, NotificationPriority::Low),
        ]
        .into();

        assert!(!shed(&mut backlog, 2));
        let left: Vec<(IncidentId, u64)> = backlog.iter().map(|e| (e.incident_id, e.sequence)).collect();
        assert_eq!(left, vec![(a, 2), (a, 4)]);
    }

    #[test]
    fn test_shed_reports_overflow_when_only_high_priority_remains() {
        let a = IncidentId::new();
        let mut backlog: VecDeque<_> = (1..=4).map(|s| envelope(a, s, NotificationPriority::High)).collect();
        assert!(shed(&mut backlog, 2));
        assert_eq!(backlog.len(), 4);
    }

    #[tokio::test]
    async fn test_subscriber_limit() {
        let hub = BroadcastHub::new(HubConfig {
            max_subscribers: 1,
            ..HubConfig::default()
        });
        let first = hub.subscribe(SubscriberFilter::all()).unwrap();
        assert_eq!(hub.subscribe(SubscriberFilter::all()).unwrap_err(), HubError::Full(1));
        assert!(hub.unsubscribe(first.id));
        assert!(hub.subscribe(SubscriberFilter::all()).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batches_preserve_order_and_filter() {
        let hub = BroadcastHub::new(HubConfig::default());
        let watched = IncidentId::new();
        let mut sub = hub.subscribe(SubscriberFilter::incident(watched)).unwrap();

        hub.broadcast(envelope(watched, 1, NotificationPriority::High));
        hub.broadcast(envelope(IncidentId::new(), 1, NotificationPriority::High));
        hub.broadcast(envelope(watched, 2, NotificationPriority::Low));
        hub.dispatch_once();

        match sub.frames.recv().await.unwrap() {
            HubFrame::Batch(batch) => {
                assert_eq!(batch.iter().map(|e| e.sequence).collect::<Vec<_>>(), vec![1, 2]);
            }
            other => panic!("unexpected frame {:?}", other),
        }
        hub.acknowledge(sub.id, 2).unwrap();
        assert_eq!(hub.subscriber_info(sub.id).unwrap().last_acknowledged, Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_heartbeat_is_evicted() {
        let hub = BroadcastHub::new(HubConfig {
            heartbeat_grace: Duration::from_secs(5),
            ..HubConfig::default()
        });
        let mut stale = hub.subscribe(SubscriberFilter::all()).unwrap();
        let live = hub.subscribe(SubscriberFilter::all()).unwrap();

        tokio::time::advance(Duration::from_secs(4)).await;
        hub.heartbeat(live.id).unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        hub.dispatch_once();

        assert_eq!(
            stale.frames.recv().await,
            Some(HubFrame::Disconnected(DisconnectReason::HeartbeatTimeout))
        );
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.heartbeat(stale.id), Err(HubError::UnknownSubscriber(stale.id)));
    }
}

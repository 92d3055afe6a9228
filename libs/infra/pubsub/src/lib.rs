//! In-process publish/subscribe bus.
//!
//! FIFO per `(topic, subscriber)`, at-most-once delivery, no persistence. A
//! slow subscriber only drains its own ring buffer (isolation); other
//! subscribers of the same topic are unaffected.

mod channel;
mod message;
mod metrics;
mod policy;

pub use message::{AlertEvent, AlertNotificationType, BusMessage, TOPIC_ALERT_WARNING, TOPIC_CONTROL, TOPIC_DEVICE_SNAPSHOT};
pub use metrics::spawn_drop_metrics_loop;
pub use policy::{OverflowPolicy, TopicPolicy};

use channel::RingChannel;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::trace;

struct TopicState {
    policy: TopicPolicy,
    subscribers: Vec<Arc<RingChannel>>,
}

/// Single-process fan-out bus. Cheaply cloneable (`Arc` inside); publish is
/// safe to call from any task, each subscription stream is meant to be
/// consumed by exactly one reader.
#[derive(Clone)]
pub struct PubSub {
    topics: Arc<Mutex<HashMap<String, TopicState>>>,
    shut_down: Arc<std::sync::atomic::AtomicBool>,
}

/// A single subscriber's read handle.
pub struct Subscription {
    channel: Arc<RingChannel>,
}

impl Subscription {
    pub async fn recv(&self) -> Option<BusMessage> {
        self.channel.recv().await
    }
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSub {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            shut_down: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn set_topic_policy(&self, topic: &str, policy: TopicPolicy) {
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState { policy, subscribers: Vec::new() })
            .policy = policy;
    }

    /// Returns a lazy read stream backed by a bounded buffer honoring the
    /// topic's policy (default policy if none was set).
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let mut topics = self.topics.lock().unwrap();
        let state = topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicState { policy: TopicPolicy::default(), subscribers: Vec::new() });
        let channel = Arc::new(RingChannel::new(state.policy.capacity, state.policy.on_overflow));
        state.subscribers.push(channel.clone());
        Subscription { channel }
    }

    /// Enqueues `msg` to every active subscriber of `topic`. Never blocks
    /// the caller unless the topic's policy is `BlockProducer` and every
    /// subscriber buffer is full.
    pub async fn publish(&self, topic: &str, msg: BusMessage) {
        if self.shut_down.load(std::sync::atomic::Ordering::Acquire) {
            return;
        }
        let subscribers: Vec<Arc<RingChannel>> = {
            let topics = self.topics.lock().unwrap();
            match topics.get(topic) {
                Some(state) => state.subscribers.clone(),
                None => {
                    trace!(topic, "publish to topic with no subscribers");
                    return;
                }
            }
        };
        for sub in subscribers {
            sub.push(msg.clone()).await;
        }
    }

    /// Closes every subscriber stream. Publish becomes a no-op afterward.
    pub fn shutdown(&self) {
        self.shut_down.store(true, std::sync::atomic::Ordering::Release);
        let topics = self.topics.lock().unwrap();
        for state in topics.values() {
            for sub in &state.subscribers {
                sub.close();
            }
        }
    }

    /// Snapshot of this-cycle drop counts per topic, consumed by the
    /// drop-metrics loop.
    fn drain_drop_counts(&self) -> Vec<(String, u64)> {
        let topics = self.topics.lock().unwrap();
        topics
            .iter()
            .map(|(name, state)| {
                let total: u64 = state.subscribers.iter().map(|s| s.take_dropped()).sum();
                (name.clone(), total)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fifo_per_topic_subscriber() {
        let bus = PubSub::new();
        let sub = bus.subscribe(TOPIC_ALERT_WARNING);
        for i in 0..5 {
            bus.publish(
                TOPIC_ALERT_WARNING,
                BusMessage::Alert(AlertEvent {
                    device_id: "D".into(),
                    alert_code: i.to_string(),
                    severity: talos_domain_models::AlertSeverity::Warning,
                    notification_type: AlertNotificationType::Triggered,
                    message: String::new(),
                    value: 0.0,
                }),
            )
            .await;
        }
        for i in 0..5 {
            let msg = sub.recv().await.unwrap();
            match msg {
                BusMessage::Alert(a) => assert_eq!(a.alert_code, i.to_string()),
                _ => panic!("wrong variant"),
            }
        }
    }

    #[tokio::test]
    async fn slow_subscriber_isolation_drop_oldest() {
        let bus = PubSub::new();
        bus.set_topic_policy(
            TOPIC_DEVICE_SNAPSHOT,
            TopicPolicy { capacity: 2, on_overflow: OverflowPolicy::DropOldest, metrics_window_sec: 60 },
        );
        let slow = bus.subscribe(TOPIC_DEVICE_SNAPSHOT);
        let fast = bus.subscribe(TOPIC_DEVICE_SNAPSHOT);

        for i in 0..5 {
            bus.publish(
                TOPIC_DEVICE_SNAPSHOT,
                BusMessage::Snapshot(talos_domain_models::Snapshot::new(
                    talos_domain_models::DeviceId::from("D_1"),
                    "D",
                    "1",
                    "t",
                    i,
                    Default::default(),
                )),
            )
            .await;
        }

        // Drain fast fully; it should see only the last two (oldest dropped).
        let mut seen = vec![];
        for _ in 0..2 {
            if let Some(BusMessage::Snapshot(s)) = fast.recv().await {
                seen.push(s.sampling_ts);
            }
        }
        assert_eq!(seen, vec![3, 4]);

        // Slow subscriber's buffer independently holds its own last two.
        let mut seen_slow = vec![];
        for _ in 0..2 {
            if let Some(BusMessage::Snapshot(s)) = slow.recv().await {
                seen_slow.push(s.sampling_ts);
            }
        }
        assert_eq!(seen_slow, vec![3, 4]);
    }

    #[tokio::test]
    async fn shutdown_closes_subscriptions() {
        let bus = PubSub::new();
        let sub = bus.subscribe(TOPIC_CONTROL);
        bus.shutdown();
        assert!(sub.recv().await.is_none());
    }
}

//! Background drop-metrics sampler.

use crate::PubSub;
use std::time::Duration;
use tracing::warn;

/// Samples per-topic drop counters every `window` and logs non-zero deltas.
/// Operator visibility only; does not affect delivery.
pub fn spawn_drop_metrics_loop(bus: PubSub, window: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(window).await;
            for (topic, dropped) in bus.drain_drop_counts() {
                if dropped > 0 {
                    warn!(topic = %topic, dropped, "pubsub overflow: messages dropped this window");
                }
            }
        }
    })
}

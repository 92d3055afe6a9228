//! Per-topic buffer policy, set via `set_topic_policy`.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    DropOldest,
    DropNewest,
    BlockProducer,
}

#[derive(Debug, Clone, Copy)]
pub struct TopicPolicy {
    pub capacity: usize,
    pub on_overflow: OverflowPolicy,
    pub metrics_window_sec: u64,
}

impl Default for TopicPolicy {
    fn default() -> Self {
        Self {
            capacity: 256,
            on_overflow: OverflowPolicy::DropOldest,
            metrics_window_sec: 60,
        }
    }
}

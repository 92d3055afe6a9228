//! A lock-guarded bounded ring buffer with a condition variable, used as
//! the per-subscriber queue backing every topic policy. Rust has channels,
//! but a single buffer implementation lets one policy enum drive all
//! three overflow behaviors
//! uniformly).

use crate::BusMessage;
use crate::policy::OverflowPolicy;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::Notify;

pub(crate) struct RingChannel {
    buffer: Mutex<VecDeque<BusMessage>>,
    capacity: usize,
    policy: OverflowPolicy,
    closed: AtomicBool,
    not_empty: Notify,
    not_full: Notify,
    pub(crate) dropped: AtomicU64,
}

impl RingChannel {
    pub(crate) fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            policy,
            closed: AtomicBool::new(false),
            not_empty: Notify::new(),
            not_full: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Non-blocking publish. Never fails the caller; overflow is absorbed
    /// per policy and counted.
    pub(crate) async fn push(&self, msg: BusMessage) {
        match self.policy {
            OverflowPolicy::DropOldest => {
                let mut buf = self.buffer.lock().unwrap();
                if buf.len() >= self.capacity {
                    buf.pop_front();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                buf.push_back(msg);
                drop(buf);
                self.not_empty.notify_one();
            }
            OverflowPolicy::DropNewest => {
                let mut buf = self.buffer.lock().unwrap();
                if buf.len() >= self.capacity {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                buf.push_back(msg);
                drop(buf);
                self.not_empty.notify_one();
            }
            OverflowPolicy::BlockProducer => {
                loop {
                    {
                        let mut buf = self.buffer.lock().unwrap();
                        if buf.len() < self.capacity {
                            buf.push_back(msg);
                            drop(buf);
                            self.not_empty.notify_one();
                            return;
                        }
                    }
                    self.not_full.notified().await;
                }
            }
        }
    }

    /// Returns `None` only once the channel has been closed and drained
    /// (a subscriber read fails only if the bus is shut down).
    pub(crate) async fn recv(&self) -> Option<BusMessage> {
        loop {
            {
                let mut buf = self.buffer.lock().unwrap();
                if let Some(msg) = buf.pop_front() {
                    drop(buf);
                    self.not_full.notify_one();
                    return Some(msg);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.not_empty.notified().await;
        }
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.not_empty.notify_waiters();
        self.not_full.notify_waiters();
    }

    pub(crate) fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }
}

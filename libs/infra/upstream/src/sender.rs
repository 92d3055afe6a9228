//! Upstream sender orchestration: tick-aligned batch build, save-then-send,
//! resend worker, budget enforcement.

use crate::errors::UpstreamError;
use crate::outbox::OutboxStore;
use crate::payload::{convert_snapshot, PushImaPayload};
use crate::scheduler::{is_fresh, next_aligned_tick, resend_gate_blocked, within_last_known_ttl};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use talos_domain_models::device::DeviceId;
use talos_domain_models::snapshot::Snapshot;
use talos_infra_pubsub::{BusMessage, PubSub, TOPIC_DEVICE_SNAPSHOT};
use tokio::sync::Notify;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub gateway_id: String,
    pub cloud_url: String,
    pub http_timeout: StdDuration,
    pub attempt_count: u32,

    /// Seconds from midnight the main send tick is anchored to.
    pub anchor_offset_sec: i64,
    pub send_interval_sec: i64,
    pub fresh_window_sec: i64,
    /// `0` disables the last-known fallback.
    pub last_known_ttl_sec: i64,

    pub resend_start_delay_sec: u64,
    pub fail_resend_interval_sec: i64,
    pub resend_anchor_offset_sec: i64,
    pub fail_resend_batch: usize,
    /// `-1` means unlimited.
    pub max_retry: i32,
    pub protect_recent_sec: f64,
    pub last_post_ok_within_sec: i64,

    pub resend_quota_mb: u64,
    pub fs_free_min_mb: u64,
    pub resend_cleanup_batch: usize,
    pub resend_cleanup_enabled: bool,
}

struct DeviceCache {
    latest: Snapshot,
}

/// Tracks the most recent snapshot per device for tick assembly and
/// deduplication.
#[derive(Default)]
struct SnapshotCache {
    by_device: HashMap<DeviceId, DeviceCache>,
    last_sent_ts: HashMap<DeviceId, i64>,
}

pub struct UpstreamSender {
    config: SenderConfig,
    outbox: OutboxStore,
    http: reqwest::Client,
    cache: Mutex<SnapshotCache>,
    last_post_ok_at: Mutex<Option<DateTime<Utc>>>,
}

impl UpstreamSender {
    pub fn new(config: SenderConfig, outbox_dir: impl Into<PathBuf>) -> Result<Arc<Self>, UpstreamError> {
        let http = reqwest::Client::builder().timeout(config.http_timeout).build()?;
        Ok(Arc::new(Self {
            outbox: OutboxStore::new(outbox_dir)?,
            http,
            cache: Mutex::new(SnapshotCache::default()),
            last_post_ok_at: Mutex::new(None),
            config,
        }))
    }

    /// Consumes `DEVICE_SNAPSHOT` forever, updating the per-device cache
    /// used by the tick loop. Intended to run as its own task.
    #[instrument(skip(self, bus))]
    pub async fn run_cache_updater(self: Arc<Self>, bus: PubSub, shutdown: Arc<Notify>) {
        let sub = bus.subscribe(TOPIC_DEVICE_SNAPSHOT);
        loop {
            tokio::select! {
                _ = shutdown.notified() => return,
                msg = sub.recv() => {
                    match msg {
                        Some(BusMessage::Snapshot(snap)) => {
                            let mut cache = self.cache.lock().unwrap();
                            cache.by_device.insert(snap.device_id.clone(), DeviceCache { latest: snap });
                        }
                        Some(_) => {}
                        None => return,
                    }
                }
            }
        }
    }

    /// Sleeps until each aligned tick, builds and sends one batch, then
    /// repeats. Exits on shutdown notification.
    #[instrument(skip(self, shutdown))]
    pub async fn run_tick_loop(self: Arc<Self>, shutdown: Arc<Notify>) {
        loop {
            let now = Utc::now();
            let tick = next_aligned_tick(now, self.config.anchor_offset_sec, self.config.send_interval_sec);
            let sleep_for = (tick - now).to_std().unwrap_or(StdDuration::ZERO);
            tokio::select! {
                _ = shutdown.notified() => return,
                _ = tokio::time::sleep(sleep_for) => {
                    self.run_tick(tick).await;
                }
            }
        }
    }

    /// Starts `resend_start_delay_sec` after process start, then runs one
    /// batch every aligned resend tick.
    #[instrument(skip(self, shutdown))]
    pub async fn run_resend_loop(self: Arc<Self>, shutdown: Arc<Notify>) {
        tokio::select! {
            _ = shutdown.notified() => return,
            _ = tokio::time::sleep(StdDuration::from_secs(self.config.resend_start_delay_sec)) => {}
        }

        loop {
            let now = Utc::now();
            let tick = next_aligned_tick(now, self.config.resend_anchor_offset_sec, self.config.fail_resend_interval_sec);
            let sleep_for = (tick - now).to_std().unwrap_or(StdDuration::ZERO);
            tokio::select! {
                _ = shutdown.notified() => return,
                _ = tokio::time::sleep(sleep_for) => {
                    self.run_resend_cycle().await;
                }
            }
        }
    }

    /// Periodically enforces the storage budget (budget
    /// enforcement"). Interval is a fixed fraction of the cleanup concern,
    /// not itself tick-aligned.
    pub async fn run_budget_loop(self: Arc<Self>, shutdown: Arc<Notify>, every: StdDuration) {
        loop {
            tokio::select! {
                _ = shutdown.notified() => return,
                _ = tokio::time::sleep(every) => {
                    self.outbox.enforce_budget(
                        self.config.resend_quota_mb,
                        self.config.fs_free_min_mb,
                        self.config.protect_recent_sec,
                        self.config.resend_cleanup_batch,
                        self.config.resend_cleanup_enabled,
                    );
                }
            }
        }
    }

    async fn run_tick(&self, tick: DateTime<Utc>) {
        let envelope = self.build_envelope(tick);
        if envelope.data.is_empty() {
            debug!(tick = %tick, "no eligible snapshots for this tick, skipping");
            return;
        }

        let path = match self.outbox.persist_payload(&serde_json::to_value(&envelope).unwrap()) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to persist outbox payload");
                return;
            }
        };

        match self.post_with_retries(&envelope, self.config.attempt_count).await {
            Ok(()) => {
                self.outbox.delete(&path);
                *self.last_post_ok_at.lock().unwrap() = Some(Utc::now());
                info!(tick = %tick, devices = envelope.data.len(), "upstream tick sent");
            }
            Err(e) => {
                warn!(error = %e, "upstream tick post failed, leaving file for resend worker");
            }
        }
    }

    fn build_envelope(&self, tick: DateTime<Utc>) -> PushImaPayload {
        let mut cache = self.cache.lock().unwrap();
        let mut data = Vec::new();

        let device_ids: Vec<DeviceId> = cache.by_device.keys().cloned().collect();
        for device_id in device_ids {
            let Some(entry) = cache.by_device.get(&device_id) else { continue };
            let snap = &entry.latest;

            let eligible = is_fresh(snap.sampling_ts, tick, self.config.fresh_window_sec)
                || within_last_known_ttl(snap.sampling_ts, tick, self.config.last_known_ttl_sec);
            if !eligible {
                continue;
            }

            let already_sent = cache.last_sent_ts.get(&device_id) == Some(&snap.sampling_ts);
            if already_sent {
                continue;
            }

            data.extend(convert_snapshot(&self.config.gateway_id, snap));
            cache.last_sent_ts.insert(device_id, snap.sampling_ts);
        }

        PushImaPayload::new(self.config.gateway_id.clone(), tick, data)
    }

    async fn post_with_retries(&self, envelope: &PushImaPayload, attempts: u32) -> Result<(), UpstreamError> {
        let mut last_err = None;
        for attempt in 0..attempts.max(1) {
            match self.http.post(&self.config.cloud_url).json(envelope).send().await {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => last_err = Some(UpstreamError::Io(std::io::Error::new(std::io::ErrorKind::Other, format!("http status {}", resp.status())))),
                Err(e) => last_err = Some(UpstreamError::Http(e)),
            }
            if attempt + 1 < attempts {
                tokio::time::sleep(StdDuration::from_millis(250)).await;
            }
        }
        Err(last_err.unwrap_or_else(|| UpstreamError::Io(std::io::Error::new(std::io::ErrorKind::Other, "no attempts made"))))
    }

    async fn run_resend_cycle(&self) {
        let now = Utc::now();
        if resend_gate_blocked(*self.last_post_ok_at.lock().unwrap(), now, self.config.last_post_ok_within_sec) {
            debug!("resend cycle skipped, cloud unhealthy");
            return;
        }

        let batch = self.outbox.pick_batch(self.config.fail_resend_batch, self.config.protect_recent_sec);
        for path in batch {
            let Ok(bytes) = std::fs::read(&path) else { continue };
            let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) else {
                self.outbox.delete(&path);
                continue;
            };

            match self.http.post(&self.config.cloud_url).json(&value).send().await {
                Ok(resp) if resp.status().is_success() => {
                    self.outbox.delete(&path);
                    *self.last_post_ok_at.lock().unwrap() = Some(Utc::now());
                }
                _ => match self.outbox.retry_or_fail(&path, self.config.max_retry) {
                    Ok((_, failed)) if failed => warn!(path = %path.display(), "outbox file exhausted retries, marked .fail"),
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "failed to rename outbox file after failed resend"),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn base_config(url: String) -> SenderConfig {
        SenderConfig {
            gateway_id: "GATEWAY0001".into(),
            cloud_url: url,
            http_timeout: StdDuration::from_secs(1),
            attempt_count: 1,
            anchor_offset_sec: 0,
            send_interval_sec: 60,
            fresh_window_sec: 30,
            last_known_ttl_sec: 0,
            resend_start_delay_sec: 0,
            fail_resend_interval_sec: 120,
            resend_anchor_offset_sec: 0,
            fail_resend_batch: 10,
            max_retry: 3,
            protect_recent_sec: 0.0,
            last_post_ok_within_sec: 0,
            resend_quota_mb: 100,
            fs_free_min_mb: 0,
            resend_cleanup_batch: 10,
            resend_cleanup_enabled: true,
        }
    }

    #[tokio::test]
    async fn build_envelope_skips_duplicate_sampling_ts() {
        let tmp = tempfile::tempdir().unwrap();
        let sender = UpstreamSender::new(base_config("http://example.invalid".into()), tmp.path()).unwrap();

        let tick = Utc::now();
        let mut values = BTreeMap::new();
        values.insert("KWH".to_string(), 1.0);
        let snap = Snapshot::new(DeviceId::from("INV_1"), "INV", "1", "inverter", tick.timestamp(), values);

        {
            let mut cache = sender.cache.lock().unwrap();
            cache.by_device.insert(snap.device_id.clone(), DeviceCache { latest: snap.clone() });
        }

        let first = sender.build_envelope(tick);
        assert_eq!(first.data.len(), 1);

        let second = sender.build_envelope(tick);
        assert!(second.data.is_empty());
    }

    #[tokio::test]
    async fn build_envelope_excludes_stale_snapshots_without_ttl() {
        let tmp = tempfile::tempdir().unwrap();
        let sender = UpstreamSender::new(base_config("http://example.invalid".into()), tmp.path()).unwrap();

        let tick = Utc::now();
        let mut values = BTreeMap::new();
        values.insert("KWH".to_string(), 1.0);
        let stale_ts = tick.timestamp() - 3600;
        let snap = Snapshot::new(DeviceId::from("INV_1"), "INV", "1", "inverter", stale_ts, values);
        {
            let mut cache = sender.cache.lock().unwrap();
            cache.by_device.insert(snap.device_id.clone(), DeviceCache { latest: snap });
        }

        let envelope = sender.build_envelope(tick);
        assert!(envelope.data.is_empty());
    }
}

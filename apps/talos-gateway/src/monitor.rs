//! Device Monitor: periodic, concurrency-bounded poll loop that is health-
//! gated per device and also emits derived virtual-device snapshots.

use crate::device_table::{DeviceHandle, DeviceTable};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use talos_core_modbus::HealthState;
use talos_domain_models::{DeviceId, Snapshot, UNREADABLE_SENTINEL};
use talos_infra_pubsub::{BusMessage, PubSub, TOPIC_DEVICE_SNAPSHOT};
use talos_shared_config::virtual_device::{AggregationKind, VirtualDeviceConfig};
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::time::timeout;
use tracing::{info, warn};

pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub device_timeout: Duration,
    pub read_concurrency: usize,
    pub virtual_devices: VirtualDeviceConfig,
}

/// Runs until `shutdown` fires. Each tick bounds concurrent device reads by
/// a semaphore, then folds this tick's snapshots into any configured
/// virtual devices.
pub async fn run(devices: Arc<DeviceTable>, bus: PubSub, config: MonitorConfig, shutdown: Arc<Notify>) {
    let semaphore = Arc::new(Semaphore::new(config.read_concurrency.max(1)));
    let latest: Arc<Mutex<BTreeMap<DeviceId, Snapshot>>> = Arc::new(Mutex::new(BTreeMap::new()));
    let mut interval = tokio::time::interval(config.poll_interval);

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                info!("monitor shutting down");
                return;
            }
            _ = interval.tick() => {}
        }

        let mut tasks = Vec::with_capacity(devices.len());
        for (device_id, handle) in devices.iter() {
            let device_id = device_id.clone();
            let handle = handle.clone();
            let bus = bus.clone();
            let semaphore = semaphore.clone();
            let latest = latest.clone();
            let device_timeout = config.device_timeout;
            tasks.push(tokio::spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                poll_one(&device_id, &handle, &bus, &latest, device_timeout).await;
            }));
        }
        for task in tasks {
            let _ = task.await;
        }

        publish_virtual_snapshots(&latest, &bus, &config.virtual_devices).await;
    }
}

async fn poll_one(
    device_id: &DeviceId,
    handle: &DeviceHandle,
    bus: &PubSub,
    latest: &Mutex<BTreeMap<DeviceId, Snapshot>>,
    device_timeout: Duration,
) {
    let sampling_ts = Utc::now().timestamp();
    let param_names: Vec<String> =
        handle.instance.register_map.iter().filter(|(_, def)| def.readable).map(|(name, _)| name.clone()).collect();

    let cooldown_ready = {
        let health = handle.health.lock().await;
        match health.state() {
            HealthState::Unhealthy if health.cooldown_elapsed() => Some(true),
            HealthState::Unhealthy => Some(false),
            HealthState::Healthy => None,
        }
    };

    match cooldown_ready {
        None => {}
        Some(false) => {
            publish_offline(device_id, handle, sampling_ts, param_names, bus, latest).await;
            return;
        }
        Some(true) => {
            let probe_passed = handle.device.quick_probe(&handle.health_strategy).await;
            if probe_passed {
                handle.health.lock().await.mark_success();
            } else {
                handle.health.lock().await.retry_cooldown();
                publish_offline(device_id, handle, sampling_ts, param_names, bus, latest).await;
                return;
            }
        }
    }

    match timeout(device_timeout, handle.device.read_all()).await {
        Ok(values) => {
            handle.health.lock().await.mark_success();
            let snapshot = Snapshot::new(
                device_id.clone(),
                &handle.instance.model,
                &handle.instance.slave_id,
                &handle.instance.device_type,
                sampling_ts,
                values,
            );
            latest.lock().await.insert(device_id.clone(), snapshot.clone());
            bus.publish(TOPIC_DEVICE_SNAPSHOT, BusMessage::Snapshot(snapshot)).await;
        }
        Err(_) => {
            warn!(device_id = %device_id, "device read timed out");
            handle.health.lock().await.mark_failure();
            publish_offline(device_id, handle, sampling_ts, param_names, bus, latest).await;
        }
    }
}

async fn publish_offline(
    device_id: &DeviceId,
    handle: &DeviceHandle,
    sampling_ts: i64,
    param_names: Vec<String>,
    bus: &PubSub,
    latest: &Mutex<BTreeMap<DeviceId, Snapshot>>,
) {
    let snapshot = Snapshot::offline(
        device_id.clone(),
        &handle.instance.model,
        &handle.instance.slave_id,
        &handle.instance.device_type,
        sampling_ts,
        param_names,
    );
    latest.lock().await.insert(device_id.clone(), snapshot.clone());
    bus.publish(TOPIC_DEVICE_SNAPSHOT, BusMessage::Snapshot(snapshot)).await;
}

fn aggregate(samples: &[f64], kind: AggregationKind) -> f64 {
    match kind {
        AggregationKind::Average => samples.iter().sum::<f64>() / samples.len() as f64,
        AggregationKind::Sum => samples.iter().sum(),
        AggregationKind::Min => samples.iter().copied().fold(f64::INFINITY, f64::min),
        AggregationKind::Max => samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
    }
}

async fn publish_virtual_snapshots(
    latest: &Mutex<BTreeMap<DeviceId, Snapshot>>,
    bus: &PubSub,
    virtual_devices: &VirtualDeviceConfig,
) {
    if virtual_devices.devices.is_empty() {
        return;
    }
    let cache = latest.lock().await;
    let sampling_ts = Utc::now().timestamp();
    for (name, entry) in &virtual_devices.devices {
        let device_id = DeviceId::new(name, &entry.slave_id);
        let mut values = BTreeMap::new();
        for (param_name, param) in &entry.parameters {
            let samples: Vec<f64> = param
                .devices
                .iter()
                .filter_map(|source_device| cache.get(&DeviceId::from(source_device.as_str())))
                .filter_map(|snap| snap.value(&param.source_param))
                .filter(|v| *v != UNREADABLE_SENTINEL)
                .collect();
            let value = if samples.is_empty() { UNREADABLE_SENTINEL } else { aggregate(&samples, param.aggregation) };
            values.insert(param_name.clone(), value);
        }
        let snapshot = Snapshot::new(device_id, name, &entry.slave_id, &entry.device_type, sampling_ts, values);
        bus.publish(TOPIC_DEVICE_SNAPSHOT, BusMessage::Snapshot(snapshot)).await;
    }
}

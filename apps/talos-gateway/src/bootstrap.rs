//! Wires a loaded `TalosConfig` into the live device table, the pubsub bus,
//! and every long-running subscriber, then hands back a `SubscriberRegistry`
//! ready to start.

use crate::alerts::AlertSubsystem;
use crate::control::executor::ControlExecutor;
use crate::control::ControlSubsystem;
use crate::device_table::{DeviceHandle, DeviceTable};
use crate::errors::GatewayError;
use crate::monitor::{self, MonitorConfig};
use crate::rtu_bus::{RtuModbusBus, SerialPort};
use crate::subscriber_registry::{runner, SubscriberRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use talos_core_modbus::{calculate_health_params, infer_strategy_with_hint, GenericDevice, HealthManager, SerializedBus};
use talos_infra_pubsub::{spawn_drop_metrics_loop, PubSub, TopicPolicy, TOPIC_ALERT_WARNING, TOPIC_CONTROL, TOPIC_DEVICE_SNAPSHOT};
use talos_infra_storage::{run_maintenance_loop, MaintenanceConfig, PersistedTimeElapsedStore, SnapshotRepository};
use talos_infra_upstream::{SenderConfig, UpstreamSender};
use talos_shared_config::TalosConfig;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Everything a running gateway process holds onto. Dropping this without
/// calling `shutdown` first leaks the background tasks until the process
/// exits.
pub struct Gateway {
    pub bus: PubSub,
    pub registry: SubscriberRegistry,
    pub repository: Arc<SnapshotRepository>,
    drop_metrics: tokio::task::JoinHandle<()>,
}

impl Gateway {
    /// Stops every subscriber (each drains its in-flight unit of work up to
    /// `drain` before exiting), then closes the bus.
    pub async fn shutdown(self, drain: Duration) {
        let stop = self.registry.stop_all();
        tokio::select! {
            _ = stop => {}
            _ = tokio::time::sleep(drain) => {}
        }
        self.bus.shutdown();
        self.drop_metrics.abort();
    }
}

/// One `SerialPort` per distinct physical port, shared by every device
/// instance addressing it so the port has exactly one exclusive connection.
fn build_port_registry(config: &TalosConfig) -> HashMap<String, Arc<SerialPort>> {
    let mut ports = HashMap::new();
    for device in &config.devices {
        ports
            .entry(device.instance.port.clone())
            .or_insert_with(|| SerialPort::new(device.instance.bus.port.clone(), device.instance.bus.baudrate));
    }
    ports
}

fn device_slave_u8(slave_id: &str) -> u8 {
    slave_id.parse().unwrap_or(1)
}

async fn build_device_table(config: &TalosConfig) -> Result<Arc<DeviceTable>, GatewayError> {
    let ports = build_port_registry(config);
    let poll_interval = Duration::from_secs_f64(config.system.poll_interval_sec);
    let health_params = calculate_health_params(poll_interval);

    let mut table: DeviceTable = HashMap::new();
    for resolved in &config.devices {
        let port = ports
            .get(&resolved.instance.port)
            .expect("every device's port was registered in build_port_registry")
            .clone();
        let rtu_bus = RtuModbusBus::new(port, device_slave_u8(&resolved.instance.slave_id));
        let bus = Arc::new(SerializedBus::new(rtu_bus, Duration::from_secs_f64(resolved.instance.bus.timeout_sec)));
        let device = GenericDevice::new(resolved.instance.register_map.clone(), resolved.default_register_type, bus);

        let strategy = infer_strategy_with_hint(
            &resolved.instance.register_map,
            &resolved.instance.device_type,
            resolved.health_check_hint.as_deref(),
        );

        let handle = Arc::new(DeviceHandle {
            instance: resolved.instance.clone(),
            device,
            health: tokio::sync::Mutex::new(HealthManager::new(health_params)),
            health_strategy: strategy,
            alert_rules: resolved.alert_rules.clone(),
            control_rules: resolved.control_rules.clone(),
        });

        for (param, value) in &resolved.initialization {
            if let Err(e) = handle.device.write_value(param, *value).await {
                warn!(device_id = %resolved.instance.device_id, param, error = %e, "startup initialization write failed");
            }
        }

        table.insert(resolved.instance.device_id.clone(), handle);
    }
    Ok(Arc::new(table))
}

fn pubsub_with_policies(config: &TalosConfig) -> PubSub {
    let bus = PubSub::new();
    let window = config.system.drop_metrics_window_sec;
    bus.set_topic_policy(
        TOPIC_DEVICE_SNAPSHOT,
        TopicPolicy { capacity: 256, on_overflow: talos_infra_pubsub::OverflowPolicy::DropOldest, metrics_window_sec: window },
    );
    bus.set_topic_policy(
        TOPIC_ALERT_WARNING,
        TopicPolicy { capacity: 256, on_overflow: talos_infra_pubsub::OverflowPolicy::DropOldest, metrics_window_sec: window },
    );
    bus.set_topic_policy(
        TOPIC_CONTROL,
        TopicPolicy { capacity: 256, on_overflow: talos_infra_pubsub::OverflowPolicy::BlockProducer, metrics_window_sec: window },
    );
    bus
}

fn sender_config_from(file: &talos_shared_config::SenderConfigFile) -> SenderConfig {
    SenderConfig {
        gateway_id: file.gateway_id.clone(),
        cloud_url: file.cloud_url.clone(),
        http_timeout: Duration::from_secs_f64(file.http_timeout_sec),
        attempt_count: file.attempt_count,
        anchor_offset_sec: file.anchor_offset_sec,
        send_interval_sec: file.send_interval_sec,
        fresh_window_sec: file.fresh_window_sec,
        last_known_ttl_sec: file.last_known_ttl_sec,
        resend_start_delay_sec: file.resend_start_delay_sec.max(0) as u64,
        fail_resend_interval_sec: file.fail_resend_interval_sec,
        resend_anchor_offset_sec: file.resend_anchor_offset_sec,
        fail_resend_batch: file.fail_resend_batch,
        max_retry: file.max_retry,
        protect_recent_sec: file.protect_recent_sec as f64,
        last_post_ok_within_sec: file.last_post_ok_within_sec,
        resend_quota_mb: file.resend_quota_mb,
        fs_free_min_mb: file.fs_free_min_mb,
        resend_cleanup_batch: file.resend_cleanup_batch,
        resend_cleanup_enabled: file.resend_cleanup_enabled,
    }
}

/// Loads config from `config_dir`, connects storage, builds the device
/// table, and registers (but does not yet start) every subscriber.
pub async fn build(config: &TalosConfig, config_dir: &std::path::Path) -> Result<Gateway, GatewayError> {
    let _ = config_dir;
    let bus = pubsub_with_policies(config);

    let repository = Arc::new(SnapshotRepository::connect(&config.snapshot_storage.db_path).await?);
    let initial_time_elapsed = {
        let conn = repository.writer_connection().await;
        PersistedTimeElapsedStore::load_all(&conn).await.unwrap_or_default()
    };
    let time_elapsed = Arc::new(PersistedTimeElapsedStore::new(initial_time_elapsed));

    let devices = build_device_table(config).await?;

    let drop_metrics = spawn_drop_metrics_loop(bus.clone(), Duration::from_secs(config.system.drop_metrics_window_sec));

    let mut registry = SubscriberRegistry::new(bus.clone());

    let monitor_devices = devices.clone();
    let monitor_config = MonitorConfig {
        poll_interval: Duration::from_secs_f64(config.system.poll_interval_sec),
        device_timeout: Duration::from_secs_f64(config.system.device_timeout_sec),
        read_concurrency: config.system.read_concurrency,
        virtual_devices: config.virtual_devices.clone(),
    };
    registry.register(
        "monitor",
        runner(move |bus, shutdown| {
            let devices = monitor_devices.clone();
            let config = MonitorConfig {
                poll_interval: monitor_config.poll_interval,
                device_timeout: monitor_config.device_timeout,
                read_concurrency: monitor_config.read_concurrency,
                virtual_devices: monitor_config.virtual_devices.clone(),
            };
            async move { monitor::run(devices, bus, config, shutdown).await }
        }),
    );

    let alerts = Arc::new(AlertSubsystem::new(devices.clone(), time_elapsed.clone(), config.notifier.clone()));
    registry.register(
        "alerts",
        runner(move |bus, shutdown| {
            let alerts = alerts.clone();
            async move { alerts.run(bus, shutdown).await }
        }),
    );

    let controls = Arc::new(ControlSubsystem::new(devices.clone(), time_elapsed.clone()));
    registry.register(
        "controls",
        runner(move |bus, shutdown| {
            let controls = controls.clone();
            async move { controls.run(bus, shutdown).await }
        }),
    );

    let executor = Arc::new(ControlExecutor::new(devices.clone()));
    registry.register(
        "control_executor",
        runner(move |bus, shutdown| {
            let executor = executor.clone();
            async move { executor.run(bus, shutdown).await }
        }),
    );

    let repo_for_persist = repository.clone();
    registry.register(
        "snapshot_persistence",
        runner(move |bus, shutdown| {
            let repo = repo_for_persist.clone();
            async move { run_snapshot_persistence(repo, bus, shutdown).await }
        }),
    );

    let sender = UpstreamSender::new(sender_config_from(&config.sender), config.sender.outbox_dir.clone())?;
    registry.register(
        "upstream_cache",
        runner({
            let sender = sender.clone();
            move |bus, shutdown| {
                let sender = sender.clone();
                async move { sender.run_cache_updater(bus, shutdown).await }
            }
        }),
    );
    registry.register(
        "upstream_tick",
        runner({
            let sender = sender.clone();
            move |_bus, shutdown| {
                let sender = sender.clone();
                async move { sender.run_tick_loop(shutdown).await }
            }
        }),
    );
    registry.register(
        "upstream_resend",
        runner({
            let sender = sender.clone();
            move |_bus, shutdown| {
                let sender = sender.clone();
                async move { sender.run_resend_loop(shutdown).await }
            }
        }),
    );
    registry.register(
        "upstream_budget",
        runner({
            let sender = sender.clone();
            move |_bus, shutdown| {
                let sender = sender.clone();
                async move { sender.run_budget_loop(shutdown, Duration::from_secs(3600)).await }
            }
        }),
    );

    let maintenance_repo = repository.clone();
    let maintenance_config = MaintenanceConfig {
        cleanup_interval_hours: config.snapshot_storage.cleanup_interval_hours as u32,
        vacuum_interval_days: config.snapshot_storage.vacuum_interval_days as u32,
        retention_days: config.snapshot_storage.retention_days as u32,
        cleanup_enabled: config.snapshot_storage.cleanup_enabled,
    };
    registry.register(
        "snapshot_maintenance",
        runner(move |_bus, _shutdown| {
            let repo = maintenance_repo.clone();
            let maintenance_config = MaintenanceConfig {
                cleanup_interval_hours: maintenance_config.cleanup_interval_hours,
                vacuum_interval_days: maintenance_config.vacuum_interval_days,
                retention_days: maintenance_config.retention_days,
                cleanup_enabled: maintenance_config.cleanup_enabled,
            };
            async move { run_maintenance_loop(repo, maintenance_config, || chrono::Utc::now().timestamp()).await }
        }),
    );

    registry.start_enabled(&enabled_map(config));
    info!(devices = devices.len(), "gateway bootstrapped");

    Ok(Gateway { bus, registry, repository, drop_metrics })
}

fn enabled_map(config: &TalosConfig) -> HashMap<String, bool> {
    let names = [
        "monitor",
        "alerts",
        "controls",
        "control_executor",
        "snapshot_persistence",
        "upstream_cache",
        "upstream_tick",
        "upstream_resend",
        "upstream_budget",
        "snapshot_maintenance",
    ];
    names.iter().map(|name| (name.to_string(), config.system.is_subscriber_enabled(name))).collect()
}

/// Subscribes to `DEVICE_SNAPSHOT` and inserts every snapshot into the
/// repository, logging but never aborting on a storage failure so a
/// database hiccup never drops the upstream pipeline.
async fn run_snapshot_persistence(repo: Arc<SnapshotRepository>, bus: PubSub, shutdown: Arc<Notify>) {
    let sub = bus.subscribe(TOPIC_DEVICE_SNAPSHOT);
    loop {
        tokio::select! {
            _ = shutdown.notified() => return,
            msg = sub.recv() => {
                match msg {
                    Some(talos_infra_pubsub::BusMessage::Snapshot(snapshot)) => {
                        if let Err(e) = repo.insert(&snapshot).await {
                            warn!(device_id = %snapshot.device_id, error = %e, "failed to persist snapshot");
                        }
                    }
                    Some(_) => {}
                    None => return,
                }
            }
        }
    }
}

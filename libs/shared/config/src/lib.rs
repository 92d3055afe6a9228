//! Configuration loading and validation for the Talos gateway.
//!
//! Each `<name>_config.rs` (or `<name>.rs`) module owns one YAML file's shape
//! and a `load` function; none of them depend on anything outside
//! `talos-domain-models`, so this crate stays usable from tooling that needs
//! config validation without the rest of the gateway. [`TalosConfig::load_all`]
//! ties every file together into the typed structs the gateway binary runs
//! on, resolving per-device register maps, constraints, and rule sets.

pub mod alert_condition;
pub mod control_condition;
pub mod device_instance_config;
pub mod driver;
pub mod errors;
pub mod modbus_device;
pub mod notifier_config;
pub mod sender_config;
pub mod snapshot_storage;
pub mod system_config;
pub mod time_condition;
pub mod virtual_device;

pub use alert_condition::AlertConditionFile;
pub use control_condition::ControlConditionFile;
pub use device_instance_config::DeviceInstanceConfig;
pub use driver::DriverFile;
pub use errors::ConfigError;
pub use modbus_device::ModbusDeviceConfig;
pub use notifier_config::NotifierConfig;
pub use sender_config::SenderConfigFile;
pub use snapshot_storage::SnapshotStorageConfig;
pub use system_config::SystemConfig;
pub use time_condition::TimeConditionFile;
pub use virtual_device::VirtualDeviceConfig;

use std::collections::HashMap;
use std::path::Path;
use talos_domain_models::{AlertRule, ControlRule, DeviceId, DeviceInstance, RegisterKind};

/// One device instance plus the rules and startup values resolved for it.
#[derive(Debug, Clone)]
pub struct ResolvedDevice {
    pub instance: DeviceInstance,
    pub alert_rules: Vec<AlertRule>,
    pub control_rules: Vec<ControlRule>,
    pub initialization: HashMap<String, f64>,
    /// Author-supplied health-check register override from the driver file,
    /// consulted by `talos_core_modbus::health::infer_strategy_with_hint`
    /// before keyword/device-type inference.
    pub health_check_hint: Option<String>,
    /// The driver file's file-level `register_type`, needed by
    /// `talos_core_modbus::GenericDevice`'s bulk-read planner to pick
    /// bulk-eligible pins.
    pub default_register_type: RegisterKind,
}

/// Everything the gateway binary needs to boot, assembled from the YAML
/// files under a config directory.
#[derive(Debug, Clone)]
pub struct TalosConfig {
    pub system: SystemConfig,
    pub devices: Vec<ResolvedDevice>,
    pub sender: SenderConfigFile,
    pub notifier: NotifierConfig,
    pub snapshot_storage: SnapshotStorageConfig,
    pub time_conditions: TimeConditionFile,
    pub virtual_devices: VirtualDeviceConfig,
}

impl TalosConfig {
    /// Loads and cross-validates every config file under `dir`. Composite
    /// trees (alert and control) are assigned fresh leaf ids here, once, so
    /// every later `CompositeEvaluator` sees stable ids for the lifetime of
    /// the process.
    pub fn load_all(dir: &Path) -> Result<Self, ConfigError> {
        let modbus_device = ModbusDeviceConfig::load(&dir.join("modbus_device.yml"))?;
        let device_instance = DeviceInstanceConfig::load(&dir.join("device_instance_config.yml"))?;
        let alert_condition = AlertConditionFile::load(&dir.join("alert_condition.yml"))?;
        let control_condition = ControlConditionFile::load(&dir.join("control_condition.yml"))?;
        let sender = SenderConfigFile::load(&dir.join("sender_config.yml"))?;
        let notifier = NotifierConfig::load(&dir.join("notifier_config.yml"))?;
        let system = SystemConfig::load(&dir.join("system_config.yml"))?;
        let snapshot_storage = SnapshotStorageConfig::load(&dir.join("snapshot_storage.yml"))?;
        let time_conditions = TimeConditionFile::load(&dir.join("time_condition.yml"))?;
        let virtual_devices = VirtualDeviceConfig::load_optional(&dir.join("virtual_device_config.yml"))?;

        let mut driver_cache: HashMap<String, DriverFile> = HashMap::new();
        let mut devices = Vec::with_capacity(modbus_device.devices.len());

        for entry in &modbus_device.devices {
            if !driver_cache.contains_key(&entry.model_file) {
                let loaded = DriverFile::load(&dir.join(&entry.model_file))?;
                driver_cache.insert(entry.model_file.clone(), loaded);
            }
            let driver_file = &driver_cache[&entry.model_file];

            let mut register_map = driver_file.to_register_map();
            device_instance.apply_pin_overrides(&entry.model, &entry.slave_id, &mut register_map);

            let bus = modbus_device.resolve_bus(entry).ok_or_else(|| {
                ConfigError::Validation(format!("device {} ({}) has no resolvable bus", entry.model, entry.slave_id))
            })?;

            let constraint_policy = device_instance.resolve_constraints(&entry.model, &entry.slave_id);
            let on_off_binding = device_instance.on_off_binding(&entry.model, &entry.slave_id);
            let initialization = device_instance.resolve_initialization(&entry.model, &entry.slave_id);

            let instance = DeviceInstance {
                device_id: DeviceId::new(&entry.model, &entry.slave_id),
                model: entry.model.clone(),
                slave_id: entry.slave_id.clone(),
                device_type: entry.device_type.clone(),
                port: bus.port.clone(),
                bus,
                register_map,
                constraint_policy,
                on_off_binding,
            };

            let mut alert_rules = alert_condition.resolve_for(&entry.model, &entry.slave_id);
            for rule in &mut alert_rules {
                if let Some(composite) = &mut rule.composite {
                    composite.validate_and_assign_ids().map_err(|err| {
                        ConfigError::Validation(format!("alert {} on {} {}: {err}", rule.code, entry.model, entry.slave_id))
                    })?;
                }
            }

            let (mut control_rules, dropped) = control_condition.resolve_for(&entry.model, &entry.slave_id);
            for code in dropped {
                tracing::warn!(
                    model = %entry.model,
                    slave_id = %entry.slave_id,
                    code,
                    "control rule dropped by priority conflict resolution"
                );
            }
            for rule in &mut control_rules {
                rule.composite.validate_and_assign_ids().map_err(|err| {
                    ConfigError::Validation(format!("control rule {} on {} {}: {err}", rule.code, entry.model, entry.slave_id))
                })?;
            }

            let health_check_hint = driver_file.health_check.as_ref().and_then(|h| h.register.clone());
            let default_register_type = driver_file.register_type;

            devices.push(ResolvedDevice {
                instance,
                alert_rules,
                control_rules,
                initialization,
                health_check_hint,
                default_register_type,
            });
        }

        Ok(Self { system, devices, sender, notifier, snapshot_storage, time_conditions, virtual_devices })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn load_all_assembles_a_single_device() {
        let dir = tempfile::tempdir().unwrap();
        let p = |name: &str| dir.path().join(name);

        fs::write(
            p("modbus_device.yml"),
            r#"
buses:
  com1: { port: /dev/ttyUSB0, baudrate: 9600 }
devices:
  - model: TECO_VFD
    type: inverter
    model_file: teco_vfd.yml
    slave_id: "2"
    bus: com1
"#,
        )
        .unwrap();
        fs::write(
            p("teco_vfd.yml"),
            r#"
register_type: holding
register_map:
  HZ: { offset: 10, format: u16, readable: true, scale: 0.1 }
  RW_HZ: { offset: 20, format: u16, writable: true }
"#,
        )
        .unwrap();
        fs::write(p("device_instance_config.yml"), "global_defaults:\n  constraints: {}\n").unwrap();
        fs::write(p("alert_condition.yml"), "{}\n").unwrap();
        fs::write(p("control_condition.yml"), "{}\n").unwrap();
        fs::write(
            p("sender_config.yml"),
            r#"
gateway_id: GATEWAY0001
cloud_url: https://cloud.example.com/ingest
send_interval_sec: 60
fresh_window_sec: 30
resend_start_delay_sec: 30
fail_resend_interval_sec: 120
fail_resend_batch: 20
max_retry: 5
protect_recent_sec: 10
resend_quota_mb: 500
fs_free_min_mb: 100
resend_cleanup_batch: 50
outbox_dir: ./outbox
"#,
        )
        .unwrap();
        fs::write(
            p("notifier_config.yml"),
            r#"
notifiers: {}
routing: {}
retry: { base_sec: 1.0, multiplier: 2.0, max_attempts: 3 }
"#,
        )
        .unwrap();
        fs::write(
            p("system_config.yml"),
            "gateway_id: GATEWAY0001\npoll_interval_sec: 5\ndevice_timeout_sec: 2.0\n",
        )
        .unwrap();
        fs::write(p("snapshot_storage.yml"), "db_path: ./data/snapshots.db\n").unwrap();
        fs::write(p("time_condition.yml"), "{}\n").unwrap();

        let config = TalosConfig::load_all(dir.path()).unwrap();
        assert_eq!(config.devices.len(), 1);
        assert_eq!(config.devices[0].instance.device_id.as_str(), "TECO_VFD_2");
        assert_eq!(config.devices[0].instance.register_map.len(), 2);
    }
}

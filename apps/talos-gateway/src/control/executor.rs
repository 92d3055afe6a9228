//! Control Executor: consumes `ControlAction`s, resolves them against a
//! device's live register map, enforces constraints and idempotence, and
//! defers on/off actions while a device is unhealthy.

use crate::device_table::{DeviceHandle, DeviceTable};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use talos_core_modbus::HealthState;
use talos_domain_models::{ControlAction, ControlActionType, DeviceId, UNREADABLE_SENTINEL};
use talos_infra_pubsub::{BusMessage, PubSub, TOPIC_CONTROL};
use tokio::sync::{Mutex, Notify};
use tracing::{debug, warn};

/// Last-write-wins per kind, for actions deferred while a device is offline.
#[derive(Default)]
struct Pending {
    turn_on: Option<ControlAction>,
    turn_off: Option<ControlAction>,
}

pub struct ControlExecutor {
    devices: Arc<DeviceTable>,
    pending: Mutex<HashMap<DeviceId, Pending>>,
    last_health: Mutex<HashMap<DeviceId, HealthState>>,
}

impl ControlExecutor {
    pub fn new(devices: Arc<DeviceTable>) -> Self {
        Self { devices, pending: Mutex::new(HashMap::new()), last_health: Mutex::new(HashMap::new()) }
    }

    pub async fn run(self: Arc<Self>, bus: PubSub, shutdown: Arc<Notify>) {
        let sub = bus.subscribe(TOPIC_CONTROL);
        let mut health_poll = tokio::time::interval(Duration::from_secs(1));

        loop {
            tokio::select! {
                _ = shutdown.notified() => return,
                _ = health_poll.tick() => self.flush_recovered_devices().await,
                msg = sub.recv() => {
                    match msg {
                        Some(BusMessage::Control(action)) => self.handle_action(action).await,
                        Some(_) => {}
                        None => return,
                    }
                }
            }
        }
    }

    async fn handle_action(&self, action: ControlAction) {
        let device_id = DeviceId::new(&action.model, &action.slave_id);
        let Some(handle) = self.devices.get(&device_id).cloned() else {
            debug!(device_id = %device_id, "control action targets unknown device, skipping");
            return;
        };

        if matches!(action.action_type, ControlActionType::TurnOn | ControlActionType::TurnOff) {
            let unhealthy = matches!(handle.health.lock().await.state(), HealthState::Unhealthy);
            if unhealthy {
                self.defer(&device_id, action).await;
                return;
            }
        }

        self.execute(&handle, &action).await;
    }

    async fn defer(&self, device_id: &DeviceId, action: ControlAction) {
        let mut pending = self.pending.lock().await;
        let entry = pending.entry(device_id.clone()).or_default();
        match action.action_type {
            ControlActionType::TurnOn => entry.turn_on = Some(action),
            ControlActionType::TurnOff => entry.turn_off = Some(action),
            _ => {}
        }
    }

    /// Flushes every device that transitioned Unhealthy -> Healthy since the
    /// last poll, turn_on before turn_off.
    async fn flush_recovered_devices(&self) {
        let mut last_health = self.last_health.lock().await;
        for (device_id, handle) in self.devices.iter() {
            let state = handle.health.lock().await.state();
            let previous = last_health.insert(device_id.clone(), state);
            let recovered = previous == Some(HealthState::Unhealthy) && state == HealthState::Healthy;
            if !recovered {
                continue;
            }
            let pending = self.pending.lock().await.remove(device_id);
            if let Some(pending) = pending {
                if let Some(action) = pending.turn_on {
                    self.execute(handle, &action).await;
                }
                if let Some(action) = pending.turn_off {
                    self.execute(handle, &action).await;
                }
            }
        }
    }

    async fn execute(&self, handle: &DeviceHandle, action: &ControlAction) {
        match action.action_type {
            ControlActionType::TurnOn | ControlActionType::TurnOff => self.execute_on_off(handle, action).await,
            ControlActionType::AdjustFrequency => self.execute_adjust(handle, action).await,
            _ => self.execute_absolute(handle, action).await,
        }
    }

    async fn execute_on_off(&self, handle: &DeviceHandle, action: &ControlAction) {
        let desired = if action.action_type == ControlActionType::TurnOn { 1.0 } else { 0.0 };

        if handle.instance.supports_on_off() {
            let register = if handle.instance.register_map.contains_case_insensitive("RW_ON_OFF") {
                "RW_ON_OFF"
            } else {
                "ON_OFF"
            };
            let current = handle.device.read_value(register).await;
            if (current - desired).abs() <= f64::EPSILON {
                debug!(device_id = %action.model, register, "device already in desired on/off state");
                return;
            }
            self.write_checked(handle, register, desired, action.force).await;
            return;
        }

        if let Some(binding) = &handle.instance.on_off_binding {
            let desired = if action.action_type == ControlActionType::TurnOn { binding.on as f64 } else { binding.off as f64 };
            for target in &binding.targets {
                self.write_checked(handle, target, desired, action.force).await;
            }
            return;
        }

        warn!(model = %action.model, slave_id = %action.slave_id, "device has neither an on/off register nor an on_off_binding, skipping");
    }

    async fn execute_adjust(&self, handle: &DeviceHandle, action: &ControlAction) {
        let Some(target) = action.resolved_target() else {
            warn!(action = ?action.action_type, "adjust_frequency action has no resolvable target");
            return;
        };
        let Some(delta) = action.value else { return };
        if !self.target_writable(handle, &target) {
            return;
        }

        let current = handle.device.read_value(&target).await;
        if current == UNREADABLE_SENTINEL {
            warn!(target, "cannot adjust_frequency: current value unreadable");
            return;
        }
        self.write_checked(handle, &target, current + delta, action.force).await;
    }

    async fn execute_absolute(&self, handle: &DeviceHandle, action: &ControlAction) {
        let Some(target) = action.resolved_target() else {
            warn!(action = ?action.action_type, "action has no resolvable target");
            return;
        };
        let Some(value) = action.value else { return };
        if !self.target_writable(handle, &target) {
            return;
        }

        let current = handle.device.read_value(&target).await;
        const DEFAULT_TOLERANCE: f64 = 0.0;
        if current != UNREADABLE_SENTINEL && (current - value).abs() <= DEFAULT_TOLERANCE {
            debug!(target, value, "write skipped, device already at target value");
            return;
        }
        self.write_checked(handle, &target, value, action.force).await;
    }

    fn target_writable(&self, handle: &DeviceHandle, target: &str) -> bool {
        match handle.instance.register_map.get_case_insensitive(target) {
            Some(def) if def.writable => true,
            Some(_) => {
                warn!(target, "target register is not writable, skipping");
                false
            }
            None => {
                warn!(target, "target register not found in device's register map, skipping");
                false
            }
        }
    }

    /// Enforces the constraint policy before writing. When the value falls
    /// outside the configured bounds, the write is rejected unless `force`
    /// is set, in which case the bound is widened just enough to admit this
    /// one value and the write proceeds (the stored policy itself is never
    /// mutated, so the next ordinary write is checked against the original
    /// bounds again).
    async fn write_checked(&self, handle: &DeviceHandle, target: &str, value: f64, force: bool) {
        let bound = handle.instance.constraint_policy.bound_for(target);
        if !bound.allows(value) {
            if !force {
                warn!(target, value, "write rejected by constraint policy");
                return;
            }
            let widened = bound.widened_to_include(value);
            warn!(target, value, original = ?bound, widened = ?widened, "constraint violation overridden by force");
        }
        if let Err(e) = handle.device.write_value(target, value).await {
            warn!(target, value, error = %e, "control write failed");
        }
    }
}

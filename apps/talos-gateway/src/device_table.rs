//! Per-device runtime handle: the live register map, bus-backed device,
//! and health state shared between the Monitor (reads) and the Control
//! Executor (writes).

use std::collections::HashMap;
use std::sync::Arc;
use talos_core_modbus::{GenericDevice, HealthCheckStrategy, HealthManager};
use talos_domain_models::{AlertRule, ControlRule, DeviceInstance};
use tokio::sync::Mutex;

pub struct DeviceHandle {
    pub instance: DeviceInstance,
    pub device: GenericDevice,
    pub health: Mutex<HealthManager>,
    pub health_strategy: HealthCheckStrategy,
    pub alert_rules: Vec<AlertRule>,
    pub control_rules: Vec<ControlRule>,
}

pub type DeviceTable = HashMap<talos_domain_models::DeviceId, Arc<DeviceHandle>>;

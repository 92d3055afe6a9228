//! `modbus_device.yml`: bus definitions and the device roster that
//! binds each device to a bus, a driver file, and a slave id.

use crate::errors::{read_yaml, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use talos_domain_models::BusSettings;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceEntry {
    pub model: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub model_file: String,
    pub slave_id: String,
    /// Either a named bus (looked up in `buses`) or an inline port string.
    pub bus: Option<String>,
    pub port: Option<String>,
    #[serde(default)]
    pub modes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ModbusDeviceConfig {
    pub buses: HashMap<String, BusSettings>,
    pub devices: Vec<DeviceEntry>,
}

impl ModbusDeviceConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = read_yaml(path)?;
        for device in &config.devices {
            if device.bus.is_none() && device.port.is_none() {
                return Err(ConfigError::Validation(format!(
                    "device {} ({}) declares neither bus nor port",
                    device.model, device.slave_id
                )));
            }
            if let Some(bus_name) = &device.bus {
                if !config.buses.contains_key(bus_name) {
                    return Err(ConfigError::Validation(format!("device {} references unknown bus {bus_name}", device.model)));
                }
            }
        }
        Ok(config)
    }

    /// Resolves the serial port settings a device instance runs on, whether
    /// declared via a named bus or an inline port override.
    pub fn resolve_bus(&self, device: &DeviceEntry) -> Option<BusSettings> {
        if let Some(name) = &device.bus {
            return self.buses.get(name).cloned();
        }
        device.port.as_ref().map(|port| BusSettings { port: port.clone(), baudrate: 9600, timeout_sec: 1.0 })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn loads_and_cross_checks_bus_references() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
buses:
  com1:
    port: /dev/ttyUSB0
    baudrate: 9600
devices:
  - model: TECO_VFD
    type: inverter
    model_file: teco_vfd.yml
    slave_id: "2"
    bus: com1
"#
        )
        .unwrap();

        let config = ModbusDeviceConfig::load(file.path()).unwrap();
        assert_eq!(config.devices.len(), 1);
        assert!(config.resolve_bus(&config.devices[0]).is_some());
    }

    #[test]
    fn rejects_unknown_bus_reference() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
buses: {{}}
devices:
  - model: TECO_VFD
    type: inverter
    model_file: teco_vfd.yml
    slave_id: "2"
    bus: missing
"#
        )
        .unwrap();

        assert!(ModbusDeviceConfig::load(file.path()).is_err());
    }
}

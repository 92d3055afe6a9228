//! `virtual_device_config.yml` (optional): named pseudo-devices whose
//! values are aggregated from the latest snapshots of real devices rather
//! than read over a bus. This loader tolerates a missing file, resolving
//! to zero virtual devices, since most deployments have none.

use crate::errors::{read_yaml, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationKind {
    Average,
    Sum,
    Min,
    Max,
}

/// One computed output parameter: gathers the named parameter from each
/// listed real device's latest snapshot and folds them with `aggregation`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VirtualParameter {
    /// `device_id` (as produced by `DeviceId::new`) of a real device to read
    /// `source_param` from.
    pub devices: Vec<String>,
    pub source_param: String,
    pub aggregation: AggregationKind,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VirtualDeviceEntry {
    /// Slave id used only to build this virtual device's `DeviceId`; it owns
    /// no bus and is never dialed.
    pub slave_id: String,
    #[serde(default)]
    pub device_type: String,
    pub parameters: HashMap<String, VirtualParameter>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct VirtualDeviceConfig {
    #[serde(default)]
    pub devices: HashMap<String, VirtualDeviceEntry>,
}

impl VirtualDeviceConfig {
    /// Loads the file if present; an absent file resolves to no virtual
    /// devices rather than an error, matching the optional CLI flag it
    /// replaces.
    pub fn load_optional(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        read_yaml(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_resolves_to_empty_config() {
        let config = VirtualDeviceConfig::load_optional(Path::new("/nonexistent/virtual_device_config.yml")).unwrap();
        assert!(config.devices.is_empty());
    }

    #[test]
    fn loads_an_averaged_virtual_parameter() {
        let yaml = r#"
devices:
  PLANT_TOTAL:
    slave_id: "0"
    device_type: virtual
    parameters:
      AVG_TEMP:
        devices: [TECO_VFD_2, TECO_VFD_3]
        source_param: TEMP
        aggregation: average
"#;
        let config: VirtualDeviceConfig = serde_yaml::from_str(yaml).unwrap();
        let entry = &config.devices["PLANT_TOTAL"];
        assert_eq!(entry.parameters["AVG_TEMP"].devices, vec!["TECO_VFD_2".to_string(), "TECO_VFD_3".to_string()]);
    }
}

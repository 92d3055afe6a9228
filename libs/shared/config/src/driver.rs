//! `<driver>.yml`: one register map per device model/driver file.

use crate::errors::{read_yaml, ConfigError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use talos_domain_models::register::Formula;
use talos_domain_models::{RegisterDefinition, RegisterFormat, RegisterKind, RegisterMap};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DriverRegisterEntry {
    pub offset: Option<u32>,
    pub format: RegisterFormat,
    #[serde(default)]
    pub readable: bool,
    #[serde(default)]
    pub writable: bool,
    pub scale: Option<f64>,
    pub offset_value: Option<f64>,
    pub formula: Option<Formula>,
    pub bit: Option<u8>,
    pub composed_of: Option<Vec<String>>,
    pub unit: Option<String>,
    pub precision: Option<u32>,
    pub scale_from: Option<String>,
    /// Overrides the file-level default register kind for this one entry.
    pub register_type: Option<RegisterKind>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DriverFile {
    pub register_type: RegisterKind,
    pub register_map: HashMap<String, DriverRegisterEntry>,
    #[serde(default)]
    pub health_check: Option<HealthCheckHint>,
}

/// Author-supplied override for health-check strategy inference;
/// `talos-core-modbus::health::infer_strategy` consults this before
/// falling back to its own keyword/device-type inference.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthCheckHint {
    pub register: Option<String>,
}

impl DriverFile {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_yaml(path)
    }

    /// Builds a [`RegisterMap`] from this file's entries, applying the
    /// file-level default register kind to entries that don't override it.
    pub fn to_register_map(&self) -> RegisterMap {
        let mut map = RegisterMap::new();
        for (name, entry) in &self.register_map {
            map.insert(RegisterDefinition {
                name: name.clone(),
                offset: entry.offset,
                format: entry.format,
                register_type: entry.register_type.unwrap_or(self.register_type),
                readable: entry.readable,
                writable: entry.writable,
                scale: entry.scale,
                offset_value: entry.offset_value,
                formula: entry.formula.clone(),
                precision: entry.precision,
                unit: entry.unit.clone(),
                bit: entry.bit,
                composed_of: entry.composed_of.clone(),
                scale_from: entry.scale_from.clone(),
            });
        }
        map.reindex();
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_register_map_with_file_level_default_kind() {
        let yaml = r#"
register_type: holding
register_map:
  HZ:
    offset: 10
    format: u16
    readable: true
    scale: 0.1
  RW_HZ:
    offset: 20
    format: u16
    writable: true
    register_type: holding
"#;
        let file: DriverFile = serde_yaml::from_str(yaml).unwrap();
        let map = file.to_register_map();
        assert_eq!(map.len(), 2);
        let hz = map.get("HZ").unwrap();
        assert_eq!(hz.register_type, RegisterKind::Holding);
        assert_eq!(hz.scale, Some(0.1));
    }
}

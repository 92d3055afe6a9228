//! `snapshot_storage.yml`: the snapshot database location and the
//! maintenance task's cleanup/vacuum schedule.

use crate::errors::{read_yaml, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnapshotStorageConfig {
    pub db_path: String,
    #[serde(default = "default_cleanup_interval_hours")]
    pub cleanup_interval_hours: u64,
    #[serde(default = "default_vacuum_interval_days")]
    pub vacuum_interval_days: u64,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    #[serde(default = "default_true")]
    pub cleanup_enabled: bool,
}

fn default_cleanup_interval_hours() -> u64 {
    24
}

fn default_vacuum_interval_days() -> u64 {
    7
}

fn default_retention_days() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

impl SnapshotStorageConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        read_yaml(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn applies_maintenance_defaults() {
        let yaml = "db_path: ./data/snapshots.db\n";
        let config: SnapshotStorageConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.retention_days, 30);
        assert!(config.cleanup_enabled);
    }
}
